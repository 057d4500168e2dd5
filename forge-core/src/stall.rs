//! Stall Detector: one component owning both in-session cyclic-action
//! detection and cross-session no-progress detection, rather than two
//! separate heuristics living in different layers of the control loop.

use crate::error::ForgeResult;
use crate::persistence::{Store, StoreError};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StallKind {
    /// The same action (tool call + args fingerprint) repeated in a tight
    /// loop within a single session.
    InSessionCycle,
    /// No feature has moved from not-passing to passing across several
    /// consecutive sessions.
    CrossSessionNoProgress,
    /// The working tree's commit hash hasn't moved across consecutive
    /// checkpoints, meaning nothing is actually being committed.
    NoFileChanges,
    /// The count of passing features hasn't moved across consecutive
    /// checkpoints despite sessions running.
    StuckPassingCount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StallSignal {
    pub kind: StallKind,
    pub detail: String,
}

const CYCLE_WINDOW: usize = 8;
const CYCLE_REPEAT_THRESHOLD: usize = 5;

/// In-session half: a bounded ring buffer of recent action fingerprints.
/// Lives entirely in memory for the lifetime of one session.
pub struct InSessionCycleTracker {
    recent: VecDeque<String>,
}

impl InSessionCycleTracker {
    pub fn new() -> Self {
        Self {
            recent: VecDeque::with_capacity(CYCLE_WINDOW),
        }
    }

    /// Record an action fingerprint (e.g. `"{tool}:{args_hash}"`) and check
    /// whether it now dominates the recent window.
    pub fn record(&mut self, fingerprint: &str) -> Option<StallSignal> {
        if self.recent.len() == CYCLE_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(fingerprint.to_string());

        let repeats = self.recent.iter().filter(|f| f.as_str() == fingerprint).count();
        if repeats >= CYCLE_REPEAT_THRESHOLD {
            Some(StallSignal {
                kind: StallKind::InSessionCycle,
                detail: format!("action '{fingerprint}' repeated {repeats} times in the last {} actions", self.recent.len()),
            })
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.recent.clear();
    }
}

impl Default for InSessionCycleTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Cross-session half: persisted, since "no progress" is judged over
/// multiple orchestrator runs that may span process restarts.
pub struct CrossSessionStallTracker {
    store: Store,
}

impl CrossSessionStallTracker {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Called once per session end with whether any feature newly passed
    /// during that session. Returns a signal once `threshold` consecutive
    /// no-progress sessions have accumulated.
    pub async fn record_session_end(&self, made_progress: bool, threshold: u32) -> ForgeResult<Option<StallSignal>> {
        let open_record: Option<(String, u32)> = self
            .store
            .read(|conn| {
                conn.query_row(
                    "SELECT record_id, consecutive_sessions FROM stall_records WHERE stall_type = 'cross_session_no_progress' AND closed_at IS NULL",
                    [],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u32)),
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                    other => StoreError::from(other),
                })
            })
            .await
            .ok();

        if made_progress {
            if let Some((record_id, _)) = open_record {
                let closed_at = chrono::Utc::now().to_rfc3339();
                self.store
                    .write(move |conn| {
                        conn.execute(
                            "UPDATE stall_records SET closed_at = ?1, resolved = 1 WHERE record_id = ?2",
                            params![closed_at, record_id],
                        )
                        .map_err(StoreError::from)?;
                        Ok(())
                    })
                    .await?;
            }
            return Ok(None);
        }

        let (record_id, seq, consecutive) = match open_record {
            Some((id, count)) => {
                let seq = id
                    .strip_prefix("SR-")
                    .and_then(|n| n.parse::<u64>().ok())
                    .unwrap_or(0);
                (id, seq, count + 1)
            }
            None => {
                let seq = self.store.next_seq("SR").await?;
                (format!("SR-{seq}"), seq, 1)
            }
        };

        let opened_at = chrono::Utc::now().to_rfc3339();
        let (rid, count, ts) = (record_id.clone(), consecutive, opened_at);
        self.store
            .write(move |conn| {
                conn.execute(
                    "INSERT INTO stall_records (record_id, seq, stall_type, consecutive_sessions, opened_at)
                     VALUES (?1, ?2, 'cross_session_no_progress', ?3, ?4)
                     ON CONFLICT(record_id) DO UPDATE SET consecutive_sessions = excluded.consecutive_sessions",
                    params![rid, seq as i64, count as i64, ts],
                )
                .map_err(StoreError::from)?;
                Ok(())
            })
            .await?;

        if consecutive >= threshold {
            Ok(Some(StallSignal {
                kind: StallKind::CrossSessionNoProgress,
                detail: format!("{consecutive} consecutive sessions without a feature advancing"),
            }))
        } else {
            Ok(None)
        }
    }

    /// Call once per checkpoint with its git commit hash. Flags once the
    /// same hash has shown up `threshold` times in a row, meaning nothing is
    /// actually being committed between checkpoints.
    pub async fn record_git_hash(&self, hash: &str, threshold: u32) -> ForgeResult<Option<StallSignal>> {
        self.track_repetition(
            "repeated_git_hash",
            hash,
            threshold,
            StallKind::NoFileChanges,
            |count, v| format!("git commit {v} unchanged across {count} consecutive checkpoints"),
        )
        .await
    }

    /// Call once per checkpoint with the current passing-feature count.
    /// Flags once the count has been unchanged for `threshold` checkpoints
    /// in a row despite sessions running.
    pub async fn record_passing_count(&self, passing: u32, threshold: u32) -> ForgeResult<Option<StallSignal>> {
        self.track_repetition(
            "stuck_passing_count",
            &passing.to_string(),
            threshold,
            StallKind::StuckPassingCount,
            |count, v| format!("passing feature count stuck at {v} across {count} consecutive checkpoints"),
        )
        .await
    }

    /// Shared "flag after N identical values in a row" machinery behind
    /// `record_git_hash` and `record_passing_count`: tracks the open run for
    /// `stall_type`, extends it when `value` repeats, and resets it otherwise.
    async fn track_repetition(
        &self,
        stall_type: &'static str,
        value: &str,
        threshold: u32,
        kind: StallKind,
        detail: fn(u32, &str) -> String,
    ) -> ForgeResult<Option<StallSignal>> {
        let open_record: Option<(String, u32, Option<String>)> = self
            .store
            .read(move |conn| {
                conn.query_row(
                    "SELECT record_id, consecutive_sessions, last_value FROM stall_records WHERE stall_type = ?1 AND closed_at IS NULL",
                    [stall_type],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u32, row.get(2)?)),
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                    other => StoreError::from(other),
                })
            })
            .await
            .ok();

        let (record_id, seq, consecutive) = match open_record {
            Some((id, count, Some(last))) if last == value => {
                let seq = id.rsplit('-').next().and_then(|n| n.parse::<u64>().ok()).unwrap_or(0);
                (id, seq, count + 1)
            }
            Some((id, _, _)) => {
                let closed_at = chrono::Utc::now().to_rfc3339();
                self.store
                    .write(move |conn| {
                        conn.execute(
                            "UPDATE stall_records SET closed_at = ?1 WHERE record_id = ?2",
                            params![closed_at, id],
                        )
                        .map_err(StoreError::from)?;
                        Ok(())
                    })
                    .await?;
                let seq = self.store.next_seq(stall_type_prefix(stall_type)).await?;
                (format!("{}-{seq}", stall_type_prefix(stall_type)), seq, 1)
            }
            None => {
                let seq = self.store.next_seq(stall_type_prefix(stall_type)).await?;
                (format!("{}-{seq}", stall_type_prefix(stall_type)), seq, 1)
            }
        };

        let opened_at = chrono::Utc::now().to_rfc3339();
        let (rid, count, val, ts, st) = (record_id, consecutive, value.to_string(), opened_at, stall_type);
        self.store
            .write(move |conn| {
                conn.execute(
                    "INSERT INTO stall_records (record_id, seq, stall_type, consecutive_sessions, last_value, opened_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(record_id) DO UPDATE SET consecutive_sessions = excluded.consecutive_sessions, last_value = excluded.last_value",
                    params![rid, seq as i64, st, count as i64, val, ts],
                )
                .map_err(StoreError::from)?;
                Ok(())
            })
            .await?;

        if consecutive >= threshold {
            Ok(Some(StallSignal { kind, detail: detail(consecutive, value) }))
        } else {
            Ok(None)
        }
    }
}

/// Record-id prefixes are short and all-caps, matching the rest of the
/// store's entity ids; stall types are lowercase_with_underscores.
fn stall_type_prefix(stall_type: &str) -> &'static str {
    match stall_type {
        "repeated_git_hash" => "SRG",
        "stuck_passing_count" => "SRP",
        _ => "SR",
    }
}

/// Facade combining both halves; the Orchestrator holds one of these for
/// the lifetime of the process rather than wiring the two trackers
/// separately into the control loop.
pub struct StallDetector {
    pub in_session: InSessionCycleTracker,
    pub cross_session: CrossSessionStallTracker,
}

impl StallDetector {
    pub fn new(store: Store) -> Self {
        Self {
            in_session: InSessionCycleTracker::new(),
            cross_session: CrossSessionStallTracker::new(store),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_session_flags_after_threshold_repeats() {
        let mut tracker = InSessionCycleTracker::new();
        for _ in 0..CYCLE_REPEAT_THRESHOLD - 1 {
            assert!(tracker.record("bash:cargo-test").is_none());
        }
        let signal = tracker.record("bash:cargo-test").unwrap();
        assert_eq!(signal.kind, StallKind::InSessionCycle);
    }

    #[test]
    fn in_session_ignores_varied_actions() {
        let mut tracker = InSessionCycleTracker::new();
        for i in 0..10 {
            assert!(tracker.record(&format!("bash:cmd-{i}")).is_none());
        }
    }

    #[tokio::test]
    async fn cross_session_flags_after_consecutive_no_progress() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("p.db")).await.unwrap();
        let tracker = CrossSessionStallTracker::new(store);

        assert!(tracker.record_session_end(false, 3).await.unwrap().is_none());
        assert!(tracker.record_session_end(false, 3).await.unwrap().is_none());
        let signal = tracker.record_session_end(false, 3).await.unwrap().unwrap();
        assert_eq!(signal.kind, StallKind::CrossSessionNoProgress);
    }

    #[tokio::test]
    async fn repeated_git_hash_flags_after_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("p.db")).await.unwrap();
        let tracker = CrossSessionStallTracker::new(store);

        assert!(tracker.record_git_hash("abc123", 3).await.unwrap().is_none());
        assert!(tracker.record_git_hash("abc123", 3).await.unwrap().is_none());
        let signal = tracker.record_git_hash("abc123", 3).await.unwrap().unwrap();
        assert_eq!(signal.kind, StallKind::NoFileChanges);
    }

    #[tokio::test]
    async fn changing_git_hash_resets_the_streak() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("p.db")).await.unwrap();
        let tracker = CrossSessionStallTracker::new(store);

        tracker.record_git_hash("abc123", 3).await.unwrap();
        tracker.record_git_hash("def456", 3).await.unwrap();
        let signal = tracker.record_git_hash("def456", 3).await.unwrap();
        assert!(signal.is_none());
    }

    #[tokio::test]
    async fn stuck_passing_count_flags_after_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("p.db")).await.unwrap();
        let tracker = CrossSessionStallTracker::new(store);

        assert!(tracker.record_passing_count(4, 3).await.unwrap().is_none());
        assert!(tracker.record_passing_count(4, 3).await.unwrap().is_none());
        let signal = tracker.record_passing_count(4, 3).await.unwrap().unwrap();
        assert_eq!(signal.kind, StallKind::StuckPassingCount);
    }

    #[tokio::test]
    async fn progress_resets_cross_session_streak() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("p.db")).await.unwrap();
        let tracker = CrossSessionStallTracker::new(store);

        tracker.record_session_end(false, 3).await.unwrap();
        tracker.record_session_end(true, 3).await.unwrap();
        tracker.record_session_end(false, 3).await.unwrap();
        let signal = tracker.record_session_end(false, 3).await.unwrap();
        assert!(signal.is_none(), "streak should have reset after progress");
    }
}
