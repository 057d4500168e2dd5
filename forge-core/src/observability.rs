//! Observability: the session event stream (persisted, queryable) plus
//! `tracing` instrumentation and running budget/cost tracking.

use crate::error::ForgeResult;
use crate::persistence::{Store, StoreError};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub session_id: String,
    pub in_session_seq: u32,
    pub kind: String,
    pub payload: serde_json::Value,
    pub created_at: String,
}

/// Emits a structured `tracing` event and a durable row in one call, so a
/// dashboard reading the database and an operator tailing logs see the same
/// story.
pub struct Observability {
    store: Store,
    in_session_counter: AtomicU32,
}

impl Observability {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            in_session_counter: AtomicU32::new(0),
        }
    }

    pub fn emit(&self, session_id: &str, kind: &str, payload: serde_json::Value) {
        let in_session_seq = self.in_session_counter.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(session_id, kind, in_session_seq, %payload, "session event");

        let created_at = chrono::Utc::now().to_rfc3339();
        let (sid, k, p, ts) = (session_id.to_string(), kind.to_string(), payload.to_string(), created_at);
        self.store.write_fire_and_forget(move |conn| {
            let result = conn.execute(
                "INSERT INTO events (session_id, in_session_seq, kind, payload, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![sid, in_session_seq as i64, k, p, ts],
            );
            if let Err(e) = result {
                tracing::warn!(error = %e, "failed to persist session event");
            }
        });
    }

    pub async fn for_session(&self, session_id: &str) -> ForgeResult<Vec<Event>> {
        let sid = session_id.to_string();
        let rows = self
            .store
            .read(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT seq, session_id, in_session_seq, kind, payload, created_at FROM events WHERE session_id = ?1 ORDER BY seq",
                )?;
                let rows = stmt
                    .query_map([&sid], |row| {
                        let payload_str: String = row.get(4)?;
                        Ok(Event {
                            seq: row.get::<_, i64>(0)? as u64,
                            session_id: row.get(1)?,
                            in_session_seq: row.get::<_, i64>(2)? as u32,
                            kind: row.get(3)?,
                            payload: serde_json::from_str(&payload_str).unwrap_or(serde_json::Value::Null),
                            created_at: row.get(5)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(StoreError::from)?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }
}

/// Running cost tracker for a single session against the configured
/// ceiling, checked by the Session Runner after every assistant turn.
#[derive(Debug, Clone, Copy)]
pub struct BudgetTracker {
    spent_usd: f64,
    ceiling_usd: f64,
    warning_threshold: f64,
}

impl BudgetTracker {
    pub fn new(ceiling_usd: f64, warning_threshold: f64) -> Self {
        Self {
            spent_usd: 0.0,
            ceiling_usd,
            warning_threshold,
        }
    }

    pub fn record_spend(&mut self, usd: f64) {
        self.spent_usd += usd;
    }

    pub fn fraction_used(&self) -> f64 {
        if self.ceiling_usd <= 0.0 {
            return 1.0;
        }
        (self.spent_usd / self.ceiling_usd).min(1.0)
    }

    pub fn is_over_warning(&self) -> bool {
        self.fraction_used() >= self.warning_threshold
    }

    pub fn is_exhausted(&self) -> bool {
        self.spent_usd >= self.ceiling_usd
    }

    pub fn spent_usd(&self) -> f64 {
        self.spent_usd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_assigns_increasing_in_session_seq() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("p.db")).await.unwrap();
        let obs = Observability::new(store.clone());
        obs.emit("s-1", "turn_started", serde_json::json!({}));
        obs.emit("s-1", "turn_completed", serde_json::json!({}));
        store.write(|_| Ok(())).await.unwrap();

        let events = obs.for_session("s-1").await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].in_session_seq, 1);
        assert_eq!(events[1].in_session_seq, 2);
    }

    #[test]
    fn budget_tracker_flags_warning_and_exhaustion() {
        let mut tracker = BudgetTracker::new(10.0, 0.8);
        assert!(!tracker.is_over_warning());
        tracker.record_spend(8.5);
        assert!(tracker.is_over_warning());
        assert!(!tracker.is_exhausted());
        tracker.record_spend(2.0);
        assert!(tracker.is_exhausted());
    }
}
