//! Checkpoint Manager: point-in-time snapshots of git state and feature
//! progress, and first-class rollback to any prior snapshot.

use crate::error::{ForgeError, ForgeResult};
use crate::feature_store::FeatureStore;
use crate::git::GitRepo;
use crate::persistence::{Store, StoreError};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointTrigger {
    FeatureComplete,
    BeforeRiskyOp,
    ErrorRecovery,
    HumanRequest,
    SessionStart,
    SessionEnd,
    Manual,
}

impl CheckpointTrigger {
    fn as_str(&self) -> &'static str {
        match self {
            Self::FeatureComplete => "feature_complete",
            Self::BeforeRiskyOp => "before_risky_op",
            Self::ErrorRecovery => "error_recovery",
            Self::HumanRequest => "human_request",
            Self::SessionStart => "session_start",
            Self::SessionEnd => "session_end",
            Self::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub seq: u64,
    pub timestamp: String,
    pub trigger: String,
    pub session_id: String,
    pub git_commit: String,
    pub git_branch: String,
    pub git_clean: bool,
    /// Snapshot of every feature's pass/fail state at capture time, keyed by
    /// index. What `rollback_to` restores the Feature Store to.
    pub feature_status: BTreeMap<u32, bool>,
    pub features_passing: u32,
    pub features_total: u32,
    pub files_hash: String,
    pub last_successful_feature: Option<u32>,
    pub pending_work: Vec<String>,
    pub metadata: serde_json::Value,
    pub human_note: Option<String>,
}

/// Outcome of a rollback: what actually happened, not just the checkpoint
/// rolled back to. The safety checkpoint taken beforehand is never deleted,
/// so a bad rollback is itself recoverable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackResult {
    pub success: bool,
    pub git_reset: bool,
    pub features_restored: u32,
    pub files_affected: u32,
    pub message: String,
}

pub struct CheckpointManager {
    store: Store,
    features: FeatureStore,
    git: GitRepo,
}

impl CheckpointManager {
    pub fn new(store: Store, features: FeatureStore, working_dir: impl AsRef<std::path::Path>) -> Self {
        Self {
            store,
            features,
            git: GitRepo::new(working_dir, "[checkpoint]"),
        }
    }

    pub async fn capture(
        &self,
        session_id: &str,
        trigger: CheckpointTrigger,
        human_note: Option<String>,
    ) -> ForgeResult<Checkpoint> {
        let label = format!("session {session_id} ({})", trigger.as_str());
        let git_commit = self.git.create_checkpoint_commit(&label)?;
        let git_branch = self.git.current_branch()?;
        let git_clean = !self.git.has_uncommitted_changes()?;
        let files_hash = self.git.tracked_files_hash()?;

        let all_features = self.features.all().await?;
        let feature_status: BTreeMap<u32, bool> =
            all_features.iter().map(|f| (f.index, f.passes)).collect();
        let last_successful_feature = all_features.iter().filter(|f| f.passes).map(|f| f.index).max();
        let stats = self.features.stats().await?;

        let seq = self.store.next_seq("CP").await?;
        let checkpoint_id = format!("CP-{session_id}-{seq}");
        let timestamp = chrono::Utc::now().to_rfc3339();

        let checkpoint = Checkpoint {
            checkpoint_id: checkpoint_id.clone(),
            seq,
            timestamp: timestamp.clone(),
            trigger: trigger.as_str().to_string(),
            session_id: session_id.to_string(),
            git_commit,
            git_branch,
            git_clean,
            feature_status,
            features_passing: stats.passing,
            features_total: stats.total,
            files_hash,
            last_successful_feature,
            pending_work: Vec::new(),
            metadata: serde_json::json!({}),
            human_note,
        };

        let c = checkpoint.clone();
        let feature_status_json = serde_json::to_string(&c.feature_status)?;
        let pending_work_json = serde_json::to_string(&c.pending_work)?;
        let metadata_json = serde_json::to_string(&c.metadata)?;
        self.store
            .write(move |conn| {
                conn.execute(
                    "INSERT INTO checkpoints (checkpoint_id, seq, timestamp, trigger, session_id, git_commit, git_branch, git_clean, feature_status, features_passing, features_total, files_hash, last_successful_feature, pending_work, metadata, human_note)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                    params![
                        c.checkpoint_id, c.seq as i64, c.timestamp, c.trigger, c.session_id,
                        c.git_commit, c.git_branch, c.git_clean as i64, feature_status_json,
                        c.features_passing as i64, c.features_total as i64, c.files_hash,
                        c.last_successful_feature.map(|i| i as i64), pending_work_json, metadata_json,
                        c.human_note,
                    ],
                )
                .map_err(StoreError::from)?;
                Ok(())
            })
            .await?;

        Ok(checkpoint)
    }

    fn row_to_checkpoint(row: &rusqlite::Row) -> rusqlite::Result<Checkpoint> {
        let feature_status_json: String = row.get(8)?;
        let pending_work_json: String = row.get(13)?;
        let metadata_json: String = row.get(14)?;
        Ok(Checkpoint {
            checkpoint_id: row.get(0)?,
            seq: row.get::<_, i64>(1)? as u64,
            timestamp: row.get(2)?,
            trigger: row.get(3)?,
            session_id: row.get(4)?,
            git_commit: row.get(5)?,
            git_branch: row.get(6)?,
            git_clean: row.get::<_, i64>(7)? != 0,
            feature_status: serde_json::from_str(&feature_status_json).unwrap_or_default(),
            features_passing: row.get::<_, i64>(9)? as u32,
            features_total: row.get::<_, i64>(10)? as u32,
            files_hash: row.get(11)?,
            last_successful_feature: row.get::<_, Option<i64>>(12)?.map(|v| v as u32),
            pending_work: serde_json::from_str(&pending_work_json).unwrap_or_default(),
            metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({})),
            human_note: row.get(15)?,
        })
    }

    const SELECT_COLUMNS: &'static str = "checkpoint_id, seq, timestamp, trigger, session_id, git_commit, git_branch, git_clean, feature_status, features_passing, features_total, files_hash, last_successful_feature, pending_work, metadata, human_note";

    pub async fn get(&self, checkpoint_id: &str) -> ForgeResult<Checkpoint> {
        let id = checkpoint_id.to_string();
        self.store
            .read(move |conn| {
                let sql = format!("SELECT {} FROM checkpoints WHERE checkpoint_id = ?1", Self::SELECT_COLUMNS);
                conn.query_row(&sql, [&id], Self::row_to_checkpoint)
                    .map_err(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                        other => StoreError::from(other),
                    })
            })
            .await
            .map_err(|e| match e {
                StoreError::NotFound => ForgeError::CheckpointNotFound {
                    id: checkpoint_id.to_string(),
                },
                other => ForgeError::Store(other),
            })
    }

    pub async fn list_recent(&self, limit: u32) -> ForgeResult<Vec<Checkpoint>> {
        let rows = self
            .store
            .read(move |conn| {
                let sql = format!(
                    "SELECT {} FROM checkpoints ORDER BY seq DESC LIMIT ?1",
                    Self::SELECT_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([limit], Self::row_to_checkpoint)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    /// Roll the working tree back to the commit recorded in `checkpoint_id`.
    /// First-class operation, not a recovery-only code path: reachable from
    /// the CLI directly as well as from stall recovery.
    ///
    /// Four steps: capture a safety checkpoint of current state (so the
    /// rollback itself is reversible), hard-reset the working tree, restore
    /// every feature's pass/fail state from the snapshot, and report what
    /// happened.
    pub async fn rollback_to(&self, session_id: &str, checkpoint_id: &str) -> ForgeResult<RollbackResult> {
        let checkpoint = self.get(checkpoint_id).await?;

        let safety = self
            .capture(
                session_id,
                CheckpointTrigger::BeforeRiskyOp,
                Some(format!("safety checkpoint before rollback to {checkpoint_id}")),
            )
            .await?;

        let files_affected = self
            .git
            .diff_file_count(&checkpoint.git_commit, &safety.git_commit)
            .unwrap_or(0);

        self.git.rollback_hard(&checkpoint.git_commit)?;

        let mut features_restored = 0u32;
        for (&index, &passes) in &checkpoint.feature_status {
            if self.features.mark(index, passes, None).await.is_ok() {
                features_restored += 1;
            }
        }

        Ok(RollbackResult {
            success: true,
            git_reset: true,
            features_restored,
            files_affected,
            message: format!(
                "rolled back to {} ({}); safety checkpoint {} preserves the discarded state",
                checkpoint.checkpoint_id, checkpoint.git_commit, safety.checkpoint_id
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    async fn setup() -> (tempfile::TempDir, CheckpointManager) {
        let dir = tempfile::tempdir().unwrap();
        for args in [
            vec!["init"],
            vec!["config", "user.email", "test@test.com"],
            vec!["config", "user.name", "Test"],
        ] {
            Command::new("git").args(&args).current_dir(dir.path()).output().unwrap();
        }
        std::fs::write(dir.path().join("README.md"), "hi").unwrap();
        Command::new("git").args(["add", "."]).current_dir(dir.path()).output().unwrap();
        Command::new("git").args(["commit", "-m", "init"]).current_dir(dir.path()).output().unwrap();

        let store = Store::open(dir.path().join(".arcadia/project.db")).await.unwrap();
        let features = FeatureStore::new(store.clone());
        let manager = CheckpointManager::new(store, features, dir.path());
        (dir, manager)
    }

    #[tokio::test]
    async fn capture_and_get_round_trips() {
        let (dir, manager) = setup().await;
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        let cp = manager.capture("s-1", CheckpointTrigger::FeatureComplete, None).await.unwrap();
        let loaded = manager.get(&cp.checkpoint_id).await.unwrap();
        assert_eq!(loaded.git_commit, cp.git_commit);
        assert!(cp.checkpoint_id.starts_with("CP-s-1-"));
    }

    #[tokio::test]
    async fn capture_snapshots_feature_status() {
        let (_dir, manager) = setup().await;
        let features = FeatureStore::new(manager.store.clone());
        features.add(1, "core".into(), "a".into(), vec![], crate::feature_store::Priority::Normal, vec![]).await.unwrap();
        features.mark(1, true, None).await.unwrap();

        let cp = manager.capture("s-1", CheckpointTrigger::FeatureComplete, None).await.unwrap();
        assert_eq!(cp.feature_status.get(&1), Some(&true));
        assert_eq!(cp.last_successful_feature, Some(1));
    }

    #[tokio::test]
    async fn rollback_restores_tree_and_feature_status() {
        let (dir, manager) = setup().await;
        let features = FeatureStore::new(manager.store.clone());
        features.add(1, "core".into(), "a".into(), vec![], crate::feature_store::Priority::Normal, vec![]).await.unwrap();

        let cp0 = manager.capture("s-1", CheckpointTrigger::Manual, None).await.unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        features.mark(1, true, None).await.unwrap();
        manager.capture("s-1", CheckpointTrigger::FeatureComplete, None).await.unwrap();
        assert!(dir.path().join("a.txt").exists());

        let result = manager.rollback_to("s-1", &cp0.checkpoint_id).await.unwrap();
        assert!(result.success);
        assert!(result.git_reset);
        assert_eq!(result.features_restored, 1);
        assert!(!dir.path().join("a.txt").exists());
        assert!(!features.load(1).await.unwrap().passes);
    }

    #[tokio::test]
    async fn rollback_leaves_a_safety_checkpoint() {
        let (dir, manager) = setup().await;
        let cp0 = manager.capture("s-1", CheckpointTrigger::Manual, None).await.unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        manager.capture("s-1", CheckpointTrigger::FeatureComplete, None).await.unwrap();

        manager.rollback_to("s-1", &cp0.checkpoint_id).await.unwrap();
        let recent = manager.list_recent(10).await.unwrap();
        assert!(recent.iter().any(|c| c.trigger == "before_risky_op"));
    }

    #[tokio::test]
    async fn get_unknown_checkpoint_is_structured_error() {
        let (_dir, manager) = setup().await;
        let err = manager.get("CP-999").await.unwrap_err();
        assert!(matches!(err, ForgeError::CheckpointNotFound { .. }));
    }
}
