//! Artifact Store: content-addressed storage for files a session wants to
//! preserve (diffs, logs, generated reports) outside of git history.
//!
//! Artifacts are copied into `.arcadia/artifacts/<sha256>` and recorded in
//! the `artifacts` table; the content hash is the addressing key, so storing
//! the same bytes twice is a cheap no-op on the filesystem.

use crate::error::{ForgeError, ForgeResult};
use crate::persistence::{Store, StoreError};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub artifact_id: String,
    pub kind: String,
    pub session_id: String,
    pub feature_index: Option<u32>,
    pub stored_path: String,
    pub checksum: String,
    pub size_bytes: u64,
    pub description: Option<String>,
    pub created_at: String,
}

pub struct ArtifactStore {
    store: Store,
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(store: Store, arcadia_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            root: arcadia_dir.into().join("artifacts"),
        }
    }

    /// Copy `source` into the content-addressed store and record it.
    /// Returns the new artifact's id (`ART-<seq>`).
    pub async fn put(
        &self,
        source: &Path,
        kind: &str,
        session_id: &str,
        feature_index: Option<u32>,
        description: Option<String>,
    ) -> ForgeResult<Artifact> {
        if !source.exists() {
            return Err(ForgeError::ArtifactSourceMissing {
                path: source.display().to_string(),
            });
        }
        let bytes = std::fs::read(source)?;
        let checksum = checksum_hex(&bytes);
        std::fs::create_dir_all(&self.root)?;
        let stored_path = self.root.join(&checksum);
        if !stored_path.exists() {
            std::fs::write(&stored_path, &bytes)?;
        }

        let seq = self.store.next_seq("ART").await?;
        let artifact_id = format!("ART-{seq}");
        let created_at = chrono::Utc::now().to_rfc3339();
        let size_bytes = bytes.len() as u64;
        let stored_path_str = stored_path.display().to_string();

        let (id, kind, session_id, stored_path_str, checksum, description, created_at) = (
            artifact_id.clone(),
            kind.to_string(),
            session_id.to_string(),
            stored_path_str,
            checksum.clone(),
            description.clone(),
            created_at.clone(),
        );
        let db_kind = kind.clone();
        let db_session_id = session_id.clone();
        let db_checksum = checksum.clone();
        let db_description = description.clone();
        let db_created_at = created_at.clone();
        self.store
            .write(move |conn| {
                conn.execute(
                    "INSERT INTO artifacts (artifact_id, seq, type, session_id, feature_index, stored_path, checksum, size_bytes, description, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![id, seq as i64, db_kind, db_session_id, feature_index, stored_path_str, db_checksum, size_bytes as i64, db_description, db_created_at],
                )
                .map_err(StoreError::from)?;
                Ok(())
            })
            .await?;

        Ok(Artifact {
            artifact_id,
            kind,
            session_id,
            feature_index,
            stored_path: stored_path.display().to_string(),
            checksum,
            size_bytes,
            description,
            created_at,
        })
    }

    pub async fn get(&self, artifact_id: &str) -> ForgeResult<Artifact> {
        let id = artifact_id.to_string();
        self.store
            .read(move |conn| {
                conn.query_row(
                    "SELECT artifact_id, type, session_id, feature_index, stored_path, checksum, size_bytes, description, created_at
                     FROM artifacts WHERE artifact_id = ?1",
                    [&id],
                    |row| {
                        Ok(Artifact {
                            artifact_id: row.get(0)?,
                            kind: row.get(1)?,
                            session_id: row.get(2)?,
                            feature_index: row.get::<_, Option<i64>>(3)?.map(|v| v as u32),
                            stored_path: row.get(4)?,
                            checksum: row.get(5)?,
                            size_bytes: row.get::<_, i64>(6)? as u64,
                            description: row.get(7)?,
                            created_at: row.get(8)?,
                        })
                    },
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                    other => StoreError::from(other),
                })
            })
            .await
            .map_err(|e| match e {
                StoreError::NotFound => ForgeError::Validation {
                    message: format!("no such artifact: {artifact_id}"),
                },
                other => ForgeError::Store(other),
            })
    }

    /// Verify the stored bytes still match the recorded checksum.
    pub fn verify(&self, artifact: &Artifact) -> ForgeResult<bool> {
        let bytes = std::fs::read(&artifact.stored_path)?;
        Ok(checksum_hex(&bytes) == artifact.checksum)
    }
}

fn checksum_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_is_idempotent_for_identical_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join(".arcadia/project.db")).await.unwrap();
        let artifacts = ArtifactStore::new(store, dir.path().join(".arcadia"));

        let src = dir.path().join("diff.patch");
        std::fs::write(&src, b"diff --git a b\n").unwrap();

        let a1 = artifacts.put(&src, "diff", "s-1", None, None).await.unwrap();
        let a2 = artifacts.put(&src, "diff", "s-1", None, None).await.unwrap();
        assert_eq!(a1.checksum, a2.checksum);
        assert_ne!(a1.artifact_id, a2.artifact_id, "distinct records, shared bytes");
        assert!(artifacts.verify(&a1).unwrap());
    }

    #[tokio::test]
    async fn put_missing_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join(".arcadia/project.db")).await.unwrap();
        let artifacts = ArtifactStore::new(store, dir.path().join(".arcadia"));
        let err = artifacts
            .put(&dir.path().join("missing"), "diff", "s-1", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::ArtifactSourceMissing { .. }));
    }
}
