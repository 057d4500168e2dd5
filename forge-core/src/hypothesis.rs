//! Hypothesis Tracker: working theories about the codebase or a recurring
//! failure, carried across sessions with accumulating evidence until
//! confirmed, refuted, or superseded.

use crate::error::{ForgeError, ForgeResult};
use crate::persistence::{Store, StoreError};
use rusqlite::params;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HypothesisStatus {
    Open,
    Confirmed,
    Refuted,
    Superseded,
}

impl HypothesisStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Confirmed => "confirmed",
            Self::Refuted => "refuted",
            Self::Superseded => "superseded",
        }
    }
    fn is_terminal(&self) -> bool {
        !matches!(self, Self::Open)
    }
    fn parse(s: &str) -> Self {
        match s {
            "confirmed" => Self::Confirmed,
            "refuted" => Self::Refuted,
            "superseded" => Self::Superseded,
            _ => Self::Open,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hypothesis {
    pub hypothesis_id: String,
    pub seq: u64,
    pub created_at: String,
    pub statement: String,
    pub observation: String,
    pub confidence: f64,
    pub status: HypothesisStatus,
    pub evidence_for: Vec<String>,
    pub evidence_against: Vec<String>,
    pub review_count: u32,
}

impl Hypothesis {
    /// Confidence moves toward 1.0 with supporting evidence and toward 0.0
    /// with contradicting evidence, each item weighted equally.
    fn recompute_confidence(&mut self) {
        let total = self.evidence_for.len() + self.evidence_against.len();
        if total == 0 {
            return;
        }
        self.confidence = self.evidence_for.len() as f64 / total as f64;
    }
}

pub struct HypothesisTracker {
    store: Store,
}

impl HypothesisTracker {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn open(&self, statement: &str, observation: &str) -> ForgeResult<Hypothesis> {
        let seq = self.store.next_seq("HYP").await?;
        let hypothesis_id = format!("HYP-{seq}");
        let created_at = chrono::Utc::now().to_rfc3339();

        let (id, stmt, obs, ts) = (
            hypothesis_id.clone(),
            statement.to_string(),
            observation.to_string(),
            created_at.clone(),
        );
        self.store
            .write(move |conn| {
                conn.execute(
                    "INSERT INTO hypotheses (hypothesis_id, seq, created_at, created_session, type, observation, hypothesis, confidence, status)
                     VALUES (?1, ?2, ?3, '', 'general', ?4, ?5, 0.5, 'open')",
                    params![id, seq as i64, ts, obs, stmt],
                )
                .map_err(StoreError::from)?;
                Ok(())
            })
            .await?;

        Ok(Hypothesis {
            hypothesis_id,
            seq,
            created_at,
            statement: statement.to_string(),
            observation: observation.to_string(),
            confidence: 0.5,
            status: HypothesisStatus::Open,
            evidence_for: vec![],
            evidence_against: vec![],
            review_count: 0,
        })
    }

    pub async fn get(&self, id: &str) -> ForgeResult<Hypothesis> {
        let hid = id.to_string();
        self.store
            .read(move |conn| {
                conn.query_row(
                    "SELECT hypothesis_id, seq, created_at, observation, hypothesis, confidence, status, evidence_for, evidence_against, review_count
                     FROM hypotheses WHERE hypothesis_id = ?1",
                    [&hid],
                    |row| {
                        let ef: String = row.get(7)?;
                        let ea: String = row.get(8)?;
                        let status: String = row.get(6)?;
                        Ok(Hypothesis {
                            hypothesis_id: row.get(0)?,
                            seq: row.get::<_, i64>(1)? as u64,
                            created_at: row.get(2)?,
                            observation: row.get(3)?,
                            statement: row.get(4)?,
                            confidence: row.get(5)?,
                            status: HypothesisStatus::parse(&status),
                            evidence_for: serde_json::from_str(&ef).unwrap_or_default(),
                            evidence_against: serde_json::from_str(&ea).unwrap_or_default(),
                            review_count: row.get::<_, i64>(9)? as u32,
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
                StoreError::NotFound => ForgeError::HypothesisNotFound { id: id.to_string() },
                other => ForgeError::Store(other),
            })
    }

    pub async fn add_evidence(&self, id: &str, note: &str, supports: bool) -> ForgeResult<Hypothesis> {
        let mut h = self.get(id).await?;
        if h.status.is_terminal() {
            return Err(ForgeError::HypothesisAlreadyResolved { id: id.to_string() });
        }
        if supports {
            h.evidence_for.push(note.to_string());
        } else {
            h.evidence_against.push(note.to_string());
        }
        h.review_count += 1;
        h.recompute_confidence();
        self.persist(&h).await?;
        Ok(h)
    }

    pub async fn resolve(&self, id: &str, status: HypothesisStatus) -> ForgeResult<Hypothesis> {
        let mut h = self.get(id).await?;
        if h.status.is_terminal() {
            return Err(ForgeError::HypothesisAlreadyResolved { id: id.to_string() });
        }
        h.status = status;
        self.persist(&h).await?;
        Ok(h)
    }

    async fn persist(&self, h: &Hypothesis) -> ForgeResult<()> {
        let ef = serde_json::to_string(&h.evidence_for)?;
        let ea = serde_json::to_string(&h.evidence_against)?;
        let (id, confidence, status, review_count) =
            (h.hypothesis_id.clone(), h.confidence, h.status.as_str(), h.review_count);
        self.store
            .write(move |conn| {
                conn.execute(
                    "UPDATE hypotheses SET confidence = ?1, status = ?2, evidence_for = ?3, evidence_against = ?4, review_count = ?5 WHERE hypothesis_id = ?6",
                    params![confidence, status, ef, ea, review_count as i64, id],
                )
                .map_err(StoreError::from)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn open_hypotheses(&self) -> ForgeResult<Vec<Hypothesis>> {
        let rows = self
            .store
            .read(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT hypothesis_id, seq, created_at, observation, hypothesis, confidence, status, evidence_for, evidence_against, review_count
                     FROM hypotheses WHERE status = 'open' ORDER BY seq",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        let ef: String = row.get(7)?;
                        let ea: String = row.get(8)?;
                        Ok(Hypothesis {
                            hypothesis_id: row.get(0)?,
                            seq: row.get::<_, i64>(1)? as u64,
                            created_at: row.get(2)?,
                            observation: row.get(3)?,
                            statement: row.get(4)?,
                            confidence: row.get(5)?,
                            status: HypothesisStatus::Open,
                            evidence_for: serde_json::from_str(&ef).unwrap_or_default(),
                            evidence_against: serde_json::from_str(&ea).unwrap_or_default(),
                            review_count: row.get::<_, i64>(9)? as u32,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn tracker() -> HypothesisTracker {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("p.db")).await.unwrap();
        HypothesisTracker::new(store)
    }

    #[tokio::test]
    async fn evidence_moves_confidence() {
        let t = tracker().await;
        let h = t.open("the flaky test is a race", "fails under load").await.unwrap();
        assert_eq!(h.confidence, 0.5);

        let h = t.add_evidence(&h.hypothesis_id, "reproduced under -j1 vs not", true).await.unwrap();
        assert_eq!(h.confidence, 1.0);

        let h = t.add_evidence(&h.hypothesis_id, "also fails single-threaded", false).await.unwrap();
        assert_eq!(h.confidence, 0.5);
    }

    #[tokio::test]
    async fn resolved_hypothesis_rejects_further_evidence() {
        let t = tracker().await;
        let h = t.open("a", "b").await.unwrap();
        t.resolve(&h.hypothesis_id, HypothesisStatus::Confirmed).await.unwrap();
        let err = t.add_evidence(&h.hypothesis_id, "late", true).await.unwrap_err();
        assert!(matches!(err, ForgeError::HypothesisAlreadyResolved { .. }));
    }
}
