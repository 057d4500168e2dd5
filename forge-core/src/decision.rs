//! Decision Logger: an append-only record of choices the orchestrator made,
//! with their rationale, and an at-most-once outcome update once the result
//! is known.

use crate::error::{ForgeError, ForgeResult};
use crate::persistence::{Store, StoreError};
use rusqlite::params;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub decision_id: String,
    pub seq: u64,
    pub timestamp: String,
    pub session_id: String,
    pub kind: String,
    pub context: String,
    pub choice: String,
    pub alternatives: Vec<String>,
    pub rationale: String,
    pub confidence: f64,
    pub outcome: Option<String>,
    pub outcome_success: Option<bool>,
}

pub struct DecisionLogger {
    store: Store,
}

impl DecisionLogger {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn record(
        &self,
        session_id: &str,
        kind: &str,
        context: &str,
        choice: &str,
        alternatives: Vec<String>,
        rationale: &str,
        confidence: f64,
    ) -> ForgeResult<Decision> {
        let seq = self.store.next_seq("D").await?;
        let decision_id = format!("D-{seq}");
        let timestamp = chrono::Utc::now().to_rfc3339();
        let alternatives_json = serde_json::to_string(&alternatives)?;

        let (id, sess, kind_s, ctx, choice_s, alt_json, rationale_s, ts) = (
            decision_id.clone(),
            session_id.to_string(),
            kind.to_string(),
            context.to_string(),
            choice.to_string(),
            alternatives_json,
            rationale.to_string(),
            timestamp.clone(),
        );
        self.store
            .write(move |conn| {
                conn.execute(
                    "INSERT INTO decisions (decision_id, seq, timestamp, session_id, type, context, choice, alternatives, rationale, confidence)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![id, seq as i64, ts, sess, kind_s, ctx, choice_s, alt_json, rationale_s, confidence],
                )
                .map_err(StoreError::from)?;
                Ok(())
            })
            .await?;

        Ok(Decision {
            decision_id,
            seq,
            timestamp,
            session_id: session_id.to_string(),
            kind: kind.to_string(),
            context: context.to_string(),
            choice: choice.to_string(),
            alternatives,
            rationale: rationale.to_string(),
            confidence,
            outcome: None,
            outcome_success: None,
        })
    }

    /// Record the outcome of a previously logged decision. Fails if an
    /// outcome was already recorded: outcomes are write-once.
    pub async fn update_outcome(
        &self,
        decision_id: &str,
        outcome: &str,
        success: bool,
    ) -> ForgeResult<()> {
        let id = decision_id.to_string();
        let already_set: bool = self
            .store
            .read({
                let id = id.clone();
                move |conn| {
                    conn.query_row(
                        "SELECT outcome IS NOT NULL FROM decisions WHERE decision_id = ?1",
                        [&id],
                        |r| r.get(0),
                    )
                    .map_err(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                        other => StoreError::from(other),
                    })
                }
            })
            .await
            .map_err(|e| match e {
                StoreError::NotFound => ForgeError::DecisionNotFound {
                    id: decision_id.to_string(),
                },
                other => ForgeError::Store(other),
            })?;

        if already_set {
            return Err(ForgeError::OutcomeAlreadyRecorded {
                id: decision_id.to_string(),
            });
        }

        let outcome_ts = chrono::Utc::now().to_rfc3339();
        let (outcome_s, id2) = (outcome.to_string(), id);
        self.store
            .write(move |conn| {
                conn.execute(
                    "UPDATE decisions SET outcome = ?1, outcome_success = ?2, outcome_timestamp = ?3 WHERE decision_id = ?4",
                    params![outcome_s, success as i64, outcome_ts, id2],
                )
                .map_err(StoreError::from)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn for_session(&self, session_id: &str) -> ForgeResult<Vec<Decision>> {
        let sid = session_id.to_string();
        let rows = self
            .store
            .read(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT decision_id, seq, timestamp, session_id, type, context, choice, alternatives, rationale, confidence, outcome, outcome_success
                     FROM decisions WHERE session_id = ?1 ORDER BY seq",
                )?;
                let rows = stmt
                    .query_map([&sid], |row| {
                        let alt_json: String = row.get(7)?;
                        Ok(Decision {
                            decision_id: row.get(0)?,
                            seq: row.get::<_, i64>(1)? as u64,
                            timestamp: row.get(2)?,
                            session_id: row.get(3)?,
                            kind: row.get(4)?,
                            context: row.get(5)?,
                            choice: row.get(6)?,
                            alternatives: serde_json::from_str(&alt_json).unwrap_or_default(),
                            rationale: row.get(8)?,
                            confidence: row.get(9)?,
                            outcome: row.get(10)?,
                            outcome_success: row.get::<_, Option<i64>>(11)?.map(|v| v != 0),
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

    async fn logger() -> DecisionLogger {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("p.db")).await.unwrap();
        DecisionLogger::new(store)
    }

    #[tokio::test]
    async fn record_and_query_round_trips() {
        let log = logger().await;
        let d = log
            .record("s-1", "approach", "ctx", "use X", vec!["use Y".into()], "X is simpler", 0.8)
            .await
            .unwrap();
        let all = log.for_session("s-1").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].decision_id, d.decision_id);
    }

    #[tokio::test]
    async fn outcome_is_write_once() {
        let log = logger().await;
        let d = log.record("s-1", "approach", "ctx", "x", vec![], "r", 0.5).await.unwrap();
        log.update_outcome(&d.decision_id, "worked", true).await.unwrap();
        let err = log.update_outcome(&d.decision_id, "worked again", true).await.unwrap_err();
        assert!(matches!(err, ForgeError::OutcomeAlreadyRecorded { .. }));
    }
}
