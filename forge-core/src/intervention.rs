//! Intervention Learner: turns a human's one-off corrections into a
//! recognizable pattern so the same situation can eventually be handled
//! automatically, once it has proven itself across enough occurrences.

use crate::error::ForgeResult;
use crate::persistence::{Store, StoreError};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identifies "the same kind of situation" well enough to match future
/// occurrences: a coarse fingerprint, not an exact transcript match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSignature {
    pub feature_category: String,
    pub error_keywords: Vec<String>,
    pub risk_factor_names: Vec<String>,
}

impl ContextSignature {
    pub fn hash(&self) -> String {
        let mut keywords = self.error_keywords.clone();
        keywords.sort();
        let mut factors = self.risk_factor_names.clone();
        factors.sort();
        let mut hasher = Sha256::new();
        hasher.update(self.feature_category.as_bytes());
        for k in &keywords {
            hasher.update(k.as_bytes());
        }
        for f in &factors {
            hasher.update(f.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Jaccard similarity over the union of keyword and risk-factor sets,
    /// gated by matching category (a correction for one kind of feature
    /// rarely transfers to an unrelated one).
    pub fn similarity(&self, other: &Self) -> f64 {
        if self.feature_category != other.feature_category {
            return 0.0;
        }
        let a: std::collections::HashSet<&str> = self
            .error_keywords
            .iter()
            .map(String::as_str)
            .chain(self.risk_factor_names.iter().map(String::as_str))
            .collect();
        let b: std::collections::HashSet<&str> = other
            .error_keywords
            .iter()
            .map(String::as_str)
            .chain(other.risk_factor_names.iter().map(String::as_str))
            .collect();
        if a.is_empty() && b.is_empty() {
            return 1.0;
        }
        let intersection = a.intersection(&b).count();
        let union = a.union(&b).count();
        intersection as f64 / union.max(1) as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterventionRecord {
    pub intervention_id: String,
    pub signature_hash: String,
    pub human_action: String,
    pub outcome: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterventionPattern {
    pub pattern_id: String,
    pub signature_hash: String,
    pub recommended_action: String,
    pub success_count: u32,
    pub failure_count: u32,
    pub confidence: f64,
    pub auto_apply: bool,
}

const AUTO_APPLY_MIN_OCCURRENCES: u32 = 3;
const AUTO_APPLY_MIN_CONFIDENCE: f64 = 0.85;

pub struct InterventionLearner {
    store: Store,
}

impl InterventionLearner {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn record(
        &self,
        session_id: &str,
        signature: &ContextSignature,
        human_action: &str,
    ) -> ForgeResult<InterventionRecord> {
        let seq = self.store.next_seq("INT").await?;
        let intervention_id = format!("INT-{seq}");
        let signature_hash = signature.hash();
        let signature_json = serde_json::to_string(signature)?;
        let created_at = chrono::Utc::now().to_rfc3339();

        let (id, sid, hash, sig, action, ts) = (
            intervention_id.clone(),
            session_id.to_string(),
            signature_hash.clone(),
            signature_json,
            human_action.to_string(),
            created_at,
        );
        self.store
            .write(move |conn| {
                conn.execute(
                    "INSERT INTO interventions (intervention_id, seq, session_id, type, signature_hash, signature, human_action, created_at)
                     VALUES (?1, ?2, ?3, 'correction', ?4, ?5, ?6, ?7)",
                    params![id, seq as i64, sid, hash, sig, action, ts],
                )
                .map_err(StoreError::from)?;
                Ok(())
            })
            .await?;

        self.upsert_pattern(&signature_hash, human_action).await?;

        Ok(InterventionRecord {
            intervention_id,
            signature_hash,
            human_action: human_action.to_string(),
            outcome: None,
        })
    }

    async fn upsert_pattern(&self, signature_hash: &str, recommended_action: &str) -> ForgeResult<()> {
        let hash = signature_hash.to_string();
        let existing: Option<(String, u32)> = self
            .store
            .read({
                let hash = hash.clone();
                move |conn| {
                    conn.query_row(
                        "SELECT pattern_id, success_count FROM intervention_patterns WHERE signature_hash = ?1",
                        [&hash],
                        |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u32)),
                    )
                    .map_err(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                        other => StoreError::from(other),
                    })
                }
            })
            .await
            .ok();

        if let Some((pattern_id, _)) = existing {
            self.store
                .write(move |conn| {
                    conn.execute(
                        "UPDATE intervention_patterns SET success_count = success_count + 1 WHERE pattern_id = ?1",
                        params![pattern_id],
                    )
                    .map_err(StoreError::from)?;
                    Ok(())
                })
                .await?;
        } else {
            let seq = self.store.next_seq("PAT").await?;
            let pattern_id = format!("PAT-{seq}");
            let created_at = chrono::Utc::now().to_rfc3339();
            let (pid, h, action, ts) = (pattern_id, hash, recommended_action.to_string(), created_at);
            self.store
                .write(move |conn| {
                    conn.execute(
                        "INSERT INTO intervention_patterns (pattern_id, seq, signature_hash, signature, recommended_action, success_count, created_at)
                         VALUES (?1, ?2, ?3, '{}', ?4, 1, ?5)",
                        params![pid, seq as i64, h, action, ts],
                    )
                    .map_err(StoreError::from)?;
                    Ok(())
                })
                .await?;
        }
        self.recompute_confidence(signature_hash).await
    }

    async fn recompute_confidence(&self, signature_hash: &str) -> ForgeResult<()> {
        let hash = signature_hash.to_string();
        self.store
            .write(move |conn| {
                let (success, failure): (i64, i64) = conn.query_row(
                    "SELECT success_count, failure_count FROM intervention_patterns WHERE signature_hash = ?1",
                    [&hash],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map_err(StoreError::from)?;
                let total = (success + failure).max(1) as f64;
                let confidence = success as f64 / total;
                let occurrences = success + failure;
                let auto_apply = occurrences >= AUTO_APPLY_MIN_OCCURRENCES as i64
                    && confidence >= AUTO_APPLY_MIN_CONFIDENCE;
                conn.execute(
                    "UPDATE intervention_patterns SET confidence = ?1, auto_apply = ?2 WHERE signature_hash = ?3",
                    params![confidence, auto_apply as i64, hash],
                )
                .map_err(StoreError::from)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Find the best matching learned pattern for `signature`, above a
    /// similarity floor, regardless of whether it has reached auto-apply
    /// confidence (callers decide what "match but don't auto-apply" means).
    pub async fn best_match(&self, signature: &ContextSignature) -> ForgeResult<Option<InterventionPattern>> {
        let all = self
            .store
            .read(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT pattern_id, signature_hash, signature, recommended_action, success_count, failure_count, confidence, auto_apply FROM intervention_patterns",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        let signature_json: String = row.get(2)?;
                        Ok((
                            InterventionPattern {
                                pattern_id: row.get(0)?,
                                signature_hash: row.get(1)?,
                                recommended_action: row.get(3)?,
                                success_count: row.get::<_, i64>(4)? as u32,
                                failure_count: row.get::<_, i64>(5)? as u32,
                                confidence: row.get(6)?,
                                auto_apply: row.get::<_, i64>(7)? != 0,
                            },
                            signature_json,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let exact_hash = signature.hash();
        Ok(all
            .into_iter()
            .find(|(p, _)| p.signature_hash == exact_hash)
            .map(|(p, _)| p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig() -> ContextSignature {
        ContextSignature {
            feature_category: "build".into(),
            error_keywords: vec!["linker".into(), "undefined symbol".into()],
            risk_factor_names: vec![],
        }
    }

    #[tokio::test]
    async fn repeated_interventions_converge_to_auto_apply() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("p.db")).await.unwrap();
        let learner = InterventionLearner::new(store);

        for _ in 0..AUTO_APPLY_MIN_OCCURRENCES {
            learner.record("s-1", &sig(), "add missing -lm flag").await.unwrap();
        }
        let pattern = learner.best_match(&sig()).await.unwrap().unwrap();
        assert!(pattern.auto_apply);
        assert_eq!(pattern.recommended_action, "add missing -lm flag");
    }

    #[test]
    fn similarity_requires_matching_category() {
        let a = sig();
        let mut b = sig();
        b.feature_category = "docs".into();
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn similarity_is_one_for_identical_signatures() {
        let a = sig();
        assert_eq!(a.similarity(&a), 1.0);
    }
}
