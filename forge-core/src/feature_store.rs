//! Feature Store: the canonical list of work items, their dependency graph,
//! and attempt history.

use crate::error::{ForgeError, ForgeResult};
use crate::persistence::{Store, StoreError};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

impl Priority {
    fn from_i64(v: i64) -> Self {
        match v {
            0 => Priority::Critical,
            1 => Priority::High,
            3 => Priority::Low,
            _ => Priority::Normal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    pub index: u32,
    pub category: String,
    pub description: String,
    pub steps: Vec<String>,
    pub passes: bool,
    pub audit_status: Option<String>,
    pub priority: Priority,
    pub failure_count: u32,
    pub last_worked: Option<String>,
    pub blocked_by: Vec<u32>,
    pub metadata: serde_json::Value,
}

/// Tie-break epsilon for salience comparisons; scores within this distance
/// are treated as equal and broken by feature index.
const SALIENCE_EPSILON: f64 = 1e-9;

/// What a session is currently paying attention to, used to weight feature
/// selection beyond plain priority order.
#[derive(Debug, Clone, Default)]
pub struct SalienceContext {
    pub focus_keywords: Vec<String>,
    pub related_features: Vec<u32>,
    pub failure_threshold: u32,
}

impl Feature {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let steps_json: String = row.get("steps")?;
        let blocked_by_json: String = row.get("blocked_by")?;
        let metadata_json: String = row.get("metadata")?;
        let priority: i64 = row.get("priority")?;
        Ok(Feature {
            index: row.get::<_, i64>("idx")? as u32,
            category: row.get("category")?,
            description: row.get("description")?,
            steps: serde_json::from_str(&steps_json).unwrap_or_default(),
            passes: row.get::<_, i64>("passes")? != 0,
            audit_status: row.get("audit_status")?,
            priority: Priority::from_i64(priority),
            failure_count: row.get::<_, i64>("failure_count")? as u32,
            last_worked: row.get("last_worked")?,
            blocked_by: serde_json::from_str(&blocked_by_json).unwrap_or_default(),
            metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({})),
        })
    }

    /// Score used to rank ready features beyond raw priority: rewards
    /// untouched and contextually relevant work, penalizes features that
    /// keep failing or that were just worked on.
    fn salience(&self, ctx: &SalienceContext, now: chrono::DateTime<chrono::Utc>) -> f64 {
        let mut score = (3 - self.priority as i32) as f64 * 10.0;

        score += match &self.last_worked {
            None => 50.0,
            Some(ts) => match chrono::DateTime::parse_from_rfc3339(ts) {
                Ok(worked_at) => {
                    let hours_since =
                        (now - worked_at.with_timezone(&chrono::Utc)).num_minutes() as f64 / 60.0;
                    -hours_since.max(0.0)
                }
                Err(_) => 0.0,
            },
        };

        if ctx.failure_threshold > 0 && self.failure_count >= ctx.failure_threshold {
            score -= (self.failure_count - ctx.failure_threshold + 1) as f64 * 5.0;
        }

        let haystack = format!("{} {}", self.category, self.description).to_lowercase();
        let overlap = ctx
            .focus_keywords
            .iter()
            .filter(|kw| haystack.contains(&kw.to_lowercase()))
            .count();
        score += overlap as f64 * 8.0;

        if ctx.related_features.contains(&self.index) {
            score += 15.0;
        }

        score -= self.blocked_by.len() as f64;
        score
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct FeatureStats {
    pub total: u32,
    pub passing: u32,
    pub blocked: u32,
    pub ready: u32,
}

/// Handle onto the `features` table. Holds no in-memory copy of the graph;
/// every call round-trips through the [`Store`] so multiple sessions stay
/// consistent.
pub struct FeatureStore {
    store: Store,
}

impl FeatureStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn add(
        &self,
        index: u32,
        category: String,
        description: String,
        steps: Vec<String>,
        priority: Priority,
        blocked_by: Vec<u32>,
    ) -> ForgeResult<()> {
        self.validate_dependencies(index, &blocked_by).await?;
        let steps_json = serde_json::to_string(&steps)?;
        let blocked_json = serde_json::to_string(&blocked_by)?;
        self.store
            .write(move |conn| {
                conn.execute(
                    "INSERT INTO features (idx, category, description, steps, passes, priority, failure_count, blocked_by, metadata)
                     VALUES (?1, ?2, ?3, ?4, 0, ?5, 0, ?6, '{}')",
                    params![index, category, description, steps_json, priority as i64, blocked_json],
                )
                .map_err(StoreError::from)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn load(&self, index: u32) -> ForgeResult<Feature> {
        self.store
            .read(move |conn| {
                conn.query_row(
                    "SELECT * FROM features WHERE idx = ?1",
                    [index],
                    Feature::from_row,
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                    other => StoreError::from(other),
                })
            })
            .await
            .map_err(|e| match e {
                StoreError::NotFound => ForgeError::FeatureNotFound { index },
                other => ForgeError::Store(other),
            })
    }

    pub async fn all(&self) -> ForgeResult<Vec<Feature>> {
        let features = self
            .store
            .read(|conn| {
                let mut stmt = conn.prepare("SELECT * FROM features ORDER BY idx")?;
                let rows = stmt
                    .query_map([], Feature::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(features)
    }

    /// The highest-priority feature with satisfied dependencies that is not
    /// already passing, preferring lower index on ties (insertion order).
    pub async fn next_ready(&self) -> ForgeResult<Option<Feature>> {
        let all = self.all().await?;
        let passing: HashSet<u32> = all.iter().filter(|f| f.passes).map(|f| f.index).collect();
        let mut candidates: Vec<&Feature> = all
            .iter()
            .filter(|f| !f.passes && f.blocked_by.iter().all(|b| passing.contains(b)))
            .collect();
        candidates.sort_by_key(|f| (f.priority as i32, f.index));
        Ok(candidates.first().map(|f| (*f).clone()))
    }

    /// Ready features ranked by [`Feature::salience`] against `ctx`, highest
    /// first, with a deterministic lower-index tie-break so two equally
    /// salient features never pick differently between runs.
    pub async fn next_by_salience(&self, ctx: &SalienceContext) -> ForgeResult<Option<Feature>> {
        let now = chrono::Utc::now();
        let all = self.all().await?;
        let passing: HashSet<u32> = all.iter().filter(|f| f.passes).map(|f| f.index).collect();
        let mut candidates: Vec<&Feature> = all
            .iter()
            .filter(|f| !f.passes && f.blocked_by.iter().all(|b| passing.contains(b)))
            .collect();
        candidates.sort_by(|a, b| {
            let sa = a.salience(ctx, now);
            let sb = b.salience(ctx, now);
            if (sa - sb).abs() < SALIENCE_EPSILON {
                a.index.cmp(&b.index)
            } else {
                sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
            }
        });
        Ok(candidates.first().map(|f| (*f).clone()))
    }

    pub async fn mark(&self, index: u32, passes: bool, audit_status: Option<String>) -> ForgeResult<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let changed = self
            .store
            .write(move |conn| {
                let n = conn
                    .execute(
                        "UPDATE features SET passes = ?1, audit_status = ?2, last_worked = ?3 WHERE idx = ?4",
                        params![passes as i64, audit_status, now, index],
                    )
                    .map_err(StoreError::from)?;
                Ok(n)
            })
            .await?;
        if changed == 0 {
            return Err(ForgeError::FeatureNotFound { index });
        }
        Ok(())
    }

    pub async fn record_attempt(&self, index: u32, succeeded: bool) -> ForgeResult<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let changed = self
            .store
            .write(move |conn| {
                let n = if succeeded {
                    conn.execute(
                        "UPDATE features SET failure_count = 0, last_worked = ?1 WHERE idx = ?2",
                        params![now, index],
                    )
                } else {
                    conn.execute(
                        "UPDATE features SET failure_count = failure_count + 1, last_worked = ?1 WHERE idx = ?2",
                        params![now, index],
                    )
                }
                .map_err(StoreError::from)?;
                Ok(n)
            })
            .await?;
        if changed == 0 {
            return Err(ForgeError::FeatureNotFound { index });
        }
        Ok(())
    }

    pub async fn add_dependency(&self, index: u32, depends_on: u32) -> ForgeResult<()> {
        self.validate_dependencies(index, &[depends_on]).await?;
        let feature = self.load(index).await?;
        let mut blocked_by = feature.blocked_by;
        if !blocked_by.contains(&depends_on) {
            blocked_by.push(depends_on);
        }
        let blocked_json = serde_json::to_string(&blocked_by)?;
        self.store
            .write(move |conn| {
                conn.execute(
                    "UPDATE features SET blocked_by = ?1 WHERE idx = ?2",
                    params![blocked_json, index],
                )
                .map_err(StoreError::from)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Reject a dependency edge that would create a cycle. Performs a BFS
    /// from `depends_on` through existing `blocked_by` edges looking for a
    /// path back to `index`.
    async fn validate_dependencies(&self, index: u32, new_deps: &[u32]) -> ForgeResult<()> {
        if new_deps.contains(&index) {
            return Err(ForgeError::DependencyCycle {
                from: index,
                to: index,
                path: vec![index],
            });
        }
        let all = self.all().await.unwrap_or_default();
        let edges: std::collections::HashMap<u32, Vec<u32>> = all
            .into_iter()
            .map(|f| (f.index, f.blocked_by))
            .collect();

        for &dep in new_deps {
            let mut queue = VecDeque::new();
            let mut visited = HashSet::new();
            queue.push_back(vec![dep]);
            visited.insert(dep);
            while let Some(path) = queue.pop_front() {
                let head = *path.last().unwrap();
                if head == index {
                    return Err(ForgeError::DependencyCycle {
                        from: index,
                        to: dep,
                        path,
                    });
                }
                if let Some(next) = edges.get(&head) {
                    for &n in next {
                        if visited.insert(n) {
                            let mut p = path.clone();
                            p.push(n);
                            queue.push_back(p);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub async fn search(&self, keyword: &str) -> ForgeResult<Vec<Feature>> {
        let all = self.all().await?;
        let needle = keyword.to_lowercase();
        Ok(all
            .into_iter()
            .filter(|f| {
                f.description.to_lowercase().contains(&needle)
                    || f.category.to_lowercase().contains(&needle)
            })
            .collect())
    }

    pub async fn stats(&self) -> ForgeResult<FeatureStats> {
        let all = self.all().await?;
        let passing: HashSet<u32> = all.iter().filter(|f| f.passes).map(|f| f.index).collect();
        let mut stats = FeatureStats {
            total: all.len() as u32,
            ..Default::default()
        };
        for f in &all {
            if f.passes {
                stats.passing += 1;
            } else if f.blocked_by.iter().all(|b| passing.contains(b)) {
                stats.ready += 1;
            } else {
                stats.blocked += 1;
            }
        }
        Ok(stats)
    }

    /// Validate the whole graph is acyclic and every `blocked_by` reference
    /// resolves to a real feature. Used at startup and by the CLI.
    pub async fn validate(&self) -> ForgeResult<()> {
        let all = self.all().await?;
        let indices: HashSet<u32> = all.iter().map(|f| f.index).collect();
        for f in &all {
            for &dep in &f.blocked_by {
                if !indices.contains(&dep) {
                    return Err(ForgeError::Validation {
                        message: format!(
                            "feature {} depends on unknown feature {}",
                            f.index, dep
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::Store;

    async fn store() -> Store {
        let dir = tempfile::tempdir().unwrap();
        Store::open(dir.path().join("p.db")).await.unwrap()
    }

    #[tokio::test]
    async fn add_and_load_round_trips() {
        let fs = FeatureStore::new(store().await);
        fs.add(1, "core".into(), "do the thing".into(), vec!["step".into()], Priority::High, vec![])
            .await
            .unwrap();
        let f = fs.load(1).await.unwrap();
        assert_eq!(f.description, "do the thing");
        assert!(!f.passes);
    }

    #[tokio::test]
    async fn next_ready_respects_dependencies_and_priority() {
        let fs = FeatureStore::new(store().await);
        fs.add(1, "core".into(), "base".into(), vec![], Priority::Normal, vec![])
            .await
            .unwrap();
        fs.add(2, "core".into(), "needs base".into(), vec![], Priority::Critical, vec![1])
            .await
            .unwrap();

        let ready = fs.next_ready().await.unwrap().unwrap();
        assert_eq!(ready.index, 1, "feature 2 is blocked until 1 passes");

        fs.mark(1, true, None).await.unwrap();
        let ready = fs.next_ready().await.unwrap().unwrap();
        assert_eq!(ready.index, 2);
    }

    #[tokio::test]
    async fn add_dependency_rejects_cycle() {
        let fs = FeatureStore::new(store().await);
        fs.add(1, "a".into(), "a".into(), vec![], Priority::Normal, vec![])
            .await
            .unwrap();
        fs.add(2, "b".into(), "b".into(), vec![], Priority::Normal, vec![1])
            .await
            .unwrap();
        let err = fs.add_dependency(1, 2).await.unwrap_err();
        assert!(matches!(err, ForgeError::DependencyCycle { .. }));
    }

    #[tokio::test]
    async fn record_attempt_tracks_failure_count() {
        let fs = FeatureStore::new(store().await);
        fs.add(1, "a".into(), "a".into(), vec![], Priority::Normal, vec![])
            .await
            .unwrap();
        fs.record_attempt(1, false).await.unwrap();
        fs.record_attempt(1, false).await.unwrap();
        assert_eq!(fs.load(1).await.unwrap().failure_count, 2);
        fs.record_attempt(1, true).await.unwrap();
        assert_eq!(fs.load(1).await.unwrap().failure_count, 0);
    }

    #[tokio::test]
    async fn stats_counts_ready_blocked_passing() {
        let fs = FeatureStore::new(store().await);
        fs.add(1, "a".into(), "a".into(), vec![], Priority::Normal, vec![])
            .await
            .unwrap();
        fs.add(2, "b".into(), "b".into(), vec![], Priority::Normal, vec![1])
            .await
            .unwrap();
        let stats = fs.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.ready, 1);
        assert_eq!(stats.blocked, 1);
    }

    #[tokio::test]
    async fn salience_prefers_never_worked_over_recently_worked() {
        let fs = FeatureStore::new(store().await);
        fs.add(1, "core".into(), "recently touched".into(), vec![], Priority::Normal, vec![])
            .await
            .unwrap();
        fs.add(2, "core".into(), "never touched".into(), vec![], Priority::Normal, vec![])
            .await
            .unwrap();
        fs.record_attempt(1, true).await.unwrap();

        let ctx = SalienceContext::default();
        let picked = fs.next_by_salience(&ctx).await.unwrap().unwrap();
        assert_eq!(picked.index, 2, "never-worked feature should outrank one just worked");
    }

    #[tokio::test]
    async fn salience_breaks_ties_by_lower_index() {
        let fs = FeatureStore::new(store().await);
        fs.add(1, "core".into(), "a".into(), vec![], Priority::Normal, vec![])
            .await
            .unwrap();
        fs.add(2, "core".into(), "b".into(), vec![], Priority::Normal, vec![])
            .await
            .unwrap();

        let ctx = SalienceContext::default();
        let picked = fs.next_by_salience(&ctx).await.unwrap().unwrap();
        assert_eq!(picked.index, 1);
    }

    #[tokio::test]
    async fn salience_boosts_focus_keyword_matches() {
        let fs = FeatureStore::new(store().await);
        fs.add(1, "auth".into(), "login flow".into(), vec![], Priority::Normal, vec![])
            .await
            .unwrap();
        fs.add(2, "billing".into(), "invoice export".into(), vec![], Priority::Normal, vec![])
            .await
            .unwrap();

        let ctx = SalienceContext {
            focus_keywords: vec!["billing".into()],
            ..Default::default()
        };
        let picked = fs.next_by_salience(&ctx).await.unwrap().unwrap();
        assert_eq!(picked.index, 2);
    }

    #[tokio::test]
    async fn salience_demotes_features_past_the_failure_threshold() {
        let fs = FeatureStore::new(store().await);
        fs.add(1, "core".into(), "flaky".into(), vec![], Priority::Normal, vec![])
            .await
            .unwrap();
        fs.add(2, "core".into(), "stable".into(), vec![], Priority::Normal, vec![])
            .await
            .unwrap();
        fs.record_attempt(1, false).await.unwrap();
        fs.record_attempt(1, false).await.unwrap();
        fs.record_attempt(1, false).await.unwrap();

        let ctx = SalienceContext { failure_threshold: 2, ..Default::default() };
        let picked = fs.next_by_salience(&ctx).await.unwrap().unwrap();
        assert_eq!(picked.index, 2, "repeatedly-failing feature should be demoted below the threshold");
    }
}
