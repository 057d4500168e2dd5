//! Tiered Memory: hot (in-process working state for the current session),
//! warm (recent session summaries, unresolved issues, and proven patterns,
//! persisted so the next session inherits them), and cold (append-only
//! cross-session knowledge and archived summaries).

use crate::error::ForgeResult;
use crate::persistence::{Store, StoreError};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;

const MAX_RECENT_ACTIONS: usize = 20;
const MAX_RECENT_FILES: usize = 10;
const MAX_FOCUS_KEYWORDS: usize = 10;
const MAX_ACTION_RESULT_CHARS: usize = 200;
const MAX_ERROR_MESSAGE_CHARS: usize = 500;
const MAX_WARM_SESSIONS: u32 = 5;

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let mut t: String = s.chars().take(max_chars).collect();
        t.push('\u{2026}');
        t
    }
}

// ============================================================================
// Hot Memory
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEntry {
    pub action: String,
    pub result: String,
    pub tool: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveError {
    pub error_id: String,
    pub error_type: String,
    pub message: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub occurrence_count: u32,
    pub context: serde_json::Value,
    pub related_features: Vec<u32>,
    pub attempted_fixes: Vec<String>,
    pub resolved: bool,
    pub resolution: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingDecision {
    pub decision_id: String,
    pub created_at: DateTime<Utc>,
    pub decision_type: String,
    pub context: serde_json::Value,
    pub options: Vec<String>,
    pub recommendation: Option<String>,
    pub confidence: f64,
    pub blocking_feature: Option<u32>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HotSummary {
    pub recent_actions: usize,
    pub recent_files: usize,
    pub active_errors: usize,
    pub unresolved_errors: usize,
    pub pending_decisions: usize,
}

/// Bounded, in-process working state for the current session. Never touches
/// the database: this is gone when the process exits, which is why
/// [`WarmMemory::record_session_summary`] exists to distill it before that
/// happens.
pub struct HotMemory {
    session_id: String,
    current_feature: Option<u32>,
    current_task: Option<String>,
    focus_keywords: Vec<String>,
    recent_actions: VecDeque<ActionEntry>,
    recent_files: VecDeque<String>,
    active_errors: Vec<ActiveError>,
    pending_decisions: Vec<PendingDecision>,
    next_decision_seq: u64,
}

impl HotMemory {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            current_feature: None,
            current_task: None,
            focus_keywords: Vec::new(),
            recent_actions: VecDeque::new(),
            recent_files: VecDeque::new(),
            active_errors: Vec::new(),
            pending_decisions: Vec::new(),
            next_decision_seq: 1,
        }
    }

    pub fn record_action(&mut self, action: &str, result: &str, tool: Option<&str>) {
        self.recent_actions.push_back(ActionEntry {
            action: action.to_string(),
            result: truncate(result, MAX_ACTION_RESULT_CHARS),
            tool: tool.map(str::to_string),
            at: Utc::now(),
        });
        while self.recent_actions.len() > MAX_RECENT_ACTIONS {
            self.recent_actions.pop_front();
        }
    }

    /// Re-records a file at the back of the list so the most recently
    /// touched file is always last, then trims to the cap.
    pub fn record_file(&mut self, path: &str) {
        self.recent_files.retain(|p| p != path);
        self.recent_files.push_back(path.to_string());
        while self.recent_files.len() > MAX_RECENT_FILES {
            self.recent_files.pop_front();
        }
    }

    pub fn set_focus(&mut self, feature: Option<u32>, task: Option<&str>, keywords: Vec<String>) {
        self.current_feature = feature;
        self.current_task = task.map(str::to_string);
        self.focus_keywords = keywords.into_iter().take(MAX_FOCUS_KEYWORDS).collect();
    }

    /// Records an error, deduplicating unresolved occurrences of the same
    /// `type:message` pair into a single entry with a running occurrence
    /// count rather than appending a new one every time. Returns the
    /// error's id either way.
    pub fn record_error(
        &mut self,
        error_type: &str,
        message: &str,
        context: serde_json::Value,
        related_features: Vec<u32>,
    ) -> String {
        let message = truncate(message, MAX_ERROR_MESSAGE_CHARS);
        let hash = error_hash(error_type, &message);
        if let Some(existing) = self
            .active_errors
            .iter_mut()
            .find(|e| !e.resolved && e.error_id.ends_with(&hash))
        {
            existing.last_seen = Utc::now();
            existing.occurrence_count += 1;
            for f in related_features {
                if !existing.related_features.contains(&f) {
                    existing.related_features.push(f);
                }
            }
            return existing.error_id.clone();
        }

        let now = Utc::now();
        let error_id = format!("ERR-{}-{hash}", self.session_id);
        self.active_errors.push(ActiveError {
            error_id: error_id.clone(),
            error_type: error_type.to_string(),
            message,
            first_seen: now,
            last_seen: now,
            occurrence_count: 1,
            context,
            related_features,
            attempted_fixes: Vec::new(),
            resolved: false,
            resolution: None,
        });
        error_id
    }

    pub fn record_fix_attempt(&mut self, error_id: &str, fix: &str) -> bool {
        match self.active_errors.iter_mut().find(|e| e.error_id == error_id) {
            Some(e) => {
                e.attempted_fixes.push(fix.to_string());
                true
            }
            None => false,
        }
    }

    pub fn resolve_error(&mut self, error_id: &str, resolution: &str) -> bool {
        match self.active_errors.iter_mut().find(|e| e.error_id == error_id) {
            Some(e) => {
                e.resolved = true;
                e.resolution = Some(resolution.to_string());
                true
            }
            None => false,
        }
    }

    pub fn active_errors(&self) -> impl Iterator<Item = &ActiveError> {
        self.active_errors.iter().filter(|e| !e.resolved)
    }

    pub fn add_pending_decision(
        &mut self,
        decision_type: &str,
        context: serde_json::Value,
        options: Vec<String>,
        recommendation: Option<String>,
        confidence: f64,
        blocking_feature: Option<u32>,
    ) -> String {
        let seq = self.next_decision_seq;
        self.next_decision_seq += 1;
        let decision_id = format!("PD-{}-{seq}", self.session_id);
        self.pending_decisions.push(PendingDecision {
            decision_id: decision_id.clone(),
            created_at: Utc::now(),
            decision_type: decision_type.to_string(),
            context,
            options,
            recommendation,
            confidence,
            blocking_feature,
            notes: Vec::new(),
        });
        decision_id
    }

    /// Removes and returns a pending decision once it has been acted on.
    pub fn resolve_decision(&mut self, decision_id: &str) -> Option<PendingDecision> {
        let idx = self.pending_decisions.iter().position(|d| d.decision_id == decision_id)?;
        Some(self.pending_decisions.remove(idx))
    }

    pub fn pending_decisions(&self) -> &[PendingDecision] {
        &self.pending_decisions
    }

    pub fn summary(&self) -> HotSummary {
        HotSummary {
            recent_actions: self.recent_actions.len(),
            recent_files: self.recent_files.len(),
            active_errors: self.active_errors.len(),
            unresolved_errors: self.active_errors().count(),
            pending_decisions: self.pending_decisions.len(),
        }
    }

    /// Formatted context a prompt can embed directly, mirroring the fixed
    /// section order used across all three tiers.
    pub fn context_for_prompt(&self) -> String {
        let mut lines = Vec::new();
        if let Some(f) = self.current_feature {
            lines.push(format!("Current Feature: #{f}"));
        }
        if let Some(task) = &self.current_task {
            lines.push(format!("Current Task: {task}"));
        }
        if !self.focus_keywords.is_empty() {
            lines.push(format!("Focus Areas: {}", self.focus_keywords.join(", ")));
        }
        if !self.recent_files.is_empty() {
            let recent: Vec<&str> = self.recent_files.iter().rev().take(5).map(String::as_str).collect();
            lines.push(format!("Recently Modified: {}", recent.join(", ")));
        }
        let unresolved: Vec<&ActiveError> = self.active_errors().collect();
        if !unresolved.is_empty() {
            lines.push(format!("Active Errors: {}", unresolved.len()));
            for e in unresolved.iter().take(3) {
                lines.push(format!("  - [{}] {}", e.error_type, truncate(&e.message, 80)));
            }
        }
        if !self.pending_decisions.is_empty() {
            lines.push(format!("Pending Decisions: {}", self.pending_decisions.len()));
            for d in self.pending_decisions.iter().take(2) {
                lines.push(format!("  - [{}] {}", d.decision_type, truncate(&d.context.to_string(), 80)));
            }
        }
        if lines.is_empty() {
            "No active working context.".to_string()
        } else {
            lines.join("\n")
        }
    }
}

fn error_hash(error_type: &str, message: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(error_type.as_bytes());
    hasher.update(b":");
    hasher.update(message.as_bytes());
    hex::encode(hasher.finalize())[..8].to_string()
}

// ============================================================================
// Warm Memory
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub started_at: String,
    pub ended_at: String,
    pub duration_seconds: f64,
    #[serde(default)]
    pub features_started: u32,
    #[serde(default)]
    pub features_completed: u32,
    #[serde(default)]
    pub features_regressed: u32,
    #[serde(default)]
    pub errors_encountered: u32,
    #[serde(default)]
    pub errors_resolved: u32,
    pub last_feature_worked: Option<u32>,
    pub last_checkpoint_id: Option<String>,
    pub ending_state: String,
    #[serde(default)]
    pub patterns_discovered: Vec<String>,
    #[serde(default)]
    pub warnings_for_next: Vec<String>,
    #[serde(default)]
    pub tool_calls: u32,
    #[serde(default)]
    pub escalations: u32,
    #[serde(default)]
    pub human_interventions: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnresolvedIssue {
    pub issue_id: String,
    pub created_at: String,
    pub last_updated: String,
    pub issue_type: String,
    pub description: String,
    pub context: serde_json::Value,
    pub related_features: Vec<u32>,
    pub sessions_seen: Vec<String>,
    pub priority: u32,
    pub notes: Vec<String>,
    pub resolution_attempts: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenPattern {
    pub pattern_id: String,
    pub created_at: String,
    pub pattern_type: String,
    pub problem: String,
    pub solution: String,
    pub context_keywords: Vec<String>,
    pub success_count: u32,
    pub sessions_used: Vec<String>,
    pub confidence: f64,
}

/// Recent-session context: summaries, issues that outlived their session,
/// and patterns proven to work, all persisted so the next session inherits
/// them. Limited to [`MAX_WARM_SESSIONS`] summaries; older ones are
/// archived into [`ColdMemory`] rather than dropped.
pub struct WarmMemory {
    store: Store,
}

impl WarmMemory {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Records a session summary and, once more than [`MAX_WARM_SESSIONS`]
    /// are on hand, archives the oldest into `cold` so they stay queryable
    /// without keeping warm memory unbounded.
    pub async fn record_session_summary(&self, cold: &ColdMemory, summary: &SessionSummary) -> ForgeResult<String> {
        let seq = self.store.next_seq("WS").await?;
        let summary_id = format!("WS-{seq}");
        let created_at = Utc::now().to_rfc3339();
        let body = serde_json::to_string(summary)?;
        let (id, sid, b, ts) = (summary_id.clone(), summary.session_id.clone(), body, created_at);
        self.store
            .write(move |conn| {
                conn.execute(
                    "INSERT INTO warm_summaries (summary_id, seq, session_id, created_at, body) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![id, seq as i64, sid, ts, b],
                )
                .map_err(StoreError::from)?;
                Ok(())
            })
            .await?;

        self.prune_to_cold(cold).await?;
        Ok(summary_id)
    }

    async fn prune_to_cold(&self, cold: &ColdMemory) -> ForgeResult<()> {
        let overflow = self
            .store
            .read(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT summary_id, body FROM warm_summaries ORDER BY seq ASC LIMIT MAX(0, (SELECT COUNT(*) FROM warm_summaries) - ?1)",
                )?;
                let rows = stmt
                    .query_map([MAX_WARM_SESSIONS], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        for (summary_id, body) in overflow {
            if let Ok(summary) = serde_json::from_str::<SessionSummary>(&body) {
                cold.archive_session(&ArchivedSession {
                    session_id: summary.session_id.clone(),
                    started_at: summary.started_at.clone(),
                    ended_at: summary.ended_at.clone(),
                    ending_state: summary.ending_state.clone(),
                    features_completed: summary.features_completed,
                    features_regressed: summary.features_regressed,
                    errors_count: summary.errors_encountered,
                    duration_seconds: summary.duration_seconds,
                })
                .await?;
            }
            let id = summary_id.clone();
            self.store
                .write(move |conn| {
                    conn.execute("DELETE FROM warm_summaries WHERE summary_id = ?1", params![id])
                        .map_err(StoreError::from)?;
                    Ok(())
                })
                .await?;
        }
        Ok(())
    }

    pub async fn recent_summaries(&self, limit: u32) -> ForgeResult<Vec<SessionSummary>> {
        let bodies = self
            .store
            .read(move |conn| {
                let mut stmt = conn.prepare("SELECT body FROM warm_summaries ORDER BY seq DESC LIMIT ?1")?;
                let rows = stmt
                    .query_map([limit], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(bodies.into_iter().filter_map(|b| serde_json::from_str(&b).ok()).collect())
    }

    pub async fn add_unresolved_issue(
        &self,
        issue_type: &str,
        description: &str,
        context: serde_json::Value,
        related_features: Vec<u32>,
        session_id: &str,
        priority: u32,
    ) -> ForgeResult<UnresolvedIssue> {
        let seq = self.store.next_seq("ISSUE").await?;
        let issue_id = format!("ISSUE-{seq}");
        let now = Utc::now().to_rfc3339();
        let issue = UnresolvedIssue {
            issue_id: issue_id.clone(),
            created_at: now.clone(),
            last_updated: now.clone(),
            issue_type: issue_type.to_string(),
            description: description.to_string(),
            context,
            related_features,
            sessions_seen: vec![session_id.to_string()],
            priority,
            notes: Vec::new(),
            resolution_attempts: Vec::new(),
        };
        let (id, it, d, ctx, rf, ss, p, n, ra, ca, lu) = (
            issue.issue_id.clone(),
            issue.issue_type.clone(),
            issue.description.clone(),
            serde_json::to_string(&issue.context)?,
            serde_json::to_string(&issue.related_features)?,
            serde_json::to_string(&issue.sessions_seen)?,
            issue.priority as i64,
            serde_json::to_string(&issue.notes)?,
            serde_json::to_string(&issue.resolution_attempts)?,
            issue.created_at.clone(),
            issue.last_updated.clone(),
        );
        self.store
            .write(move |conn| {
                conn.execute(
                    "INSERT INTO warm_memory_issues (issue_id, seq, issue_type, description, context, related_features, sessions_seen, priority, notes, resolution_attempts, created_at, last_updated)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    params![id, seq as i64, it, d, ctx, rf, ss, p, n, ra, ca, lu],
                )
                .map_err(StoreError::from)?;
                Ok(())
            })
            .await?;
        Ok(issue)
    }

    /// Appends to an issue's history rather than replacing it: a new session
    /// that hits the same issue, a note explaining a dead end, or a recorded
    /// attempt at resolving it.
    pub async fn update_issue(
        &self,
        issue_id: &str,
        session_id: Option<&str>,
        note: Option<&str>,
        resolution_attempt: Option<serde_json::Value>,
    ) -> ForgeResult<bool> {
        let Some(mut issue) = self.load_issue(issue_id).await? else {
            return Ok(false);
        };
        issue.last_updated = Utc::now().to_rfc3339();
        if let Some(sid) = session_id {
            if !issue.sessions_seen.iter().any(|s| s == sid) {
                issue.sessions_seen.push(sid.to_string());
            }
        }
        if let Some(note) = note {
            issue.notes.push(note.to_string());
        }
        if let Some(attempt) = resolution_attempt {
            issue.resolution_attempts.push(attempt);
        }

        let (id, sessions, notes, attempts, updated) = (
            issue.issue_id.clone(),
            serde_json::to_string(&issue.sessions_seen)?,
            serde_json::to_string(&issue.notes)?,
            serde_json::to_string(&issue.resolution_attempts)?,
            issue.last_updated.clone(),
        );
        self.store
            .write(move |conn| {
                conn.execute(
                    "UPDATE warm_memory_issues SET sessions_seen = ?1, notes = ?2, resolution_attempts = ?3, last_updated = ?4 WHERE issue_id = ?5",
                    params![sessions, notes, attempts, updated, id],
                )
                .map_err(StoreError::from)?;
                Ok(())
            })
            .await?;
        Ok(true)
    }

    pub async fn resolve_issue(&self, issue_id: &str) -> ForgeResult<bool> {
        let id = issue_id.to_string();
        let changed = self
            .store
            .write(move |conn| {
                let n = conn
                    .execute("DELETE FROM warm_memory_issues WHERE issue_id = ?1", params![id])
                    .map_err(StoreError::from)?;
                Ok(n)
            })
            .await?;
        Ok(changed > 0)
    }

    async fn load_issue(&self, issue_id: &str) -> ForgeResult<Option<UnresolvedIssue>> {
        let id = issue_id.to_string();
        let row = self
            .store
            .read(move |conn| {
                Ok(conn.query_row(
                    "SELECT issue_id, created_at, last_updated, issue_type, description, context, related_features, sessions_seen, priority, notes, resolution_attempts FROM warm_memory_issues WHERE issue_id = ?1",
                    [&id],
                    issue_from_row,
                )
                .optional()
                .map_err(StoreError::from)?)
            })
            .await?;
        Ok(row)
    }

    pub async fn unresolved_issues(&self, priority_max: Option<u32>) -> ForgeResult<Vec<UnresolvedIssue>> {
        let mut issues = self
            .store
            .read(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT issue_id, created_at, last_updated, issue_type, description, context, related_features, sessions_seen, priority, notes, resolution_attempts FROM warm_memory_issues",
                )?;
                let rows = stmt.query_map([], issue_from_row)?.collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        if let Some(max) = priority_max {
            issues.retain(|i| i.priority <= max);
        }
        issues.sort_by_key(|i| i.priority);
        Ok(issues)
    }

    pub async fn high_priority_issues(&self) -> ForgeResult<Vec<UnresolvedIssue>> {
        self.unresolved_issues(Some(2)).await
    }

    pub async fn add_pattern(
        &self,
        pattern_type: &str,
        problem: &str,
        solution: &str,
        context_keywords: Vec<String>,
        session_id: &str,
    ) -> ForgeResult<ProvenPattern> {
        let seq = self.store.next_seq("PAT").await?;
        let pattern = ProvenPattern {
            pattern_id: format!("PAT-{seq}"),
            created_at: Utc::now().to_rfc3339(),
            pattern_type: pattern_type.to_string(),
            problem: problem.to_string(),
            solution: solution.to_string(),
            context_keywords,
            success_count: 1,
            sessions_used: vec![session_id.to_string()],
            confidence: 0.5,
        };
        self.save_pattern(&pattern, seq).await?;
        Ok(pattern)
    }

    async fn save_pattern(&self, pattern: &ProvenPattern, seq: u64) -> ForgeResult<()> {
        let (id, pt, pr, sol, kw, sc, su, conf, ca) = (
            pattern.pattern_id.clone(),
            pattern.pattern_type.clone(),
            pattern.problem.clone(),
            pattern.solution.clone(),
            serde_json::to_string(&pattern.context_keywords)?,
            pattern.success_count as i64,
            serde_json::to_string(&pattern.sessions_used)?,
            pattern.confidence,
            pattern.created_at.clone(),
        );
        self.store
            .write(move |conn| {
                conn.execute(
                    "INSERT INTO warm_memory_patterns (pattern_id, seq, pattern_type, problem, solution, context_keywords, success_count, sessions_used, confidence, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                     ON CONFLICT(pattern_id) DO UPDATE SET success_count = excluded.success_count, sessions_used = excluded.sessions_used, confidence = excluded.confidence",
                    params![id, seq as i64, pt, pr, sol, kw, sc, su, conf, ca],
                )
                .map_err(StoreError::from)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Records a reuse of a proven pattern: one more success nudges its
    /// confidence up, capped at 1.0.
    pub async fn record_pattern_success(&self, pattern_id: &str, session_id: &str) -> ForgeResult<bool> {
        let Some(mut pattern) = self.load_pattern(pattern_id).await? else {
            return Ok(false);
        };
        pattern.success_count += 1;
        if !pattern.sessions_used.iter().any(|s| s == session_id) {
            pattern.sessions_used.push(session_id.to_string());
        }
        pattern.confidence = (0.5 + pattern.success_count as f64 * 0.1).min(1.0);

        let (id, sc, su, conf) = (
            pattern.pattern_id.clone(),
            pattern.success_count as i64,
            serde_json::to_string(&pattern.sessions_used)?,
            pattern.confidence,
        );
        self.store
            .write(move |conn| {
                conn.execute(
                    "UPDATE warm_memory_patterns SET success_count = ?1, sessions_used = ?2, confidence = ?3 WHERE pattern_id = ?4",
                    params![sc, su, conf, id],
                )
                .map_err(StoreError::from)?;
                Ok(())
            })
            .await?;
        Ok(true)
    }

    async fn load_pattern(&self, pattern_id: &str) -> ForgeResult<Option<ProvenPattern>> {
        let id = pattern_id.to_string();
        let row = self
            .store
            .read(move |conn| {
                Ok(conn.query_row(
                    "SELECT pattern_id, created_at, pattern_type, problem, solution, context_keywords, success_count, sessions_used, confidence FROM warm_memory_patterns WHERE pattern_id = ?1",
                    [&id],
                    pattern_from_row,
                )
                .optional()
                .map_err(StoreError::from)?)
            })
            .await?;
        Ok(row)
    }

    /// Patterns matching `query` against problem/solution/keywords, ranked
    /// by relevance score times confidence.
    pub async fn find_patterns(&self, query: &str, min_confidence: f64) -> ForgeResult<Vec<ProvenPattern>> {
        let all = self
            .store
            .read(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT pattern_id, created_at, pattern_type, problem, solution, context_keywords, success_count, sessions_used, confidence FROM warm_memory_patterns",
                )?;
                let rows = stmt.query_map([], pattern_from_row)?.collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let query_lower = query.to_lowercase();
        let query_words: Vec<&str> = query_lower.split_whitespace().collect();
        let mut scored: Vec<(f64, ProvenPattern)> = all
            .into_iter()
            .filter(|p| p.confidence >= min_confidence)
            .filter_map(|p| {
                let text = format!("{} {}", p.problem, p.solution).to_lowercase();
                let keywords_lower: Vec<String> = p.context_keywords.iter().map(|k| k.to_lowercase()).collect();
                let mut score = 0.0;
                if text.contains(&query_lower) {
                    score += 2.0;
                }
                for word in &query_words {
                    if text.contains(word) {
                        score += 1.0;
                    }
                    if keywords_lower.iter().any(|k| k == word) {
                        score += 1.5;
                    }
                }
                (score > 0.0).then_some((score * p.confidence, p))
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().map(|(_, p)| p).collect())
    }

    pub async fn context_for_prompt(&self) -> ForgeResult<String> {
        let mut lines = Vec::new();
        if let Some(last) = self.recent_summaries(1).await?.into_iter().next() {
            lines.push(format!("Last Session: {} ({})", last.session_id, last.ending_state));
            if let Some(f) = last.last_feature_worked {
                lines.push(format!("  Last feature: #{f}"));
            }
            if last.features_completed > 0 {
                lines.push(format!("  Completed: {} features", last.features_completed));
            }
            if !last.warnings_for_next.is_empty() {
                lines.push(format!("  Warnings: {}", last.warnings_for_next.iter().take(3).cloned().collect::<Vec<_>>().join(", ")));
            }
        }
        let issues = self.high_priority_issues().await?;
        if !issues.is_empty() {
            lines.push(format!("Unresolved Issues: {} high priority", issues.len()));
            for issue in issues.iter().take(3) {
                lines.push(format!("  - [{}] {}", issue.issue_type, truncate(&issue.description, 50)));
            }
        }
        Ok(if lines.is_empty() { "No previous session context.".to_string() } else { lines.join("\n") })
    }
}

fn issue_from_row(row: &rusqlite::Row) -> rusqlite::Result<UnresolvedIssue> {
    let context_json: String = row.get("context")?;
    let related_json: String = row.get("related_features")?;
    let sessions_json: String = row.get("sessions_seen")?;
    let notes_json: String = row.get("notes")?;
    let attempts_json: String = row.get("resolution_attempts")?;
    Ok(UnresolvedIssue {
        issue_id: row.get("issue_id")?,
        created_at: row.get("created_at")?,
        last_updated: row.get("last_updated")?,
        issue_type: row.get("issue_type")?,
        description: row.get("description")?,
        context: serde_json::from_str(&context_json).unwrap_or(serde_json::json!({})),
        related_features: serde_json::from_str(&related_json).unwrap_or_default(),
        sessions_seen: serde_json::from_str(&sessions_json).unwrap_or_default(),
        priority: row.get::<_, i64>("priority")? as u32,
        notes: serde_json::from_str(&notes_json).unwrap_or_default(),
        resolution_attempts: serde_json::from_str(&attempts_json).unwrap_or_default(),
    })
}

fn pattern_from_row(row: &rusqlite::Row) -> rusqlite::Result<ProvenPattern> {
    let keywords_json: String = row.get("context_keywords")?;
    let sessions_json: String = row.get("sessions_used")?;
    Ok(ProvenPattern {
        pattern_id: row.get("pattern_id")?,
        created_at: row.get("created_at")?,
        pattern_type: row.get("pattern_type")?,
        problem: row.get("problem")?,
        solution: row.get("solution")?,
        context_keywords: serde_json::from_str(&keywords_json).unwrap_or_default(),
        success_count: row.get::<_, i64>("success_count")? as u32,
        sessions_used: serde_json::from_str(&sessions_json).unwrap_or_default(),
        confidence: row.get("confidence")?,
    })
}

// ============================================================================
// Cold Memory
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedSession {
    pub session_id: String,
    pub started_at: String,
    pub ended_at: String,
    pub ending_state: String,
    pub features_completed: u32,
    pub features_regressed: u32,
    pub errors_count: u32,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub knowledge_id: String,
    pub kind: String,
    pub title: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub source_sessions: Vec<String>,
    pub confidence: f64,
    pub times_verified: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregateStatistics {
    pub total_sessions: u32,
    pub total_features_completed: u32,
    pub total_features_regressed: u32,
    pub total_errors: u32,
    pub total_duration_seconds: f64,
    pub successful_sessions: u32,
    pub failed_sessions: u32,
}

impl AggregateStatistics {
    pub fn avg_session_duration(&self) -> f64 {
        if self.total_sessions == 0 { 0.0 } else { self.total_duration_seconds / self.total_sessions as f64 }
    }

    pub fn avg_features_per_session(&self) -> f64 {
        if self.total_sessions == 0 { 0.0 } else { self.total_features_completed as f64 / self.total_sessions as f64 }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_sessions == 0 { 0.0 } else { self.successful_sessions as f64 / self.total_sessions as f64 }
    }
}

/// Durable, cross-session knowledge and full-session archives. Append-only:
/// nothing here is ever deleted, only superseded by higher-confidence
/// entries or re-verified in place.
pub struct ColdMemory {
    store: Store,
}

impl ColdMemory {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn archive_session(&self, session: &ArchivedSession) -> ForgeResult<String> {
        let seq = self.store.next_seq("CA").await?;
        let archive_id = format!("CA-{seq}");
        let created_at = Utc::now().to_rfc3339();
        let body = serde_json::to_string(session)?;
        let (id, sid, b, ts) = (archive_id.clone(), session.session_id.clone(), body, created_at);
        self.store
            .write(move |conn| {
                conn.execute(
                    "INSERT INTO cold_archive (archive_id, seq, session_id, body, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![id, seq as i64, sid, b, ts],
                )
                .map_err(StoreError::from)?;
                Ok(())
            })
            .await?;
        Ok(archive_id)
    }

    pub async fn statistics(&self) -> ForgeResult<AggregateStatistics> {
        let bodies = self
            .store
            .read(|conn| {
                let mut stmt = conn.prepare("SELECT body FROM cold_archive")?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?.collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut stats = AggregateStatistics::default();
        for body in bodies {
            let Ok(session) = serde_json::from_str::<ArchivedSession>(&body) else { continue };
            stats.total_sessions += 1;
            stats.total_features_completed += session.features_completed;
            stats.total_features_regressed += session.features_regressed;
            stats.total_errors += session.errors_count;
            stats.total_duration_seconds += session.duration_seconds;
            match session.ending_state.as_str() {
                "completed" => stats.successful_sessions += 1,
                "failed" | "error" => stats.failed_sessions += 1,
                _ => {}
            }
        }
        Ok(stats)
    }

    pub async fn add_knowledge(
        &self,
        kind: &str,
        title: &str,
        description: &str,
        keywords: Vec<String>,
        source_sessions: Vec<String>,
        confidence: f64,
    ) -> ForgeResult<KnowledgeItem> {
        let seq = self.store.next_seq("KNOW").await?;
        let knowledge_id = format!("KNOW-{seq}");
        let created_at = Utc::now().to_rfc3339();
        let item = KnowledgeItem {
            knowledge_id: knowledge_id.clone(),
            kind: kind.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            keywords,
            source_sessions,
            confidence,
            times_verified: 0,
        };
        let (id, k, t, d, kw, ss, conf, ca) = (
            item.knowledge_id.clone(),
            item.kind.clone(),
            item.title.clone(),
            item.description.clone(),
            serde_json::to_string(&item.keywords)?,
            serde_json::to_string(&item.source_sessions)?,
            item.confidence,
            created_at,
        );
        self.store
            .write(move |conn| {
                conn.execute(
                    "INSERT INTO cold_knowledge (knowledge_id, seq, type, title, description, keywords, source_sessions, confidence, times_verified, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9)",
                    params![id, seq as i64, k, t, d, kw, ss, conf, ca],
                )
                .map_err(StoreError::from)?;
                Ok(())
            })
            .await?;
        Ok(item)
    }

    /// Records that a piece of knowledge held true again: each verification
    /// nudges confidence up, capped at 1.0, without ever deleting the entry.
    pub async fn verify_knowledge(&self, knowledge_id: &str) -> ForgeResult<bool> {
        let Some(item) = self.load_knowledge(knowledge_id).await? else {
            return Ok(false);
        };
        let new_confidence = (item.confidence + 0.1).min(1.0);
        let new_times_verified = item.times_verified + 1;
        let id = knowledge_id.to_string();
        self.store
            .write(move |conn| {
                conn.execute(
                    "UPDATE cold_knowledge SET confidence = ?1, times_verified = ?2 WHERE knowledge_id = ?3",
                    params![new_confidence, new_times_verified as i64, id],
                )
                .map_err(StoreError::from)?;
                Ok(())
            })
            .await?;
        Ok(true)
    }

    async fn load_knowledge(&self, knowledge_id: &str) -> ForgeResult<Option<KnowledgeItem>> {
        let id = knowledge_id.to_string();
        let row = self
            .store
            .read(move |conn| {
                Ok(conn.query_row(
                    "SELECT knowledge_id, type, title, description, keywords, source_sessions, confidence, times_verified FROM cold_knowledge WHERE knowledge_id = ?1",
                    [&id],
                    knowledge_from_row,
                )
                .optional()
                .map_err(StoreError::from)?)
            })
            .await?;
        Ok(row)
    }

    /// Knowledge matching `query` against title/description/keywords,
    /// ranked by relevance score times confidence so a frequently-verified
    /// entry outranks a fresher, lower-confidence one on a tied score.
    pub async fn search_knowledge(&self, query: &str) -> ForgeResult<Vec<KnowledgeItem>> {
        let all = self
            .store
            .read(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT knowledge_id, type, title, description, keywords, source_sessions, confidence, times_verified FROM cold_knowledge",
                )?;
                let rows = stmt.query_map([], knowledge_from_row)?.collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let query_lower = query.to_lowercase();
        let query_words: Vec<&str> = query_lower.split_whitespace().collect();
        let mut scored: Vec<(f64, KnowledgeItem)> = all
            .into_iter()
            .filter_map(|item| {
                let text = format!("{} {}", item.title, item.description).to_lowercase();
                let keywords_lower: Vec<String> = item.keywords.iter().map(|k| k.to_lowercase()).collect();
                let mut score = 0.0;
                if text.contains(&query_lower) {
                    score += 3.0;
                }
                for word in &query_words {
                    if text.contains(word) {
                        score += 1.0;
                    }
                    if keywords_lower.iter().any(|k| k == word) {
                        score += 2.0;
                    }
                }
                (score > 0.0).then_some((score * item.confidence, item))
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().map(|(_, item)| item).collect())
    }

    pub async fn high_confidence_knowledge(&self, min_confidence: f64) -> ForgeResult<Vec<KnowledgeItem>> {
        let all = self
            .store
            .read(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT knowledge_id, type, title, description, keywords, source_sessions, confidence, times_verified FROM cold_knowledge",
                )?;
                let rows = stmt.query_map([], knowledge_from_row)?.collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(all.into_iter().filter(|k| k.confidence >= min_confidence).collect())
    }

    pub async fn context_for_prompt(&self) -> ForgeResult<String> {
        let mut lines = Vec::new();
        let stats = self.statistics().await?;
        if stats.total_sessions > 0 {
            lines.push(format!("Historical: {} sessions archived", stats.total_sessions));
            lines.push(format!("  Success rate: {:.0}%", stats.success_rate() * 100.0));
            lines.push(format!("  Avg features/session: {:.1}", stats.avg_features_per_session()));
        }
        let high_conf = self.high_confidence_knowledge(0.7).await?;
        if !high_conf.is_empty() {
            lines.push(format!("Proven Knowledge: {} high-confidence entries", high_conf.len()));
            for item in high_conf.iter().take(3) {
                lines.push(format!("  - {}", item.title));
            }
        }
        Ok(if lines.is_empty() { "No historical data available.".to_string() } else { lines.join("\n") })
    }
}

fn knowledge_from_row(row: &rusqlite::Row) -> rusqlite::Result<KnowledgeItem> {
    let keywords_json: String = row.get("keywords")?;
    let sessions_json: String = row.get("source_sessions")?;
    Ok(KnowledgeItem {
        knowledge_id: row.get("knowledge_id")?,
        kind: row.get("type")?,
        title: row.get("title")?,
        description: row.get("description")?,
        keywords: serde_json::from_str(&keywords_json).unwrap_or_default(),
        source_sessions: serde_json::from_str(&sessions_json).unwrap_or_default(),
        confidence: row.get("confidence")?,
        times_verified: row.get::<_, i64>("times_verified")? as u32,
    })
}

// ============================================================================
// Facade
// ============================================================================

/// Owns all three tiers for one session and assembles them into a single
/// prompt-ready context string in a fixed hot/warm/cold order.
pub struct TieredMemory {
    pub hot: HotMemory,
    pub warm: WarmMemory,
    pub cold: ColdMemory,
}

impl TieredMemory {
    pub fn new(store: Store, session_id: impl Into<String>) -> Self {
        Self {
            hot: HotMemory::new(session_id),
            warm: WarmMemory::new(store.clone()),
            cold: ColdMemory::new(store),
        }
    }

    pub async fn end_session(&self, summary: &SessionSummary) -> ForgeResult<String> {
        self.warm.record_session_summary(&self.cold, summary).await
    }

    pub async fn full_context(&self) -> ForgeResult<String> {
        let hot = self.hot.context_for_prompt();
        let warm = self.warm.context_for_prompt().await?;
        let cold = self.cold.context_for_prompt().await?;
        Ok(format!("{hot}\n\n{warm}\n\n{cold}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hot_memory_record_file_moves_existing_entry_to_back() {
        let mut mem = HotMemory::new("s-1");
        mem.record_file("a.rs");
        mem.record_file("b.rs");
        mem.record_file("a.rs");
        assert!(mem.context_for_prompt().contains("a.rs, b.rs"));
    }

    #[test]
    fn hot_memory_dedups_repeated_errors_by_type_and_message() {
        let mut mem = HotMemory::new("s-1");
        let first = mem.record_error("TypeError", "boom", serde_json::json!({}), vec![1]);
        let second = mem.record_error("TypeError", "boom", serde_json::json!({}), vec![2]);
        assert_eq!(first, second);
        let err = mem.active_errors().next().unwrap();
        assert_eq!(err.occurrence_count, 2);
        assert_eq!(err.related_features, vec![1, 2]);
    }

    #[test]
    fn hot_memory_resolve_error_removes_it_from_active_list() {
        let mut mem = HotMemory::new("s-1");
        let id = mem.record_error("IoError", "disk full", serde_json::json!({}), vec![]);
        assert!(mem.resolve_error(&id, "freed disk space"));
        assert_eq!(mem.active_errors().count(), 0);
    }

    #[test]
    fn hot_memory_pending_decision_round_trips_through_resolve() {
        let mut mem = HotMemory::new("s-1");
        let id = mem.add_pending_decision("approach", serde_json::json!({"why": "two valid designs"}), vec!["a".into(), "b".into()], Some("a".into()), 0.6, Some(3));
        assert_eq!(mem.pending_decisions().len(), 1);
        let resolved = mem.resolve_decision(&id).unwrap();
        assert_eq!(resolved.decision_id, id);
        assert!(mem.pending_decisions().is_empty());
    }

    #[test]
    fn hot_memory_caps_recent_actions_at_twenty() {
        let mut mem = HotMemory::new("s-1");
        for i in 0..25 {
            mem.record_action(&format!("step {i}"), "ok", None);
        }
        assert_eq!(mem.summary().recent_actions, MAX_RECENT_ACTIONS);
    }

    #[tokio::test]
    async fn warm_summaries_persist_and_list_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("p.db")).await.unwrap();
        let cold = ColdMemory::new(store.clone());
        let warm = WarmMemory::new(store);
        let summary = |session_id: &str| SessionSummary {
            session_id: session_id.to_string(),
            started_at: "2026-01-01T00:00:00Z".into(),
            ended_at: "2026-01-01T01:00:00Z".into(),
            duration_seconds: 3600.0,
            features_started: 1,
            features_completed: 1,
            features_regressed: 0,
            errors_encountered: 0,
            errors_resolved: 0,
            last_feature_worked: Some(1),
            last_checkpoint_id: None,
            ending_state: "completed".into(),
            patterns_discovered: vec![],
            warnings_for_next: vec![],
            tool_calls: 3,
            escalations: 0,
            human_interventions: 0,
        };
        warm.record_session_summary(&cold, &summary("s-1")).await.unwrap();
        warm.record_session_summary(&cold, &summary("s-2")).await.unwrap();
        let recent = warm.recent_summaries(10).await.unwrap();
        assert_eq!(recent[0].session_id, "s-2");
    }

    #[tokio::test]
    async fn warm_summaries_beyond_max_are_promoted_to_cold() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("p.db")).await.unwrap();
        let cold = ColdMemory::new(store.clone());
        let warm = WarmMemory::new(store);
        for i in 0..(MAX_WARM_SESSIONS + 2) {
            let summary = SessionSummary {
                session_id: format!("s-{i}"),
                started_at: "2026-01-01T00:00:00Z".into(),
                ended_at: "2026-01-01T01:00:00Z".into(),
                duration_seconds: 60.0,
                features_started: 0,
                features_completed: 0,
                features_regressed: 0,
                errors_encountered: 0,
                errors_resolved: 0,
                last_feature_worked: None,
                last_checkpoint_id: None,
                ending_state: "completed".into(),
                patterns_discovered: vec![],
                warnings_for_next: vec![],
                tool_calls: 0,
                escalations: 0,
                human_interventions: 0,
            };
            warm.record_session_summary(&cold, &summary).await.unwrap();
        }
        let recent = warm.recent_summaries(100).await.unwrap();
        assert_eq!(recent.len(), MAX_WARM_SESSIONS as usize);
        let stats = cold.statistics().await.unwrap();
        assert_eq!(stats.total_sessions, 2);
    }

    #[tokio::test]
    async fn warm_issue_update_appends_sessions_and_notes() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("p.db")).await.unwrap();
        let warm = WarmMemory::new(store);
        let issue = warm
            .add_unresolved_issue("blocker", "flaky CI runner", serde_json::json!({}), vec![4], "s-1", 1)
            .await
            .unwrap();
        warm.update_issue(&issue.issue_id, Some("s-2"), Some("still flaky"), None).await.unwrap();
        let issues = warm.high_priority_issues().await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].sessions_seen, vec!["s-1".to_string(), "s-2".to_string()]);
        assert_eq!(issues[0].notes, vec!["still flaky".to_string()]);
    }

    #[tokio::test]
    async fn warm_pattern_success_raises_confidence() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("p.db")).await.unwrap();
        let warm = WarmMemory::new(store);
        let pattern = warm.add_pattern("fix", "flaky test", "retry with backoff", vec!["flaky".into()], "s-1").await.unwrap();
        assert_eq!(pattern.confidence, 0.5);
        warm.record_pattern_success(&pattern.pattern_id, "s-2").await.unwrap();
        let found = warm.find_patterns("flaky", 0.0).await.unwrap();
        assert_eq!(found[0].success_count, 2);
        assert!((found[0].confidence - 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn cold_knowledge_search_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("p.db")).await.unwrap();
        let cold = ColdMemory::new(store);
        cold.add_knowledge("pattern", "Auth Middleware Quirk", "desc", vec!["auth".into()], vec!["s-1".into()], 0.9).await.unwrap();
        let hits = cold.search_knowledge("auth").await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn cold_knowledge_search_ranks_higher_confidence_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("p.db")).await.unwrap();
        let cold = ColdMemory::new(store);
        cold.add_knowledge("pattern", "low confidence auth note", "auth", vec![], vec![], 0.2).await.unwrap();
        cold.add_knowledge("pattern", "high confidence auth note", "auth", vec![], vec![], 0.9).await.unwrap();
        let hits = cold.search_knowledge("auth").await.unwrap();
        assert_eq!(hits[0].title, "high confidence auth note");
    }

    #[tokio::test]
    async fn cold_verify_knowledge_increases_confidence_and_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("p.db")).await.unwrap();
        let cold = ColdMemory::new(store);
        let item = cold.add_knowledge("fix", "retry flaky test", "desc", vec![], vec![], 0.5).await.unwrap();
        cold.verify_knowledge(&item.knowledge_id).await.unwrap();
        let found = cold.search_knowledge("retry").await.unwrap();
        assert_eq!(found[0].times_verified, 1);
        assert!((found[0].confidence - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn tiered_memory_full_context_concatenates_all_three_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("p.db")).await.unwrap();
        let mut memory = TieredMemory::new(store, "s-1");
        memory.hot.set_focus(Some(2), Some("wire up auth"), vec!["auth".into()]);
        let context = memory.full_context().await.unwrap();
        assert!(context.contains("Current Feature: #2"));
        assert!(context.contains("No previous session context."));
        assert!(context.contains("No historical data available."));
    }
}
