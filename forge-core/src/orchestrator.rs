//! Orchestrator: the outer control loop. Owns one project across many
//! sessions — picks the next ready feature, runs a session against it,
//! checkpoints progress, and routes anything the Escalation Engine flags to
//! Human Injection before continuing.

use crate::assistant::{AssistantClient, ToolSpec};
use crate::autonomy::{AutonomyLevel, AutonomyManager};
use crate::checkpoint::{CheckpointManager, CheckpointTrigger};
use crate::context::Context;
use crate::error::{ForgeError, ForgeResult};
use crate::escalation::{EscalationContext, EscalationEngine};
use crate::feature_store::{Feature, FeatureStore, SalienceContext};
use crate::human_injection::HumanInjection;
use crate::observability::{BudgetTracker, Observability};
use crate::session_runner::{SessionRunner, StepOutcome};
use crate::stall::{CrossSessionStallTracker, StallKind};
use std::sync::Arc;

pub struct Orchestrator {
    ctx: Context,
    features: FeatureStore,
    checkpoints: CheckpointManager,
    injection: HumanInjection,
    observability: Arc<Observability>,
    stall: CrossSessionStallTracker,
    escalation: EscalationEngine,
    assistant: Arc<dyn AssistantClient>,
    /// Guidance carried from a resolved human injection into the next
    /// session's system prompt. Cleared once consumed.
    pending_guidance: Option<String>,
}

/// What kind of work a session is doing, which shapes its system prompt and
/// which checkpoint/escalation policy applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionType {
    /// No features exist yet: the session's job is to read the project and
    /// propose a feature breakdown via `arcadia feature add`.
    Initializer,
    /// The target feature previously failed at least once; the session is
    /// picking up prior work rather than starting fresh.
    Update,
    /// Ordinary first attempt at a not-yet-attempted feature.
    Coding,
}

impl SessionType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Initializer => "initializer",
            Self::Update => "update",
            Self::Coding => "coding",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    FeatureCompleted { index: u32 },
    FeatureFailed { index: u32, reason: String },
    AwaitingHuman { point_id: String },
    /// A human denied a gated action; the session did not continue.
    HumanDenied { point_id: String, reason: String },
    NoWorkRemaining,
    /// The initializer session ran; the feature list may or may not have
    /// grown depending on what the assistant actually did.
    InitializerCompleted,
    /// An audit sub-session reviewed `reviewed` previously-passing features.
    AuditCompleted { reviewed: u32 },
    /// The in-session cycle tracker caught the assistant repeating the same
    /// action.
    Cyclic { detail: String },
    /// A cross-session stall signal fired: no feature progressing, the same
    /// commit across checkpoints, or the passing count stuck.
    NoProgress { detail: String },
    /// The assistant credential was rejected; no point in retrying without
    /// operator intervention.
    AuthError { message: String },
}

impl Orchestrator {
    pub async fn new(ctx: Context, assistant: Arc<dyn AssistantClient>) -> ForgeResult<Self> {
        verify_working_directory(ctx.project_dir())?;

        let features = FeatureStore::new(ctx.store.clone());
        let checkpoints = CheckpointManager::new(ctx.store.clone(), FeatureStore::new(ctx.store.clone()), ctx.project_dir());
        let injection = HumanInjection::new(ctx.store.clone());
        let observability = Arc::new(Observability::new(ctx.store.clone()));
        let stall = CrossSessionStallTracker::new(ctx.store.clone());

        Ok(Self {
            ctx,
            features,
            checkpoints,
            injection,
            observability,
            stall,
            escalation: EscalationEngine::new(),
            assistant,
            pending_guidance: None,
        })
    }

    /// Run a single session. Picks an initializer session when the feature
    /// list is empty, otherwise the next feature by salience; brackets the
    /// work with `session_start`/`session_end` checkpoints and folds any
    /// stall signal raised along the way into the returned outcome.
    pub async fn run_one_session(&mut self, session_id: &str) -> ForgeResult<SessionOutcome> {
        let stats = self.features.stats().await?;
        if stats.total == 0 {
            return self.run_initializer_session(session_id).await;
        }

        if self.due_for_audit(session_id).await? {
            self.run_audit_subsession(session_id).await?;
        }

        let salience_ctx = SalienceContext {
            failure_threshold: self.ctx.config.max_no_progress,
            ..Default::default()
        };
        let feature = match self.features.next_by_salience(&salience_ctx).await? {
            Some(f) => f,
            None => return Ok(SessionOutcome::NoWorkRemaining),
        };
        let session_type = if feature.failure_count > 0 { SessionType::Update } else { SessionType::Coding };

        self.checkpoints
            .capture(
                session_id,
                CheckpointTrigger::SessionStart,
                Some(format!("{} session for feature {}", session_type.as_str(), feature.index)),
            )
            .await?;

        let result = self.drive_feature_session(session_id, &feature, session_type).await;

        let end_checkpoint = self.checkpoints.capture(session_id, CheckpointTrigger::SessionEnd, None).await?;

        let outcome = result?;
        self.apply_stall_overrides(outcome, &end_checkpoint).await
    }

    /// Resume after a human has answered (or timed out on) a gated action.
    /// The CLI's `respond` subcommand runs in a different process than the
    /// one that raised the point, so this is the only way the orchestrator
    /// ever learns the outcome: it blocks on [`HumanInjection::await_response`]
    /// and then either lets the next session proceed with the human's
    /// guidance attached, or reports the denial without spending a session.
    pub async fn resume_after_injection(&mut self, session_id: &str, point_id: &str) -> ForgeResult<SessionOutcome> {
        let response = self.injection.await_response(point_id).await?;
        match response.as_deref() {
            Some("approve") => {
                self.pending_guidance = Some(format!(
                    "A human approved the action you proposed (injection point {point_id}). Proceed with it."
                ));
                self.run_one_session(session_id).await
            }
            other => Ok(SessionOutcome::HumanDenied {
                point_id: point_id.to_string(),
                reason: other.map(str::to_string).unwrap_or_else(|| "no response".into()),
            }),
        }
    }

    /// The oldest still-pending injection point, if any. Used by the CLI run
    /// loop to resume a session after a human answers from another process
    /// instead of leaving the point to expire unattended.
    pub async fn pending_injection_point(&self) -> ForgeResult<Option<String>> {
        Ok(self.injection.list_pending().await?.into_iter().next().map(|p| p.point_id))
    }

    async fn drive_feature_session(
        &mut self,
        session_id: &str,
        feature: &Feature,
        session_type: SessionType,
    ) -> ForgeResult<SessionOutcome> {
        let autonomy_level = AutonomyLevel::parse(&self.ctx.config.autonomy_level)
            .unwrap_or(AutonomyLevel::ExecuteSafe);
        let mut runner = SessionRunner::new(
            session_id.to_string(),
            self.assistant.clone(),
            AutonomyManager::new(autonomy_level),
            BudgetTracker::new(self.ctx.config.budget_ceiling_usd, self.ctx.config.budget_warning_threshold),
            self.observability.clone(),
            self.ctx.config.max_iterations,
            self.system_prompt(feature, session_type),
        );

        let tools: Vec<ToolSpec> = vec![ToolSpec {
            name: "bash".into(),
            description: "run a shell command in the project working directory".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "command": { "type": "string" } },
                "required": ["command"],
            }),
        }];

        let mut iterations_since_progress = 0u32;
        loop {
            let outcome = match runner.step(&tools).await {
                Ok(o) => o,
                Err(ForgeError::AssistantAuth { message }) => return Ok(SessionOutcome::AuthError { message }),
                Err(e) => return Err(e),
            };
            match outcome {
                StepOutcome::Continued { .. } => {
                    iterations_since_progress += 1;
                    continue;
                }
                StepOutcome::Completed { .. } => {
                    runner.request_completion_confirmation();
                    // One more round-trip to confirm before trusting completion;
                    // if the assistant still ends its turn, accept the result.
                    let confirm = runner.step(&tools).await?;
                    if matches!(confirm, StepOutcome::Completed { .. }) {
                        return self.finish_feature_success(session_id, feature, &mut runner).await;
                    }
                    continue;
                }
                StepOutcome::Gated(calls) => {
                    let ctx = EscalationContext {
                        proposed_risk: calls.iter().map(|c| c.risk).max(),
                        autonomy_permits_risk: false,
                        proposed_action_irreversible: calls.iter().any(|c| !c.reversible),
                        proposed_action_affects_source_of_truth: calls.iter().any(|c| c.affects_source_of_truth),
                        current_feature_failure_count: feature.failure_count,
                        failure_threshold: self.ctx.config.max_no_progress,
                        iterations_since_progress,
                        no_progress_threshold: self.ctx.config.max_no_progress,
                        budget_fraction_used: runner.budget().fraction_used(),
                        budget_warning_threshold: self.ctx.config.budget_warning_threshold,
                        stall_flagged: false,
                        feature_regressed: false,
                    };
                    let decision = self.escalation.decide(&ctx);
                    let message = format!(
                        "Session {session_id} wants to run {} gated action(s): {}",
                        calls.len(),
                        calls.iter().map(|c| format!("{} ({:?}): {}", c.tool_name, c.risk, c.reason)).collect::<Vec<_>>().join("; ")
                    );
                    let (injection_type, timeout_seconds, default_action) = match &decision.leading_rule {
                        Some(rule) => (rule.injection_type, rule.timeout_seconds, rule.default_action.map(String::from)),
                        None => (crate::escalation::InjectionType::Approval, 300, Some("deny".into())),
                    };
                    let point = self
                        .injection
                        .raise(
                            injection_type,
                            &message,
                            vec!["approve".into(), "deny".into()],
                            default_action.clone(),
                            timeout_seconds,
                            default_action,
                            decision.reasons,
                        )
                        .await?;
                    return Ok(SessionOutcome::AwaitingHuman { point_id: point.point_id });
                }
                StepOutcome::Stalled(signal) => {
                    self.checkpoints
                        .capture(session_id, CheckpointTrigger::ErrorRecovery, Some(signal.detail.clone()))
                        .await?;
                    self.features.record_attempt(feature.index, false).await?;
                    return Ok(SessionOutcome::Cyclic { detail: signal.detail });
                }
                StepOutcome::MaxIterationsReached => {
                    self.features.record_attempt(feature.index, false).await?;
                    return Ok(SessionOutcome::FeatureFailed {
                        index: feature.index,
                        reason: "max iterations reached".into(),
                    });
                }
            }
        }
    }

    fn system_prompt(&self, feature: &Feature, session_type: SessionType) -> String {
        let guidance = self
            .pending_guidance
            .clone()
            .map(|g| format!("\n{g}"))
            .unwrap_or_default();
        match session_type {
            SessionType::Update => format!(
                "You are resuming feature {}: {}\nSteps: {}\nThis feature has failed {} time(s) before; review what went wrong first.{guidance}",
                feature.index, feature.description, feature.steps.join("; "), feature.failure_count
            ),
            SessionType::Coding => format!(
                "You are working on feature {}: {}\nSteps: {}{guidance}",
                feature.index, feature.description, feature.steps.join("; ")
            ),
            SessionType::Initializer => unreachable!("initializer sessions use their own prompt"),
        }
    }

    async fn finish_feature_success(
        &mut self,
        session_id: &str,
        feature: &Feature,
        runner: &mut SessionRunner,
    ) -> ForgeResult<SessionOutcome> {
        self.features.mark(feature.index, true, Some("pending_review".into())).await?;
        self.features.record_attempt(feature.index, true).await?;
        self.checkpoints
            .capture(session_id, CheckpointTrigger::FeatureComplete, None)
            .await?;
        runner.record_outcome(true);
        Ok(SessionOutcome::FeatureCompleted { index: feature.index })
    }

    /// An initializer session has no feature to attach to: it reads the
    /// project and is expected to call `arcadia feature add` via bash for
    /// each feature it identifies.
    async fn run_initializer_session(&mut self, session_id: &str) -> ForgeResult<SessionOutcome> {
        self.checkpoints
            .capture(session_id, CheckpointTrigger::SessionStart, Some("initializer session".into()))
            .await?;

        let autonomy_level = AutonomyLevel::parse(&self.ctx.config.autonomy_level)
            .unwrap_or(AutonomyLevel::ExecuteSafe);
        let mut runner = SessionRunner::new(
            session_id.to_string(),
            self.assistant.clone(),
            AutonomyManager::new(autonomy_level),
            BudgetTracker::new(self.ctx.config.budget_ceiling_usd, self.ctx.config.budget_warning_threshold),
            self.observability.clone(),
            self.ctx.config.max_iterations,
            "No features are registered yet. Read the project and register a concrete, testable \
             feature breakdown by running `arcadia feature add` once per feature via bash."
                .to_string(),
        );
        let tools: Vec<ToolSpec> = vec![ToolSpec {
            name: "bash".into(),
            description: "run a shell command in the project working directory".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "command": { "type": "string" } },
                "required": ["command"],
            }),
        }];

        loop {
            let outcome = match runner.step(&tools).await {
                Ok(o) => o,
                Err(ForgeError::AssistantAuth { message }) => {
                    self.checkpoints.capture(session_id, CheckpointTrigger::SessionEnd, None).await.ok();
                    return Ok(SessionOutcome::AuthError { message });
                }
                Err(e) => return Err(e),
            };
            match outcome {
                StepOutcome::Continued { .. } => continue,
                StepOutcome::Completed { .. } | StepOutcome::MaxIterationsReached => break,
                StepOutcome::Gated(_) => break,
                StepOutcome::Stalled(_) => break,
            }
        }

        self.checkpoints.capture(session_id, CheckpointTrigger::SessionEnd, None).await?;
        Ok(SessionOutcome::InitializerCompleted)
    }

    /// Whether `audit_cadence` sessions have elapsed since the last audit,
    /// counted from `session_start` checkpoints.
    async fn due_for_audit(&self, _session_id: &str) -> ForgeResult<bool> {
        if self.ctx.config.audit_cadence == 0 {
            return Ok(false);
        }
        let recent = self.checkpoints.list_recent(u32::MAX).await?;
        let session_starts = recent.iter().filter(|c| c.trigger == "session_start").count() as u32;
        Ok(session_starts > 0 && session_starts % self.ctx.config.audit_cadence == 0)
    }

    /// A lightweight sub-session that re-reads already-passing features and
    /// confirms (or flags) their `audit_status`, rather than doing new work.
    async fn run_audit_subsession(&mut self, session_id: &str) -> ForgeResult<SessionOutcome> {
        let all = self.features.all().await?;
        let passing: Vec<&Feature> = all.iter().filter(|f| f.passes).collect();
        if passing.is_empty() {
            return Ok(SessionOutcome::AuditCompleted { reviewed: 0 });
        }

        self.checkpoints
            .capture(session_id, CheckpointTrigger::SessionStart, Some("audit session".into()))
            .await?;

        let autonomy_level = AutonomyLevel::parse(&self.ctx.config.autonomy_level)
            .unwrap_or(AutonomyLevel::ExecuteSafe);
        let summary = passing
            .iter()
            .map(|f| format!("{}: {}", f.index, f.description))
            .collect::<Vec<_>>()
            .join("\n");
        let mut runner = SessionRunner::new(
            session_id.to_string(),
            self.assistant.clone(),
            AutonomyManager::new(autonomy_level),
            BudgetTracker::new(self.ctx.config.budget_ceiling_usd, self.ctx.config.budget_warning_threshold),
            self.observability.clone(),
            self.ctx.config.max_iterations,
            format!(
                "Audit session. Re-verify these previously passing features are still correct:\n{summary}"
            ),
        );
        let tools: Vec<ToolSpec> = vec![ToolSpec {
            name: "bash".into(),
            description: "run a shell command in the project working directory".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "command": { "type": "string" } },
                "required": ["command"],
            }),
        }];

        loop {
            match runner.step(&tools).await {
                Ok(StepOutcome::Continued { .. }) => continue,
                Ok(_) | Err(_) => break,
            }
        }

        for f in &passing {
            self.features.mark(f.index, true, Some("audited".into())).await?;
        }
        self.checkpoints.capture(session_id, CheckpointTrigger::SessionEnd, None).await?;
        Ok(SessionOutcome::AuditCompleted { reviewed: passing.len() as u32 })
    }

    /// Feed the just-captured `session_end` checkpoint into the cross-session
    /// stall trackers (progress, repeated commit, stuck passing count) and
    /// replace the session's own outcome with a stall outcome if one fires.
    /// Escalations already in progress (`AwaitingHuman`, `AuthError`, an
    /// in-session `Cyclic` signal) are left alone.
    async fn apply_stall_overrides(
        &self,
        outcome: SessionOutcome,
        end_checkpoint: &crate::checkpoint::Checkpoint,
    ) -> ForgeResult<SessionOutcome> {
        if matches!(outcome, SessionOutcome::AwaitingHuman { .. } | SessionOutcome::AuthError { .. } | SessionOutcome::Cyclic { .. }) {
            return Ok(outcome);
        }

        let made_progress = matches!(outcome, SessionOutcome::FeatureCompleted { .. });
        let threshold = self.ctx.config.max_no_progress;

        if let Some(signal) = self.stall.record_session_end(made_progress, threshold).await? {
            return Ok(SessionOutcome::NoProgress { detail: signal.detail });
        }
        if let Some(signal) = self.stall.record_git_hash(&end_checkpoint.git_commit, threshold).await? {
            return Ok(SessionOutcome::NoProgress { detail: signal.detail });
        }
        if let Some(signal) = self
            .stall
            .record_passing_count(end_checkpoint.features_passing, threshold)
            .await?
        {
            debug_assert_eq!(signal.kind, StallKind::StuckPassingCount);
            return Ok(SessionOutcome::NoProgress { detail: signal.detail });
        }
        Ok(outcome)
    }
}

/// Require the project root to be a git repository before any session
/// starts: checkpoints and rollback have nothing to anchor to otherwise.
fn verify_working_directory(project_dir: &std::path::Path) -> ForgeResult<()> {
    if !project_dir.join(".git").exists() {
        return Err(ForgeError::WorkingDirectoryMismatch {
            expected: "a git repository".to_string(),
            actual: project_dir.display().to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::{ScriptedAssistant, StopReason, Turn};
    use std::process::Command;

    async fn project() -> tempfile::TempDir {
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
        dir
    }

    #[tokio::test]
    async fn rejects_non_git_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::open(dir.path()).await.unwrap();
        let assistant: Arc<dyn AssistantClient> = Arc::new(ScriptedAssistant::new(vec![]));
        let err = match Orchestrator::new(ctx, assistant).await {
            Ok(_) => panic!("expected Orchestrator::new to fail"),
            Err(e) => e,
        };
        assert!(matches!(err, ForgeError::WorkingDirectoryMismatch { .. }));
    }

    #[tokio::test]
    async fn empty_feature_store_runs_an_initializer_session() {
        let dir = project().await;
        let ctx = Context::open(dir.path()).await.unwrap();
        let end_turn = Turn { text: Some("done".into()), tool_calls: vec![], cost_usd: 0.01, stop_reason: StopReason::EndTurn };
        let assistant: Arc<dyn AssistantClient> = Arc::new(ScriptedAssistant::new(vec![end_turn]));
        let mut orch = Orchestrator::new(ctx, assistant).await.unwrap();
        let outcome = orch.run_one_session("s-1").await.unwrap();
        assert_eq!(outcome, SessionOutcome::InitializerCompleted);
    }

    #[tokio::test]
    async fn no_work_remaining_when_every_feature_is_passing() {
        let dir = project().await;
        let ctx = Context::open(dir.path()).await.unwrap();
        ctx.store
            .write(|conn| {
                conn.execute(
                    "INSERT INTO features (idx, category, description, steps, passes, priority, failure_count, blocked_by, metadata)
                     VALUES (1, 'core', 'done already', '[]', 1, 2, 0, '[]', '{}')",
                    [],
                )
                .map_err(crate::persistence::StoreError::from)?;
                Ok(())
            })
            .await
            .unwrap();
        let assistant: Arc<dyn AssistantClient> = Arc::new(ScriptedAssistant::new(vec![]));
        let mut orch = Orchestrator::new(ctx, assistant).await.unwrap();
        let outcome = orch.run_one_session("s-1").await.unwrap();
        assert_eq!(outcome, SessionOutcome::NoWorkRemaining);
    }

    #[tokio::test]
    async fn completes_feature_on_confirmed_end_turn() {
        let dir = project().await;
        let ctx = Context::open(dir.path()).await.unwrap();
        ctx.store
            .write(|conn| {
                conn.execute(
                    "INSERT INTO features (idx, category, description, steps, passes, priority, failure_count, blocked_by, metadata)
                     VALUES (1, 'core', 'do the thing', '[]', 0, 2, 0, '[]', '{}')",
                    [],
                )
                .map_err(crate::persistence::StoreError::from)?;
                Ok(())
            })
            .await
            .unwrap();

        let end_turn = Turn { text: Some("done".into()), tool_calls: vec![], cost_usd: 0.01, stop_reason: StopReason::EndTurn };
        let assistant: Arc<dyn AssistantClient> = Arc::new(ScriptedAssistant::new(vec![end_turn.clone(), end_turn]));
        let mut orch = Orchestrator::new(ctx, assistant).await.unwrap();
        let outcome = orch.run_one_session("s-1").await.unwrap();
        assert_eq!(outcome, SessionOutcome::FeatureCompleted { index: 1 });
    }

    #[tokio::test]
    async fn session_start_and_end_checkpoints_are_captured() {
        let dir = project().await;
        let ctx = Context::open(dir.path()).await.unwrap();
        ctx.store
            .write(|conn| {
                conn.execute(
                    "INSERT INTO features (idx, category, description, steps, passes, priority, failure_count, blocked_by, metadata)
                     VALUES (1, 'core', 'do the thing', '[]', 0, 2, 0, '[]', '{}')",
                    [],
                )
                .map_err(crate::persistence::StoreError::from)?;
                Ok(())
            })
            .await
            .unwrap();

        let end_turn = Turn { text: Some("done".into()), tool_calls: vec![], cost_usd: 0.01, stop_reason: StopReason::EndTurn };
        let assistant: Arc<dyn AssistantClient> = Arc::new(ScriptedAssistant::new(vec![end_turn.clone(), end_turn]));
        let mut orch = Orchestrator::new(ctx, assistant).await.unwrap();
        orch.run_one_session("s-1").await.unwrap();

        let recent = orch.checkpoints.list_recent(10).await.unwrap();
        assert!(recent.iter().any(|c| c.trigger == "session_start"));
        assert!(recent.iter().any(|c| c.trigger == "session_end"));
    }

    #[tokio::test]
    async fn assistant_auth_failure_becomes_a_structured_outcome() {
        let dir = project().await;
        let ctx = Context::open(dir.path()).await.unwrap();
        ctx.store
            .write(|conn| {
                conn.execute(
                    "INSERT INTO features (idx, category, description, steps, passes, priority, failure_count, blocked_by, metadata)
                     VALUES (1, 'core', 'do the thing', '[]', 0, 2, 0, '[]', '{}')",
                    [],
                )
                .map_err(crate::persistence::StoreError::from)?;
                Ok(())
            })
            .await
            .unwrap();

        struct AuthFailingAssistant;
        #[async_trait::async_trait]
        impl AssistantClient for AuthFailingAssistant {
            async fn turn(
                &self,
                _messages: &[crate::assistant::Message],
                _tools: &[ToolSpec],
            ) -> Result<Turn, crate::assistant::AssistantError> {
                Err(crate::assistant::AssistantError::Auth)
            }
        }

        let assistant: Arc<dyn AssistantClient> = Arc::new(AuthFailingAssistant);
        let mut orch = Orchestrator::new(ctx, assistant).await.unwrap();
        let outcome = orch.run_one_session("s-1").await.unwrap();
        assert!(matches!(outcome, SessionOutcome::AuthError { .. }));
    }

    #[tokio::test]
    async fn resume_after_injection_denied_reports_human_denied() {
        let dir = project().await;
        let ctx = Context::open(dir.path()).await.unwrap();
        let assistant: Arc<dyn AssistantClient> = Arc::new(ScriptedAssistant::new(vec![]));
        let mut orch = Orchestrator::new(ctx, assistant).await.unwrap();

        let point = orch
            .injection
            .raise(
                crate::escalation::InjectionType::Approval,
                "ok to proceed?",
                vec!["approve".into(), "deny".into()],
                None,
                60,
                Some("deny".into()),
                vec![],
            )
            .await
            .unwrap();
        orch.injection.respond(&point.point_id, "deny").await.unwrap();

        let outcome = orch.resume_after_injection("s-1", &point.point_id).await.unwrap();
        assert!(matches!(outcome, SessionOutcome::HumanDenied { .. }));
    }
}
