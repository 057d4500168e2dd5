//! Session Runner: drives one assistant session — the message loop, the
//! tool-call gating pipeline (Risk → Autonomy → Escalation), completion
//! detection, and budget/stall bookkeeping for a single feature attempt.

use crate::assistant::{AssistantClient, Message, StopReason, ToolSpec, Turn};
use crate::autonomy::AutonomyManager;
use crate::error::{ForgeError, ForgeResult};
use crate::observability::{BudgetTracker, Observability};
use crate::risk::RiskLevel;
use crate::stall::InSessionCycleTracker;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initializing,
    Active,
    Completed,
    Failed,
    MaxIterationsReached,
    AwaitingHuman,
}

/// A tool call the runner decided not to execute immediately, paired with
/// why. The Orchestrator turns this into a human injection point.
#[derive(Debug, Clone)]
pub struct GatedCall {
    pub tool_name: String,
    pub risk: RiskLevel,
    pub reversible: bool,
    pub affects_source_of_truth: bool,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// The assistant produced text and/or tool calls that were all either
    /// executed or had no side effects worth gating.
    Continued { assistant_text: Option<String> },
    /// At least one proposed tool call exceeded what the current autonomy
    /// level permits; the caller must resolve it (typically via Human
    /// Injection) before the next step.
    Gated(Vec<GatedCall>),
    /// The assistant's turn looks like task completion (an `end_turn` stop
    /// with no further tool calls pending).
    Completed { assistant_text: Option<String> },
    /// The in-session cycle tracker flagged a repeating action.
    Stalled(crate::stall::StallSignal),
    MaxIterationsReached,
}

pub struct SessionRunner {
    client: Arc<dyn AssistantClient>,
    autonomy: AutonomyManager,
    budget: BudgetTracker,
    cycle_tracker: InSessionCycleTracker,
    observability: Arc<Observability>,
    session_id: String,
    iteration: u32,
    max_iterations: u32,
    status: SessionStatus,
    messages: Vec<Message>,
}

impl SessionRunner {
    pub fn new(
        session_id: String,
        client: Arc<dyn AssistantClient>,
        autonomy: AutonomyManager,
        budget: BudgetTracker,
        observability: Arc<Observability>,
        max_iterations: u32,
        system_prompt: String,
    ) -> Self {
        Self {
            client,
            autonomy,
            budget,
            cycle_tracker: InSessionCycleTracker::new(),
            observability,
            session_id,
            iteration: 0,
            max_iterations,
            status: SessionStatus::Initializing,
            messages: vec![Message::system(system_prompt)],
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn push_user_message(&mut self, content: impl Into<String>) {
        self.messages.push(Message::user(content));
    }

    /// Run exactly one request/response cycle against the assistant and
    /// classify the result. The caller (Orchestrator) decides what happens
    /// next based on the returned [`StepOutcome`].
    pub async fn step(&mut self, tools: &[ToolSpec]) -> ForgeResult<StepOutcome> {
        if self.status == SessionStatus::Initializing {
            self.status = SessionStatus::Active;
        }
        if self.iteration >= self.max_iterations {
            self.status = SessionStatus::MaxIterationsReached;
            return Ok(StepOutcome::MaxIterationsReached);
        }
        self.iteration += 1;

        self.observability.emit(
            &self.session_id,
            "turn_started",
            serde_json::json!({ "iteration": self.iteration }),
        );

        let turn: Turn = self.client.turn(&self.messages, tools).await.map_err(|e| match e {
            crate::assistant::AssistantError::Auth => ForgeError::AssistantAuth { message: e.to_string() },
            other => ForgeError::validation(format!("assistant turn failed: {other}")),
        })?;

        self.budget.record_spend(turn.cost_usd);
        if let Some(text) = &turn.text {
            self.messages.push(Message::assistant(text.clone()));
        }

        self.observability.emit(
            &self.session_id,
            "turn_completed",
            serde_json::json!({
                "iteration": self.iteration,
                "cost_usd": turn.cost_usd,
                "tool_calls": turn.tool_calls.len(),
                "stop_reason": turn.stop_reason,
            }),
        );

        if turn.tool_calls.is_empty() {
            return Ok(self.classify_textual_turn(turn));
        }

        let mut gated = Vec::new();
        for call in &turn.tool_calls {
            let fingerprint = fingerprint(&call.name, &call.arguments);
            if let Some(signal) = self.cycle_tracker.record(&fingerprint) {
                return Ok(StepOutcome::Stalled(signal));
            }

            let input = tool_input(call);
            let decision = self.autonomy.check(&call.name, &input, None);
            if !decision.allowed {
                let assessment = crate::risk::assess(&call.name, &input);
                gated.push(GatedCall {
                    tool_name: call.name.clone(),
                    risk: assessment.level,
                    reversible: assessment.reversible,
                    affects_source_of_truth: assessment.affects_source_of_truth,
                    reason: decision.reason,
                });
            }
        }

        if !gated.is_empty() {
            self.status = SessionStatus::AwaitingHuman;
            return Ok(StepOutcome::Gated(gated));
        }

        Ok(StepOutcome::Continued { assistant_text: turn.text })
    }

    fn classify_textual_turn(&mut self, turn: Turn) -> StepOutcome {
        if turn.stop_reason == StopReason::EndTurn {
            self.status = SessionStatus::Completed;
            StepOutcome::Completed { assistant_text: turn.text }
        } else {
            StepOutcome::Continued { assistant_text: turn.text }
        }
    }

    /// Record an observed outcome (e.g. tests passed after applying the
    /// assistant's change) so the Autonomy Manager can adjust its level.
    pub fn record_outcome(&mut self, success: bool) {
        self.autonomy.record_outcome(success);
    }

    pub fn budget(&self) -> &BudgetTracker {
        &self.budget
    }

    /// Before declaring completion, append one more turn nudging the
    /// assistant to re-read the files it touched and confirm there is
    /// nothing left outstanding, rather than trusting a bare `end_turn`.
    pub fn request_completion_confirmation(&mut self) {
        self.messages.push(Message::user(
            "Before finishing, re-read every file you changed this session and confirm the feature's acceptance criteria are met. If anything is incomplete, continue working instead of ending the turn.",
        ));
    }
}

/// The string a tool call's arguments boil down to for risk classification:
/// the `command` field for `bash`, the full argument object otherwise.
fn tool_input(call: &crate::assistant::ToolCall) -> String {
    if call.name == "bash" {
        call.arguments
            .get("command")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    } else {
        call.arguments.to_string()
    }
}

fn fingerprint(tool_name: &str, arguments: &serde_json::Value) -> String {
    let mut hasher = DefaultHasher::new();
    tool_name.hash(&mut hasher);
    arguments.to_string().hash(&mut hasher);
    format!("{tool_name}:{:x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::{AssistantError, ScriptedAssistant, ToolCall};
    use crate::autonomy::AutonomyLevel;

    async fn runner(turns: Vec<Turn>) -> SessionRunner {
        let client: Arc<dyn AssistantClient> = Arc::new(ScriptedAssistant::new(turns));
        let store_dir = tempfile::tempdir().unwrap();
        let store = crate::persistence::Store::open(store_dir.path().join("p.db")).await.unwrap();
        SessionRunner::new(
            "s-1".into(),
            client,
            AutonomyManager::new(AutonomyLevel::ExecuteSafe),
            BudgetTracker::new(10.0, 0.8),
            Arc::new(Observability::new(store)),
            10,
            "system prompt".into(),
        )
    }

    #[tokio::test]
    async fn end_turn_with_no_tools_completes() {
        let mut r = runner(vec![Turn {
            text: Some("done".into()),
            tool_calls: vec![],
            cost_usd: 0.01,
            stop_reason: StopReason::EndTurn,
        }]).await;
        let outcome = r.step(&[]).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Completed { .. }));
        assert_eq!(r.status(), SessionStatus::Completed);
    }

    #[tokio::test]
    async fn safe_tool_call_continues_unattended() {
        let mut r = runner(vec![Turn {
            text: None,
            tool_calls: vec![ToolCall { id: "1".into(), name: "bash".into(), arguments: serde_json::json!({"command": "cargo test"}) }],
            cost_usd: 0.01,
            stop_reason: StopReason::ToolUse,
        }]).await;
        let outcome = r.step(&[]).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Continued { .. }));
    }

    #[tokio::test]
    async fn risky_tool_call_is_gated() {
        let mut r = runner(vec![Turn {
            text: None,
            tool_calls: vec![ToolCall { id: "1".into(), name: "bash".into(), arguments: serde_json::json!({"command": "sudo rm -rf /var/lib"}) }],
            cost_usd: 0.01,
            stop_reason: StopReason::ToolUse,
        }]).await;
        let outcome = r.step(&[]).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Gated(_)));
        assert_eq!(r.status(), SessionStatus::AwaitingHuman);
    }

    #[tokio::test]
    async fn max_iterations_is_enforced() {
        let mut r = runner(vec![]).await;
        r.max_iterations = 0;
        let outcome = r.step(&[]).await.unwrap();
        assert!(matches!(outcome, StepOutcome::MaxIterationsReached));
    }

    #[tokio::test]
    async fn assistant_failure_is_surfaced_as_forge_error() {
        let client: Arc<dyn AssistantClient> = Arc::new(FailingAssistant);
        let store_dir = tempfile::tempdir().unwrap();
        let store = crate::persistence::Store::open(store_dir.path().join("p.db")).await.unwrap();
        let mut r = SessionRunner::new(
            "s-1".into(),
            client,
            AutonomyManager::new(AutonomyLevel::ExecuteSafe),
            BudgetTracker::new(10.0, 0.8),
            Arc::new(Observability::new(store)),
            10,
            "system".into(),
        );
        let err = r.step(&[]).await.unwrap_err();
        assert!(matches!(err, ForgeError::AssistantAuth { .. }));
    }

    struct FailingAssistant;
    #[async_trait::async_trait]
    impl AssistantClient for FailingAssistant {
        async fn turn(&self, _messages: &[Message], _tools: &[ToolSpec]) -> Result<Turn, AssistantError> {
            Err(AssistantError::Auth)
        }
    }
}
