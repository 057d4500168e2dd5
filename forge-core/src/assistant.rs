//! Assistant Client seam: the boundary between the orchestration core and
//! whatever coding-assistant API actually runs a turn. `forge-core` depends
//! only on this trait; the concrete HTTP-backed adapter lives in
//! `crates/forge-cli` so swapping providers never touches orchestration
//! logic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
    pub fn tool(content: impl Into<String>) -> Self {
        Self { role: Role::Tool, content: content.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// One assistant turn: either free text, or one or more proposed tool
/// calls the Session Runner must gate through Risk/Autonomy before
/// executing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub cost_usd: f64,
    pub stop_reason: StopReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("assistant request failed: {0}")]
    Request(String),
    #[error("assistant response could not be parsed: {0}")]
    Parse(String),
    #[error("assistant credential rejected or missing")]
    Auth,
    #[error("assistant rate-limited; retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
}

pub type AssistantResult<T> = Result<T, AssistantError>;

/// The seam `forge-core` programs against. A turn takes the full message
/// history plus the tool specs currently on offer and returns exactly one
/// assistant turn; looping is the Session Runner's job, not the client's.
#[async_trait]
pub trait AssistantClient: Send + Sync {
    async fn turn(&self, messages: &[Message], tools: &[ToolSpec]) -> AssistantResult<Turn>;
}

/// In-memory client driven entirely by a caller-supplied script, used by
/// Session Runner and Orchestrator tests so they never depend on network
/// access or a live credential.
#[cfg(any(test, feature = "test-util"))]
pub struct ScriptedAssistant {
    turns: std::sync::Mutex<std::collections::VecDeque<Turn>>,
}

#[cfg(any(test, feature = "test-util"))]
impl ScriptedAssistant {
    pub fn new(turns: Vec<Turn>) -> Self {
        Self {
            turns: std::sync::Mutex::new(turns.into()),
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl AssistantClient for ScriptedAssistant {
    async fn turn(&self, _messages: &[Message], _tools: &[ToolSpec]) -> AssistantResult<Turn> {
        self.turns
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AssistantError::Request("scripted assistant exhausted".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_assistant_plays_back_turns_in_order() {
        let client = ScriptedAssistant::new(vec![
            Turn { text: Some("hi".into()), tool_calls: vec![], cost_usd: 0.01, stop_reason: StopReason::EndTurn },
            Turn { text: None, tool_calls: vec![], cost_usd: 0.02, stop_reason: StopReason::ToolUse },
        ]);
        let first = client.turn(&[], &[]).await.unwrap();
        assert_eq!(first.text.as_deref(), Some("hi"));
        let second = client.turn(&[], &[]).await.unwrap();
        assert_eq!(second.stop_reason, StopReason::ToolUse);
        assert!(client.turn(&[], &[]).await.is_err());
    }
}
