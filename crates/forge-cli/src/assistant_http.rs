//! HTTP-backed [`AssistantClient`]: the one piece of the system that
//! actually talks to a model provider. Everything upstream of this file
//! (session runner, orchestrator, gating) only ever sees the trait.

use async_trait::async_trait;
use forge_core::assistant::{
    AssistantClient, AssistantError, AssistantResult, Message, Role, StopReason, ToolCall, ToolSpec, Turn,
};
use serde::{Deserialize, Serialize};

/// Per-million-token pricing used to turn a response's usage counters into
/// an approximate dollar cost for the Budget Tracker. Deliberately rough:
/// exact billing reconciliation is out of scope for a running estimate.
const INPUT_COST_PER_MTOK: f64 = 3.0;
const OUTPUT_COST_PER_MTOK: f64 = 15.0;

pub struct HttpAssistantClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    model: String,
}

impl HttpAssistantClient {
    pub fn new(base_url: String, token: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            token,
            model,
        }
    }
}

#[derive(Serialize)]
struct RequestBody<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct WireTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Deserialize)]
struct ResponseBody {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: serde_json::Value },
}

#[derive(Deserialize, Default)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

#[async_trait]
impl AssistantClient for HttpAssistantClient {
    async fn turn(&self, messages: &[Message], tools: &[ToolSpec]) -> AssistantResult<Turn> {
        let wire_messages = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| WireMessage {
                role: match m.role {
                    Role::User | Role::Tool => "user",
                    Role::Assistant => "assistant",
                    Role::System => unreachable!(),
                },
                content: m.content.clone(),
            })
            .collect();

        let body = RequestBody {
            model: &self.model,
            max_tokens: 4096,
            messages: wire_messages,
            tools: tools
                .iter()
                .map(|t| WireTool {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: t.parameters.clone(),
                })
                .collect(),
        };

        let response = self
            .http
            .post(format!("{}/messages", self.base_url))
            .bearer_auth(&self.token)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| AssistantError::Request(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(AssistantError::Auth);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(30);
            return Err(AssistantError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|b| b.error.message)
                .unwrap_or(text);
            return Err(AssistantError::Request(format!("{status}: {message}")));
        }

        let parsed: ResponseBody = response
            .json()
            .await
            .map_err(|e| AssistantError::Parse(e.to_string()))?;

        let mut text = None;
        let mut tool_calls = Vec::new();
        for block in parsed.content {
            match block {
                ContentBlock::Text { text: t } => {
                    text = Some(text.map_or(t.clone(), |existing: String| format!("{existing}\n{t}")));
                }
                ContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall { id, name, arguments: input });
                }
            }
        }

        let stop_reason = match parsed.stop_reason.as_deref() {
            Some("tool_use") => StopReason::ToolUse,
            Some("max_tokens") => StopReason::MaxTokens,
            _ => StopReason::EndTurn,
        };

        let cost_usd = (parsed.usage.input_tokens as f64 / 1_000_000.0) * INPUT_COST_PER_MTOK
            + (parsed.usage.output_tokens as f64 / 1_000_000.0) * OUTPUT_COST_PER_MTOK;

        Ok(Turn { text, tool_calls, cost_usd, stop_reason })
    }
}
