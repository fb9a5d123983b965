//! Chat endpoint client.
//!
//! Speaks the chat-completions wire format: `POST {api_url}/chat/completions`
//! with bearer auth, a message list, and optional flat
//! `{name, description, parameters}` tool entries. Responses are single-shot
//! (no streaming); tool-call requests arrive as
//! `tool_calls: [{id, function: {name, arguments}}]` on the assistant
//! message.

use crate::config::LlmConfig;
use crate::engine::{Message, Role, ToolCallRequest};
use crate::error::{Result, VoiceError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

/// One assistant response: direct text, tool-call requests, or both.
#[derive(Debug, Clone, Default)]
pub struct AssistantTurn {
    /// Text content. May be empty when tool calls are pending.
    pub content: String,
    /// Requested tool invocations, in request order.
    pub tool_calls: Vec<ToolCallRequest>,
}

/// Seam over the chat endpoint so tests can inject scripted responses.
#[async_trait]
pub trait ChatEndpoint: Send + Sync {
    /// Run one completion over `messages`, offering `tools` (flat
    /// `{name, description, parameters}` entries; empty offers none).
    ///
    /// # Errors
    ///
    /// Returns `Llm{status, message}` for transport failures, non-2xx
    /// statuses, and malformed response bodies.
    async fn complete(&self, messages: &[Message], tools: &[Value]) -> Result<AssistantTurn>;
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Convert a history message to the wire format.
fn message_to_wire(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => serde_json::json!({
            "role": "tool",
            "content": msg.content,
            "tool_call_id": msg.tool_call_id,
            "name": msg.tool_name,
        }),
        Role::Assistant if !msg.tool_calls.is_empty() => {
            let calls: Vec<Value> = msg
                .tool_calls
                .iter()
                .map(|c| {
                    serde_json::json!({
                        "id": c.id,
                        "type": "function",
                        "function": {
                            "name": c.name,
                            "arguments": c.arguments.to_string(),
                        },
                    })
                })
                .collect();
            serde_json::json!({
                "role": "assistant",
                "content": msg.content,
                "tool_calls": calls,
            })
        }
        role => serde_json::json!({
            "role": role.to_string(),
            "content": msg.content,
        }),
    }
}

/// Build the request body for one completion call.
fn build_request(model: &str, messages: &[Message], tools: &[Value]) -> Value {
    let wire_messages: Vec<Value> = messages.iter().map(message_to_wire).collect();
    let mut body = serde_json::json!({
        "model": model,
        "messages": wire_messages,
    });
    if !tools.is_empty()
        && let Some(obj) = body.as_object_mut()
    {
        obj.insert("tools".into(), Value::Array(tools.to_vec()));
        obj.insert("tool_choice".into(), Value::String("auto".into()));
    }
    body
}

fn parse_turn(response: ChatResponse, status: u16) -> Result<AssistantTurn> {
    let Some(choice) = response.choices.into_iter().next() else {
        return Err(VoiceError::Llm {
            status,
            message: "response carried no choices".to_owned(),
        });
    };

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|c| {
            let arguments = match serde_json::from_str(&c.function.arguments) {
                Ok(v) => v,
                Err(e) => {
                    warn!(
                        "unparsable arguments for tool call '{}': {e}",
                        c.function.name
                    );
                    Value::Object(serde_json::Map::new())
                }
            };
            ToolCallRequest {
                id: c.id,
                name: c.function.name,
                arguments,
            }
        })
        .collect();

    Ok(AssistantTurn {
        content: choice.message.content.unwrap_or_default(),
        tool_calls,
    })
}

/// HTTP client for the chat endpoint.
pub struct ChatClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl ChatClient {
    /// Create a client for the configured endpoint.
    #[must_use]
    pub fn new(config: &LlmConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_s))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: format!("{}/chat/completions", config.api_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl ChatEndpoint for ChatClient {
    async fn complete(&self, messages: &[Message], tools: &[Value]) -> Result<AssistantTurn> {
        let body = build_request(&self.model, messages, tools);

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::Llm {
                status: 0,
                message: format!("request failed: {e}"),
            })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let raw = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&raw)
                .map(|b| b.error.message)
                .unwrap_or(raw);
            return Err(VoiceError::Llm { status, message });
        }

        let parsed: ChatResponse =
            response.json().await.map_err(|e| VoiceError::Llm {
                status,
                message: format!("malformed response: {e}"),
            })?;
        parse_turn(parsed, status)
    }
}
