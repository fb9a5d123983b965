//! Conversation engine: append-only message history and the turn loop.
//!
//! One user turn runs to completion through at most one tool round-trip:
//! a first completion offering the registry's tools, sequential invocation
//! of any requested calls (failures serialized as tool results, never
//! thrown), and a follow-up completion with no tools offered. The follow-up
//! never re-offers tools, so deeper chains are impossible by construction.

use crate::config::LlmConfig;
use crate::error::{Result, VoiceError};
use crate::llm::ChatEndpoint;
use crate::tools::ToolRegistry;
use crate::vars::{self, SystemVariables};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// The role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// User input.
    User,
    /// Assistant (model) output.
    Assistant,
    /// Tool execution result.
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// One tool invocation requested by the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Correlation ID, echoed on the matching tool-result message.
    pub id: String,
    /// Registered tool name.
    pub name: String,
    /// Parsed JSON arguments.
    pub arguments: Value,
}

/// One turn in the conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message.
    pub role: Role,
    /// Text content. May be empty on assistant messages with pending
    /// tool calls.
    pub content: String,
    /// Tool calls requested by the assistant (assistant messages only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Correlates a tool-result message to its request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Name of the tool that produced a tool-result message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl Message {
    /// System instructions.
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    /// A user utterance.
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    /// A direct assistant answer.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// An assistant message carrying tool-call requests.
    pub fn assistant_with_tools(
        content: impl Into<String>,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
            tool_name: None,
        }
    }

    /// A tool-result message correlated to its request.
    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
            tool_name: Some(tool_name.into()),
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
        }
    }
}

/// Result of one completed user turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// The answer to speak.
    pub final_text: String,
    /// Whether the turn went through a tool round-trip.
    pub used_tools: bool,
}

/// Runs user turns against the chat endpoint, owning the history.
pub struct ConversationEngine {
    endpoint: Arc<dyn ChatEndpoint>,
    history: Vec<Message>,
    system_prompt: String,
    memory_length: usize,
    credentials_present: bool,
}

impl ConversationEngine {
    /// Create an engine over the given endpoint and settings.
    pub fn new(endpoint: Arc<dyn ChatEndpoint>, config: &LlmConfig) -> Self {
        Self {
            endpoint,
            history: Vec::new(),
            system_prompt: config.system_prompt.clone(),
            memory_length: config.memory_length,
            credentials_present: !config.api_key.trim().is_empty(),
        }
    }

    /// The full conversation history, in append order.
    #[must_use]
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Build the request window: substituted system prompt plus the last
    /// N history messages (all of them when N is 0).
    fn window(&self, system_vars: &SystemVariables) -> Vec<Message> {
        let prompt =
            vars::substitute(&self.system_prompt, &serde_json::Map::new(), system_vars);
        let tail_start = if self.memory_length == 0 {
            0
        } else {
            self.history.len().saturating_sub(self.memory_length)
        };
        let mut messages = Vec::with_capacity(1 + self.history.len() - tail_start);
        messages.push(Message::system(prompt));
        messages.extend(self.history[tail_start..].iter().cloned());
        messages
    }

    /// Run one user turn to completion.
    ///
    /// The user message is appended to history before anything else and
    /// stays there on every failure path.
    ///
    /// # Errors
    ///
    /// Returns `MissingCredentials` when no API key is configured (no
    /// network call is made) or `Llm` when a completion call fails. Tool
    /// invocation failures never surface here; they are serialized as tool
    /// results and the turn proceeds.
    pub async fn run_turn(
        &mut self,
        utterance: &str,
        registry: &ToolRegistry,
        system_vars: &SystemVariables,
    ) -> Result<TurnOutcome> {
        self.history.push(Message::user(utterance));

        if !self.credentials_present {
            return Err(VoiceError::MissingCredentials);
        }

        let tools = registry.schemas_for_api();
        let first = self
            .endpoint
            .complete(&self.window(system_vars), &tools)
            .await?;

        if first.tool_calls.is_empty() {
            info!("turn answered directly");
            self.history.push(Message::assistant(first.content.clone()));
            return Ok(TurnOutcome {
                final_text: first.content,
                used_tools: false,
            });
        }

        info!("assistant requested {} tool call(s)", first.tool_calls.len());
        self.history.push(Message::assistant_with_tools(
            first.content.clone(),
            first.tool_calls.clone(),
        ));

        for call in &first.tool_calls {
            let args = call
                .arguments
                .as_object()
                .cloned()
                .unwrap_or_default();
            let content = match registry.invoke(&call.name, &args, system_vars).await {
                Ok(value) => value.to_string(),
                Err(e) => {
                    warn!("tool '{}' failed: {e}", call.name);
                    serde_json::json!({"error": e.to_string()}).to_string()
                }
            };
            self.history
                .push(Message::tool_result(&call.id, &call.name, content));
        }

        // Follow-up completion with no tools offered: one round-trip max.
        let second = self.endpoint.complete(&self.window(system_vars), &[]).await?;
        self.history
            .push(Message::assistant(second.content.clone()));
        Ok(TurnOutcome {
            final_text: second.content,
            used_tools: true,
        })
    }
}
