//! Error types for the voice interaction orchestrator.

/// Top-level error type for the assistant.
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    /// Speech input adapter error (recognizer-level).
    #[error("speech input error: {0}")]
    Input(String),

    /// Speech output adapter error (synthesis or playback).
    #[error("speech output error: {0}")]
    Output(String),

    /// Bad status or malformed response from the chat endpoint.
    #[error("LLM error (status {status}): {message}")]
    Llm {
        /// HTTP status of the failed call (0 when the request never reached
        /// the endpoint).
        status: u16,
        /// Error message, parsed from the response body when available.
        message: String,
    },

    /// A tool invocation returned a non-success HTTP status.
    #[error("tool invocation failed (status {status}): {body}")]
    ToolInvocation {
        /// HTTP status reported by the proxy for the downstream call.
        status: u16,
        /// Raw response body, for diagnostics and tool-result serialization.
        body: String,
    },

    /// A tool invocation did not complete within its deadline.
    #[error("tool invocation timed out: {0}")]
    Timeout(String),

    /// No API key is configured for the chat endpoint.
    #[error("no LLM API key configured")]
    MissingCredentials,

    /// A tool with this name is already registered.
    #[error("duplicate tool name: {0}")]
    DuplicateName(String),

    /// No tool is registered under the requested name.
    #[error("unknown tool: {0}")]
    NotFound(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, VoiceError>;
