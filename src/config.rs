//! Configuration types for the voice assistant session.

use crate::error::{Result, VoiceError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration for an assistant session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Chat endpoint settings.
    pub llm: LlmConfig,
    /// Speech synthesis settings.
    pub tts: TtsConfig,
    /// Session behavior: phrases, messages, timings.
    pub conversation: ConversationConfig,
    /// Tool invocation transport settings.
    pub proxy: ProxyConfig,
    /// Names of tools auto-run once at session start to populate the
    /// system-variable map.
    pub system_tools: Vec<String>,
}

/// Chat endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of the chat API, including the version segment
    /// (e.g. `https://api.openai.com/v1`).
    pub api_url: String,
    /// Bearer token. Empty means unconfigured: the engine fails turns with
    /// `MissingCredentials` without calling out.
    pub api_key: String,
    /// Model identifier sent in requests.
    pub model: String,
    /// System prompt template. `{name}` placeholders are substituted from
    /// system variables before each request.
    pub system_prompt: String,
    /// How many trailing history messages accompany each request. The
    /// system prompt is not counted. 0 means unbounded.
    pub memory_length: usize,
    /// Per-request timeout in seconds.
    pub request_timeout_s: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".to_owned(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_owned(),
            system_prompt: "Você é um assistente de voz prestativo. Responda de forma breve, \
                            pois suas respostas serão faladas em voz alta."
                .to_owned(),
            memory_length: 10,
            request_timeout_s: 60,
        }
    }
}

/// Which synthesis backend plays assistant speech.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsBackend {
    /// The injected local engine.
    #[default]
    Local,
    /// A remote HTTP synthesis service, with local fallback on failure.
    Remote,
}

/// Speech synthesis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Backend selection.
    pub backend: TtsBackend,
    /// Base URL of the remote synthesis API.
    pub api_url: String,
    /// Bearer token for the remote synthesis API.
    pub api_key: String,
    /// Remote model identifier.
    pub model: String,
    /// Remote voice identifier.
    pub voice: String,
    /// Per-request timeout in seconds for the remote backend.
    pub request_timeout_s: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            backend: TtsBackend::Local,
            api_url: "https://api.openai.com/v1".to_owned(),
            api_key: String::new(),
            model: "tts-1".to_owned(),
            voice: "alloy".to_owned(),
            request_timeout_s: 30,
        }
    }
}

/// Session behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Phrases that open an interaction session while idle.
    pub activation_phrases: Vec<String>,
    /// Phrases that close the session while listening.
    pub deactivation_phrases: Vec<String>,
    /// Spoken when the session is activated for the first time.
    pub welcome_message: String,
    /// Spoken on re-activation within the same process lifetime.
    pub continuation_message: String,
    /// Spoken when a turn fails (chat endpoint error or missing key).
    pub error_message: String,
    /// Utterances shorter than this many characters are discarded as noise.
    pub min_utterance_chars: usize,
    /// Delay before restarting the input adapter after speech completes,
    /// so the recognizer does not pick up the assistant's tail-end audio.
    pub settle_delay_ms: u64,
    /// Backoff before retrying the input adapter after a transient error.
    pub retry_backoff_ms: u64,
    /// Seconds of listening inactivity before the session returns to idle.
    /// 0 disables the timeout.
    pub idle_timeout_s: u32,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            activation_phrases: vec!["ativar".to_owned()],
            deactivation_phrases: vec!["desativar".to_owned(), "fechar".to_owned()],
            welcome_message: "Olá! Como posso ajudar?".to_owned(),
            continuation_message: "Pois não?".to_owned(),
            error_message: "Desculpe, ocorreu um problema ao processar sua solicitação."
                .to_owned(),
            min_utterance_chars: 3,
            settle_delay_ms: 500,
            retry_backoff_ms: 1200,
            idle_timeout_s: 0,
        }
    }
}

/// Tool invocation transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Base URL of the same-origin proxy that executes tool HTTP requests.
    pub base_url: String,
    /// Per-invocation timeout in seconds.
    pub request_timeout_s: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/proxy".to_owned(),
            request_timeout_s: 30,
        }
    }
}

impl AssistantConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            VoiceError::Config(format!("failed to read config {}: {e}", path.display()))
        })?;
        let config: Self = toml::from_str(&raw).map_err(|e| {
            VoiceError::Config(format!("invalid config {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = toml::to_string_pretty(self)
            .map_err(|e| VoiceError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, raw).map_err(|e| {
            VoiceError::Config(format!("failed to write config {}: {e}", path.display()))
        })?;
        Ok(())
    }

    /// Validate cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns an error if a required field is empty or inconsistent.
    pub fn validate(&self) -> Result<()> {
        if self.conversation.activation_phrases.is_empty() {
            return Err(VoiceError::Config(
                "at least one activation phrase is required".to_owned(),
            ));
        }
        if self.llm.api_url.trim().is_empty() {
            return Err(VoiceError::Config("llm.api_url is empty".to_owned()));
        }
        if self.tts.backend == TtsBackend::Remote && self.tts.api_url.trim().is_empty() {
            return Err(VoiceError::Config(
                "tts.api_url is required for the remote backend".to_owned(),
            ));
        }
        Ok(())
    }
}
