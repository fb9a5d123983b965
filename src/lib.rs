//! Sibyl: a voice interaction orchestrator.
//!
//! Coordinates a speech input adapter, a speech output adapter, and an LLM
//! conversation engine under one mutually-exclusive state machine:
//! Microphone → activation gate → LLM (with one tool round-trip) → TTS →
//! back to listening.
//!
//! # Architecture
//!
//! The session is built from independent pieces connected by async
//! channels:
//! - **Speech input**: an injected [`input::Recognizer`] backend behind a
//!   policy adapter (noise filtering, idempotent start, error
//!   classification)
//! - **Speech output**: an injected [`output::Synthesizer`] behind a
//!   preemptive single-utterance adapter with an exactly-once completion
//!   contract and an audio-intensity signal
//! - **Conversation engine**: append-only history and a one-round
//!   tool-calling loop against a chat-completions endpoint
//! - **Tool registry**: named HTTP-bound actions with placeholder
//!   substitution from system variables
//! - **Orchestrator**: the single-enum state machine tying it together

pub mod actions;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod input;
pub mod llm;
pub mod orchestrator;
pub mod output;
pub mod phrase;
pub mod tools;
pub mod vars;

pub use config::AssistantConfig;
pub use error::{Result, VoiceError};
pub use events::RuntimeEvent;
pub use orchestrator::{Command, Orchestrator, Phase, SessionHandle};
