//! Runtime events emitted by the orchestrator for embedding UIs.
//!
//! Intentionally lightweight (no heavy payloads) so the orchestrator can
//! emit without blocking its transition loop. Consumers subscribe through
//! the session handle's broadcast channel; a lagging consumer loses events,
//! never stalls the session.

use crate::actions::TriggerAction;
use crate::orchestrator::Phase;

/// Events that describe what the session is doing "right now".
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// The orchestrator moved to a new phase.
    PhaseChanged {
        /// The phase just entered.
        phase: Phase,
    },
    /// The input adapter started or stopped listening.
    ListeningChanged {
        /// Whether the microphone is open.
        listening: bool,
    },
    /// A user utterance was accepted for processing.
    UserUtterance {
        /// Normalized utterance text.
        text: String,
    },
    /// The assistant produced a reply (about to be spoken).
    AssistantReply {
        /// Reply text.
        text: String,
    },
    /// The assistant requested a tool invocation.
    ToolCall {
        /// Correlation ID, stable across call and result.
        id: String,
        /// Tool name.
        name: String,
    },
    /// A tool invocation finished.
    ToolResult {
        /// Correlation ID of the originating call.
        id: String,
        /// Tool name.
        name: String,
        /// Whether the invocation succeeded.
        success: bool,
    },
    /// A client-side trigger action should be executed by the UI. The UI
    /// reports dismissal through the session handle.
    ActionRequested {
        /// The matched action.
        action: TriggerAction,
    },
    /// The assistant is permanently unavailable. Terminal; the surrounding
    /// application must surface this as an actionable message.
    Unavailable {
        /// Human-readable reason.
        reason: String,
    },
}
