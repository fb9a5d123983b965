//! Speech input adapter: policy layer over an injected recognition backend.
//!
//! The backend pushes raw recognition events over a channel; the adapter
//! normalizes utterances (trim, lowercase), discards noise shorter than the
//! configured minimum, classifies errors as permanent or transient, and
//! enforces idempotent start/stop. Utterances received while the adapter is
//! stopped are dropped, which is what keeps overlapping speech out of the
//! orchestrator during processing and playback.

use crate::error::{Result, VoiceError};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Error classification for recognition failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputErrorKind {
    /// Microphone permission denied. Permanent.
    NotAllowed,
    /// No speech detected before the backend gave up. Transient.
    NoSpeech,
    /// Audio capture failed mid-stream. Transient.
    AudioCaptureFailure,
    /// The platform offers no recognition support. Permanent.
    Unsupported,
    /// Anything else. Transient.
    Other,
}

impl InputErrorKind {
    /// Whether this failure forbids further `start()` calls until the
    /// surrounding application re-initializes permission.
    #[must_use]
    pub fn is_permanent(self) -> bool {
        matches!(self, Self::NotAllowed | Self::Unsupported)
    }
}

/// Raw events pushed by a recognition backend.
#[derive(Debug, Clone)]
pub enum RecognizerEvent {
    /// A finalized (non-interim) recognition result.
    Final(String),
    /// The backend reported an error.
    Error {
        /// Failure classification.
        kind: InputErrorKind,
        /// Backend-specific detail for logging.
        message: String,
    },
}

/// Error surface of a recognition backend's start/stop calls.
#[derive(Debug, thiserror::Error)]
pub enum RecognizerError {
    /// The stream is already running. The adapter treats this as success.
    #[error("recognizer already active")]
    AlreadyActive,
    /// The stream could not be started or stopped.
    #[error("recognizer failed: {message}")]
    Failed {
        /// Failure classification.
        kind: InputErrorKind,
        /// Backend-specific detail.
        message: String,
    },
}

/// A continuous speech-recognition backend.
///
/// Implementations push [`RecognizerEvent`]s on the channel handed to the
/// adapter at construction. `start`/`stop` control the stream.
#[async_trait]
pub trait Recognizer: Send {
    /// Begin continuous recognition.
    ///
    /// # Errors
    ///
    /// `AlreadyActive` if the stream is running (treated as success
    /// upstream), `Failed` otherwise.
    async fn start(&mut self) -> std::result::Result<(), RecognizerError>;

    /// End recognition.
    ///
    /// # Errors
    ///
    /// `Failed` if the stream could not be stopped.
    async fn stop(&mut self) -> std::result::Result<(), RecognizerError>;
}

/// Policy events emitted toward the orchestrator.
#[derive(Debug, Clone)]
pub enum InputEvent {
    /// A normalized, noise-filtered utterance.
    Utterance(String),
    /// The adapter started or stopped listening.
    ListeningChanged(bool),
    /// A recognition error, already classified.
    Error(InputErrorKind),
}

/// Policy wrapper over a [`Recognizer`].
pub struct SpeechInputAdapter {
    recognizer: Box<dyn Recognizer>,
    events: mpsc::Receiver<RecognizerEvent>,
    listening: bool,
    failed_permanently: bool,
    min_utterance_chars: usize,
    /// Queued state-change notifications, drained by `next_event` ahead of
    /// backend events so observers see starts/stops in order.
    pending: Vec<InputEvent>,
}

impl SpeechInputAdapter {
    /// Wrap a recognizer whose events arrive on `events`.
    #[must_use]
    pub fn new(
        recognizer: Box<dyn Recognizer>,
        events: mpsc::Receiver<RecognizerEvent>,
        min_utterance_chars: usize,
    ) -> Self {
        Self {
            recognizer,
            events,
            listening: false,
            failed_permanently: false,
            min_utterance_chars,
            pending: Vec::new(),
        }
    }

    /// Whether the adapter is currently listening.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// Begin listening. No-op when already listening; the backend's
    /// "already active" complaint is treated as success.
    ///
    /// # Errors
    ///
    /// Returns an error after a permanent failure (the orchestrator must
    /// not retry until the application re-initializes permission) or when
    /// the backend refuses to start.
    pub async fn start(&mut self) -> Result<()> {
        self.drain_stale();
        if self.failed_permanently {
            return Err(VoiceError::Input(
                "recognizer permanently unavailable".to_owned(),
            ));
        }
        if self.listening {
            return Ok(());
        }
        match self.recognizer.start().await {
            Ok(()) | Err(RecognizerError::AlreadyActive) => {
                self.listening = true;
                self.pending.push(InputEvent::ListeningChanged(true));
                info!("speech input started");
                Ok(())
            }
            Err(RecognizerError::Failed { kind, message }) => {
                warn!("speech input failed to start: {message}");
                if kind.is_permanent() {
                    self.failed_permanently = true;
                }
                self.pending.push(InputEvent::Error(kind));
                Err(VoiceError::Input(message))
            }
        }
    }

    /// Stop listening. No-op when not listening.
    pub async fn stop(&mut self) {
        if !self.listening {
            return;
        }
        self.listening = false;
        self.pending.push(InputEvent::ListeningChanged(false));
        if let Err(e) = self.recognizer.stop().await {
            warn!("speech input stop reported: {e}");
        }
        info!("speech input stopped");
    }

    /// Discard recognition results queued while the adapter was stopped.
    /// Errors are not discarded; they are classified and queued so a
    /// permission denial from the stopped period still surfaces.
    fn drain_stale(&mut self) {
        while let Ok(raw) = self.events.try_recv() {
            match raw {
                RecognizerEvent::Final(text) => {
                    debug!("dropping stale utterance: \"{text}\"");
                }
                RecognizerEvent::Error { kind, message } => {
                    warn!("stale recognition error ({kind:?}): {message}");
                    if kind.is_permanent() {
                        self.failed_permanently = true;
                    }
                    self.pending.push(InputEvent::Error(kind));
                }
            }
        }
    }

    /// Next policy event. Pends forever once the backend channel closes,
    /// so this is safe to poll from a `select!` loop.
    pub async fn next_event(&mut self) -> InputEvent {
        loop {
            if !self.pending.is_empty() {
                return self.pending.remove(0);
            }
            let Some(raw) = self.events.recv().await else {
                std::future::pending::<()>().await;
                unreachable!();
            };
            match raw {
                RecognizerEvent::Final(text) => {
                    if !self.listening {
                        debug!("dropping utterance received while stopped");
                        continue;
                    }
                    let text = text.trim().to_lowercase();
                    if text.chars().count() < self.min_utterance_chars {
                        debug!("discarding short utterance: \"{text}\"");
                        continue;
                    }
                    return InputEvent::Utterance(text);
                }
                RecognizerEvent::Error { kind, message } => {
                    warn!("recognition error ({kind:?}): {message}");
                    if kind.is_permanent() {
                        self.failed_permanently = true;
                        self.listening = false;
                    }
                    return InputEvent::Error(kind);
                }
            }
        }
    }
}
