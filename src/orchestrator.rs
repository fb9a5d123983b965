//! The session state machine coordinating speech input, speech output, and
//! the conversation engine.
//!
//! All state lives in a single [`Phase`] enum. Adapter callbacks, UI
//! commands, and speech completions all dispatch through one `select!`
//! loop on one task, so transitions are atomic with respect to re-entrant
//! events. At most one of Listening/Processing/Speaking holds at any
//! instant; overlapping utterances never reach the engine because the
//! input adapter is stopped outside Listening and Idle.
//!
//! A turn in Processing runs to completion or failure; there is no
//! mid-turn cancellation (barge-in). Failures become a spoken apology and
//! the session returns to Listening, so the user always gets audible
//! feedback.

use crate::actions::TriggerMatcher;
use crate::config::AssistantConfig;
use crate::engine::{ConversationEngine, Role};
use crate::error::Result;
use crate::events::RuntimeEvent;
use crate::input::{InputEvent, SpeechInputAdapter};
use crate::output::{SpeechOutputAdapter, SpeakOutcome};
use crate::tools::ToolRegistry;
use crate::vars::{self, SystemVariables};
use std::ops::ControlFlow;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of the runtime-event broadcast channel.
const EVENT_CHANNEL_SIZE: usize = 64;

/// Capacity of the UI command channel.
const COMMAND_CHANNEL_SIZE: usize = 16;

/// How often listening inactivity is checked.
const IDLE_CHECK_PERIOD: Duration = Duration::from_secs(5);

/// The session's mutually-exclusive mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not activated; the input adapter listens only for an activation
    /// phrase.
    Idle,
    /// Actively capturing an utterance.
    Listening,
    /// An utterance is with the conversation engine.
    Processing,
    /// The output adapter is playing a response.
    Speaking,
    /// A client-side trigger action's UI is open; listening resumes on
    /// dismissal.
    AwaitingAction,
    /// Terminal: unmount or unrecoverable permission denial. No further
    /// transitions are accepted.
    PermanentlyStopped,
}

/// UI-driven commands into the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Activate as if an activation phrase was heard.
    Wake,
    /// Deactivate as if a deactivation phrase was heard.
    Sleep,
    /// The trigger action's UI was dismissed; resume listening.
    ActionDismissed,
    /// Re-run the pre-execution pass and atomically replace the
    /// system-variable map.
    RefreshVariables,
}

/// Handle given to the embedding application: commands in, events out.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<RuntimeEvent>,
    cancel: CancellationToken,
    intensity: watch::Receiver<f32>,
}

impl SessionHandle {
    /// Send a command to the session. Dropped if the session has ended.
    pub async fn command(&self, command: Command) {
        if self.commands.send(command).await.is_err() {
            warn!("command {command:?} dropped: session ended");
        }
    }

    /// Subscribe to runtime events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.events.subscribe()
    }

    /// The smoothed audio-intensity signal for visualizations.
    #[must_use]
    pub fn intensity(&self) -> watch::Receiver<f32> {
        self.intensity.clone()
    }

    /// End the session. The orchestrator stops all adapters and enters
    /// `PermanentlyStopped`.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// The session state machine. Construct with [`Orchestrator::new`], then
/// drive with [`run`](Orchestrator::run).
pub struct Orchestrator {
    config: AssistantConfig,
    input: SpeechInputAdapter,
    output: SpeechOutputAdapter,
    engine: ConversationEngine,
    registry: ToolRegistry,
    matcher: TriggerMatcher,
    system_vars: SystemVariables,
    phase: Phase,
    events: broadcast::Sender<RuntimeEvent>,
    commands: mpsc::Receiver<Command>,
    cancel: CancellationToken,
    /// Generation of the utterance whose completion we are waiting on.
    speaking_generation: u64,
    /// Whether this session was activated before (welcome vs continuation).
    activated_before: bool,
    last_activity: Instant,
}

impl Orchestrator {
    /// Assemble a session from its parts.
    #[must_use]
    pub fn new(
        config: AssistantConfig,
        input: SpeechInputAdapter,
        output: SpeechOutputAdapter,
        engine: ConversationEngine,
        registry: ToolRegistry,
        matcher: TriggerMatcher,
    ) -> (Self, SessionHandle) {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let cancel = CancellationToken::new();
        let handle = SessionHandle {
            commands: command_tx,
            events: events.clone(),
            cancel: cancel.clone(),
            intensity: output.intensity(),
        };
        let orchestrator = Self {
            config,
            input,
            output,
            engine,
            registry,
            matcher,
            system_vars: SystemVariables::new(),
            phase: Phase::Idle,
            events,
            commands: command_rx,
            cancel,
            speaking_generation: 0,
            activated_before: false,
            last_activity: Instant::now(),
        };
        (orchestrator, handle)
    }

    /// The current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run the session until shutdown or permanent failure.
    ///
    /// Failures during the session never surface here: transient
    /// recognition errors retry, turn failures become spoken apologies,
    /// and permanent failures emit a terminal
    /// [`RuntimeEvent::Unavailable`] before a clean return.
    ///
    /// # Errors
    ///
    /// Reserved for session-level failures; none are produced today.
    pub async fn run(mut self) -> Result<()> {
        self.system_vars =
            vars::run_startup_pass(&self.registry, &self.config.system_tools).await;

        // Idle still listens, for the activation phrase.
        if let Err(e) = self.input.start().await {
            warn!("initial input start failed: {e}");
        }
        self.emit(RuntimeEvent::PhaseChanged { phase: self.phase });

        let mut idle_check = tokio::time::interval(IDLE_CHECK_PERIOD);
        let idle_timeout_s = self.config.conversation.idle_timeout_s;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    info!("session cancelled, shutting down");
                    self.output.stop();
                    self.input.stop().await;
                    self.set_phase(Phase::PermanentlyStopped);
                    break;
                }
                Some(command) = self.commands.recv() => {
                    self.handle_command(command).await;
                }
                event = self.input.next_event() => {
                    if self.handle_input(event).await.is_break() {
                        break;
                    }
                }
                outcome = self.output.next_done() => {
                    self.handle_speech_done(outcome).await;
                }
                _ = idle_check.tick(),
                    if self.phase == Phase::Listening && idle_timeout_s > 0 =>
                {
                    if self.last_activity.elapsed()
                        >= Duration::from_secs(u64::from(idle_timeout_s))
                    {
                        info!("listening inactivity timeout, returning to idle");
                        self.set_phase(Phase::Idle);
                    }
                }
            }
        }
        Ok(())
    }

    async fn handle_command(&mut self, command: Command) {
        if self.phase == Phase::PermanentlyStopped {
            return;
        }
        match command {
            Command::Wake if self.phase == Phase::Idle => {
                self.activate().await;
            }
            Command::Sleep
                if matches!(self.phase, Phase::Listening | Phase::Speaking) =>
            {
                self.deactivate().await;
            }
            Command::ActionDismissed if self.phase == Phase::AwaitingAction => {
                info!("trigger action dismissed, resuming listening");
                self.resume_listening().await;
            }
            Command::RefreshVariables => {
                self.system_vars =
                    vars::run_startup_pass(&self.registry, &self.config.system_tools).await;
            }
            other => debug!("ignoring command {other:?} in phase {:?}", self.phase),
        }
    }

    async fn handle_input(&mut self, event: InputEvent) -> ControlFlow<()> {
        match event {
            InputEvent::ListeningChanged(listening) => {
                self.emit(RuntimeEvent::ListeningChanged { listening });
                ControlFlow::Continue(())
            }
            InputEvent::Error(kind) => {
                if kind.is_permanent() {
                    warn!("permanent recognition failure: {kind:?}");
                    self.enter_unavailable(
                        "microphone permission denied or speech recognition unsupported",
                    )
                    .await;
                    return ControlFlow::Break(());
                }
                // Transient: retry listening after a short backoff, unless
                // the session is mid-turn (the restart after speech handles
                // those phases).
                if matches!(self.phase, Phase::Idle | Phase::Listening) {
                    let backoff =
                        Duration::from_millis(self.config.conversation.retry_backoff_ms);
                    warn!("transient recognition error {kind:?}, retrying in {backoff:?}");
                    tokio::time::sleep(backoff).await;
                    if let Err(e) = self.input.start().await {
                        warn!("input restart failed: {e}");
                    }
                }
                ControlFlow::Continue(())
            }
            InputEvent::Utterance(text) => {
                self.last_activity = Instant::now();
                match self.phase {
                    Phase::Idle => {
                        let phrases = &self.config.conversation.activation_phrases;
                        if crate::phrase::match_any(&text, phrases).is_some() {
                            info!("activation phrase heard: \"{text}\"");
                            self.emit(RuntimeEvent::UserUtterance { text });
                            self.activate().await;
                        }
                    }
                    Phase::Listening => {
                        self.emit(RuntimeEvent::UserUtterance { text: text.clone() });
                        self.dispatch_utterance(text).await;
                    }
                    // The adapter drops utterances outside Idle/Listening;
                    // anything that slips through a race is ignored here.
                    _ => debug!("dropping utterance in phase {:?}", self.phase),
                }
                ControlFlow::Continue(())
            }
        }
    }

    /// One listening-phase utterance: deactivation, trigger action, or a
    /// full engine turn.
    async fn dispatch_utterance(&mut self, text: String) {
        let deactivation = &self.config.conversation.deactivation_phrases;
        if crate::phrase::match_any(&text, deactivation).is_some() {
            info!("deactivation phrase heard: \"{text}\"");
            self.deactivate().await;
            return;
        }

        if let Some(rule) = self.matcher.match_utterance(&text) {
            info!("trigger action matched: \"{}\"", rule.phrase);
            let action = rule.action.clone();
            self.input.stop().await;
            self.set_phase(Phase::AwaitingAction);
            self.emit(RuntimeEvent::ActionRequested { action });
            return;
        }

        self.input.stop().await;
        self.set_phase(Phase::Processing);

        let history_before = self.engine.history().len();
        let result = self
            .engine
            .run_turn(&text, &self.registry, &self.system_vars)
            .await;
        self.emit_tool_activity(history_before);

        let reply = match result {
            Ok(outcome) if !outcome.final_text.trim().is_empty() => outcome.final_text,
            Ok(_) => {
                warn!("turn produced an empty answer, speaking the error message");
                self.config.conversation.error_message.clone()
            }
            Err(e) => {
                warn!("turn failed: {e}");
                self.config.conversation.error_message.clone()
            }
        };

        self.emit(RuntimeEvent::AssistantReply { text: reply.clone() });
        self.speaking_generation = self.output.speak(&reply);
        self.set_phase(Phase::Speaking);
    }

    async fn handle_speech_done(&mut self, outcome: SpeakOutcome) {
        if self.phase != Phase::Speaking || outcome.generation != self.speaking_generation {
            debug!("ignoring stale speech completion (gen {})", outcome.generation);
            return;
        }
        debug!("speech finished ({:?})", outcome.cause);
        self.resume_listening().await;
    }

    /// Activation: acknowledge out loud, then listen once the
    /// acknowledgement finishes playing.
    async fn activate(&mut self) {
        self.input.stop().await;
        let message = if self.activated_before {
            self.config.conversation.continuation_message.clone()
        } else {
            self.config.conversation.welcome_message.clone()
        };
        self.activated_before = true;
        self.speaking_generation = self.output.speak(&message);
        self.set_phase(Phase::Speaking);
    }

    /// Deactivation: stop speaking, stop listening, return to idle with the
    /// activation listener running again. The input restarts before the
    /// phase event fires so observers reacting to `Idle` always find the
    /// activation listener open.
    async fn deactivate(&mut self) {
        self.output.stop();
        self.input.stop().await;
        if let Err(e) = self.input.start().await {
            warn!("input restart after deactivation failed: {e}");
        }
        self.set_phase(Phase::Idle);
    }

    /// Re-open the microphone after a settle delay so the recognizer does
    /// not pick up the assistant's tail-end audio.
    async fn resume_listening(&mut self) {
        let settle = Duration::from_millis(self.config.conversation.settle_delay_ms);
        tokio::time::sleep(settle).await;
        self.last_activity = Instant::now();
        if let Err(e) = self.input.start().await {
            warn!("input restart failed: {e}");
        }
        self.set_phase(Phase::Listening);
    }

    async fn enter_unavailable(&mut self, reason: &str) {
        self.output.stop();
        self.input.stop().await;
        self.set_phase(Phase::PermanentlyStopped);
        self.emit(RuntimeEvent::Unavailable {
            reason: reason.to_owned(),
        });
    }

    /// Emit tool call/result events for history entries appended by the
    /// last turn.
    fn emit_tool_activity(&self, history_before: usize) {
        for message in &self.engine.history()[history_before..] {
            match message.role {
                Role::Assistant => {
                    for call in &message.tool_calls {
                        self.emit(RuntimeEvent::ToolCall {
                            id: call.id.clone(),
                            name: call.name.clone(),
                        });
                    }
                }
                Role::Tool => {
                    let success = serde_json::from_str::<serde_json::Value>(&message.content)
                        .map(|v| v.get("error").is_none())
                        .unwrap_or(true);
                    self.emit(RuntimeEvent::ToolResult {
                        id: message.tool_call_id.clone().unwrap_or_default(),
                        name: message.tool_name.clone().unwrap_or_default(),
                        success,
                    });
                }
                _ => {}
            }
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase == phase {
            return;
        }
        debug!("phase {:?} → {phase:?}", self.phase);
        self.phase = phase;
        self.emit(RuntimeEvent::PhaseChanged { phase });
    }

    fn emit(&self, event: RuntimeEvent) {
        // Broadcast send fails only when no one is subscribed.
        let _ = self.events.send(event);
    }
}
