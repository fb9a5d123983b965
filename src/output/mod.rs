//! Speech output adapter: single-utterance playback with preemption.
//!
//! A new `speak` preempts any in-flight utterance; calls never queue. Every
//! `speak` resolves to exactly one [`SpeakOutcome`], whether playback
//! completed, errored, was cancelled, or the fallback timer fired. The
//! timer defends against synthesis engines whose completion event never
//! arrives, so a stuck backend can never hang the orchestrator.
//!
//! While speaking, backends push raw audio-energy samples which the adapter
//! smooths with an exponential moving average and publishes on a watch
//! channel for visualization consumers. Intensity is 0 when not speaking.

pub mod remote;

use crate::config::{TtsBackend, TtsConfig};
use crate::error::Result;
use remote::{AudioPlayer, RemoteTts};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// EMA factor for intensity smoothing.
const INTENSITY_SMOOTHING: f32 = 0.9;

/// Extra slack added to the estimated playback duration before the
/// fallback timer forces completion.
const FALLBACK_SLACK: Duration = Duration::from_secs(3);

/// Estimated speech rate used by the fallback timer, in characters per
/// second.
const CHARS_PER_SECOND: f64 = 15.0;

/// A synthesis-and-playback backend.
///
/// Implementations push normalized audio-energy samples in `[0, 1]` on
/// `levels` while playing and resolve when playback finishes. They should
/// return promptly once `levels` is closed or their future is dropped.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize and play `text`.
    ///
    /// # Errors
    ///
    /// Returns an error if synthesis or playback fails.
    async fn speak(&self, text: &str, levels: mpsc::UnboundedSender<f32>) -> Result<()>;
}

/// How a speak call finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneCause {
    /// Playback ran to completion.
    Completed,
    /// Preempted by a newer `speak` or an explicit `stop`.
    Cancelled,
    /// Synthesis/playback failed (including a failed local fallback).
    Error,
    /// The fallback timer fired before the backend reported completion.
    TimedOut,
}

/// Completion signal for one `speak` call.
#[derive(Debug, Clone, Copy)]
pub struct SpeakOutcome {
    /// Generation returned by the originating `speak` call.
    pub generation: u64,
    /// Why the utterance finished.
    pub cause: DoneCause,
}

struct ActiveUtterance {
    generation: u64,
    cancel: CancellationToken,
}

/// Preemptive single-utterance playback over a [`Synthesizer`].
pub struct SpeechOutputAdapter {
    primary: Arc<dyn Synthesizer>,
    fallback: Option<Arc<dyn Synthesizer>>,
    done_tx: mpsc::UnboundedSender<SpeakOutcome>,
    done_rx: mpsc::UnboundedReceiver<SpeakOutcome>,
    intensity_tx: watch::Sender<f32>,
    current: Option<ActiveUtterance>,
    generation: u64,
}

impl SpeechOutputAdapter {
    /// Create an adapter over `primary`, optionally falling back to a local
    /// engine when `primary` fails.
    #[must_use]
    pub fn new(primary: Arc<dyn Synthesizer>, fallback: Option<Arc<dyn Synthesizer>>) -> Self {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let (intensity_tx, _) = watch::channel(0.0);
        Self {
            primary,
            fallback,
            done_tx,
            done_rx,
            intensity_tx,
            current: None,
            generation: 0,
        }
    }

    /// Build an adapter from config: the local engine directly, or the
    /// remote backend with the local engine as its fallback.
    #[must_use]
    pub fn from_config(
        config: &TtsConfig,
        local: Arc<dyn Synthesizer>,
        player: Arc<dyn AudioPlayer>,
    ) -> Self {
        match config.backend {
            TtsBackend::Local => Self::new(local, None),
            TtsBackend::Remote => {
                Self::new(Arc::new(RemoteTts::new(config, player)), Some(local))
            }
        }
    }

    /// Subscribe to the smoothed audio-intensity signal.
    #[must_use]
    pub fn intensity(&self) -> watch::Receiver<f32> {
        self.intensity_tx.subscribe()
    }

    /// Whether an utterance is in flight.
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.current.is_some()
    }

    /// Begin playback of `text`, preempting any in-flight utterance.
    /// Returns the generation whose [`SpeakOutcome`] will report this call.
    pub fn speak(&mut self, text: &str) -> u64 {
        self.cancel_current();
        self.generation += 1;
        let generation = self.generation;
        let cancel = CancellationToken::new();
        self.current = Some(ActiveUtterance {
            generation,
            cancel: cancel.clone(),
        });

        let primary = self.primary.clone();
        let fallback = self.fallback.clone();
        let done_tx = self.done_tx.clone();
        let intensity_tx = self.intensity_tx.clone();
        let text = text.to_owned();
        let deadline =
            Duration::from_secs_f64(text.len() as f64 / CHARS_PER_SECOND) + FALLBACK_SLACK;

        info!("speaking ({} chars, deadline {deadline:?})", text.len());
        tokio::spawn(async move {
            let cause = {
                let (levels_tx, mut levels_rx) = mpsc::unbounded_channel::<f32>();
                let smoother_tx = intensity_tx.clone();
                let smoother = tokio::spawn(async move {
                    let mut ema = 0.0f32;
                    while let Some(raw) = levels_rx.recv().await {
                        ema = ema * INTENSITY_SMOOTHING
                            + raw.clamp(0.0, 1.0) * (1.0 - INTENSITY_SMOOTHING);
                        let _ = smoother_tx.send(ema);
                    }
                });

                let cause = {
                    let playback =
                        synthesize_with_fallback(primary, fallback, &text, levels_tx);
                    tokio::pin!(playback);
                    tokio::select! {
                        () = cancel.cancelled() => DoneCause::Cancelled,
                        () = tokio::time::sleep(deadline) => {
                            warn!("playback completion never arrived, forcing done");
                            DoneCause::TimedOut
                        }
                        result = &mut playback => match result {
                            Ok(()) => DoneCause::Completed,
                            Err(e) => {
                                warn!("synthesis failed: {e}");
                                DoneCause::Error
                            }
                        },
                    }
                    // The playback future (and its levels sender) drops
                    // here, ending the smoother.
                };
                let _ = smoother.await;
                cause
            };
            let _ = intensity_tx.send(0.0);
            let _ = done_tx.send(SpeakOutcome { generation, cause });
        });

        generation
    }

    /// Cancel playback. The in-flight utterance's outcome still resolves
    /// (as `Cancelled`), so every `speak` reports exactly once.
    pub fn stop(&mut self) {
        self.cancel_current();
    }

    /// Next completion signal. Pends forever if none is outstanding.
    pub async fn next_done(&mut self) -> SpeakOutcome {
        loop {
            match self.done_rx.recv().await {
                Some(outcome) => {
                    if self
                        .current
                        .as_ref()
                        .is_some_and(|a| a.generation == outcome.generation)
                    {
                        self.current = None;
                    }
                    return outcome;
                }
                // Unreachable while the adapter holds its sender; guard
                // against busy-looping anyway.
                None => std::future::pending::<()>().await,
            }
        }
    }

    fn cancel_current(&mut self) {
        if let Some(active) = self.current.take() {
            active.cancel.cancel();
        }
    }
}

/// Run the primary backend, falling back to the local engine on failure.
async fn synthesize_with_fallback(
    primary: Arc<dyn Synthesizer>,
    fallback: Option<Arc<dyn Synthesizer>>,
    text: &str,
    levels: mpsc::UnboundedSender<f32>,
) -> Result<()> {
    match primary.speak(text, levels.clone()).await {
        Ok(()) => Ok(()),
        Err(e) => match fallback {
            Some(local) => {
                warn!("synthesis backend failed, falling back to local engine: {e}");
                local.speak(text, levels).await
            }
            None => Err(e),
        },
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::error::VoiceError;
    use std::sync::Mutex;

    /// Scripted synthesizer: plays for a fixed duration, pushing one level
    /// sample, and optionally fails instead.
    struct FakeSynth {
        duration: Duration,
        fail: bool,
        spoken: Mutex<Vec<String>>,
    }

    impl FakeSynth {
        fn new(duration: Duration) -> Arc<Self> {
            Arc::new(Self {
                duration,
                fail: false,
                spoken: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                duration: Duration::ZERO,
                fail: true,
                spoken: Mutex::new(Vec::new()),
            })
        }

        fn spoken(&self) -> Vec<String> {
            self.spoken.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Synthesizer for FakeSynth {
        async fn speak(
            &self,
            text: &str,
            levels: mpsc::UnboundedSender<f32>,
        ) -> Result<()> {
            if self.fail {
                return Err(VoiceError::Output("backend down".to_owned()));
            }
            self.spoken.lock().unwrap().push(text.to_owned());
            let _ = levels.send(0.8);
            tokio::time::sleep(self.duration).await;
            Ok(())
        }
    }

    /// Never completes and ignores everything: models an engine whose
    /// completion event is lost.
    struct StuckSynth;

    #[async_trait]
    impl Synthesizer for StuckSynth {
        async fn speak(
            &self,
            _text: &str,
            _levels: mpsc::UnboundedSender<f32>,
        ) -> Result<()> {
            std::future::pending::<()>().await;
            unreachable!();
        }
    }

    #[tokio::test]
    async fn natural_completion_reports_once() {
        let synth = FakeSynth::new(Duration::from_millis(5));
        let mut adapter = SpeechOutputAdapter::new(synth.clone(), None);

        let generation = adapter.speak("oi");
        let outcome = adapter.next_done().await;
        assert_eq!(outcome.generation, generation);
        assert_eq!(outcome.cause, DoneCause::Completed);
        assert!(!adapter.is_speaking());
        assert_eq!(synth.spoken(), vec!["oi".to_owned()]);
    }

    #[tokio::test]
    async fn rapid_double_speak_each_resolves_once() {
        let synth = FakeSynth::new(Duration::from_millis(50));
        let mut adapter = SpeechOutputAdapter::new(synth, None);

        let first = adapter.speak("oi");
        let second = adapter.speak("oi");

        let outcome_a = adapter.next_done().await;
        assert_eq!(outcome_a.generation, first);
        assert_eq!(outcome_a.cause, DoneCause::Cancelled);

        let outcome_b = adapter.next_done().await;
        assert_eq!(outcome_b.generation, second);
        assert_eq!(outcome_b.cause, DoneCause::Completed);

        // Intensity returns to 0 after the second completes.
        let intensity = adapter.intensity();
        assert!((*intensity.borrow()).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn stop_cancels_but_still_resolves() {
        let synth = FakeSynth::new(Duration::from_secs(60));
        let mut adapter = SpeechOutputAdapter::new(synth, None);

        let generation = adapter.speak("uma fala bem longa");
        adapter.stop();

        let outcome = adapter.next_done().await;
        assert_eq!(outcome.generation, generation);
        assert_eq!(outcome.cause, DoneCause::Cancelled);
    }

    #[tokio::test]
    async fn remote_failure_falls_back_to_local() {
        let remote = FakeSynth::failing();
        let local = FakeSynth::new(Duration::from_millis(5));
        let mut adapter = SpeechOutputAdapter::new(remote, Some(local.clone()));

        adapter.speak("bem-vindo");
        let outcome = adapter.next_done().await;
        assert_eq!(outcome.cause, DoneCause::Completed);
        assert_eq!(local.spoken(), vec!["bem-vindo".to_owned()]);
    }

    #[tokio::test]
    async fn failure_without_fallback_still_resolves() {
        let remote = FakeSynth::failing();
        let mut adapter = SpeechOutputAdapter::new(remote, None);

        adapter.speak("oi");
        let outcome = adapter.next_done().await;
        assert_eq!(outcome.cause, DoneCause::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_timer_forces_completion() {
        let mut adapter = SpeechOutputAdapter::new(Arc::new(StuckSynth), None);

        // "oi" → 2/15 s + 3 s ≈ 3.13 s deadline; paused time auto-advances.
        adapter.speak("oi");
        let outcome = adapter.next_done().await;
        assert_eq!(outcome.cause, DoneCause::TimedOut);

        let intensity = adapter.intensity();
        assert!((*intensity.borrow()).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn from_config_selects_backend() {
        struct NullPlayer;

        #[async_trait]
        impl AudioPlayer for NullPlayer {
            async fn play(
                &self,
                _audio: Vec<u8>,
                _levels: mpsc::UnboundedSender<f32>,
            ) -> Result<()> {
                Ok(())
            }
        }

        let local = FakeSynth::new(Duration::ZERO);
        let adapter = SpeechOutputAdapter::from_config(
            &TtsConfig::default(),
            local.clone(),
            Arc::new(NullPlayer),
        );
        assert!(adapter.fallback.is_none());

        let remote_config = TtsConfig {
            backend: TtsBackend::Remote,
            ..TtsConfig::default()
        };
        let adapter =
            SpeechOutputAdapter::from_config(&remote_config, local, Arc::new(NullPlayer));
        assert!(adapter.fallback.is_some());
    }

    #[tokio::test]
    async fn intensity_rises_while_speaking() {
        let synth = FakeSynth::new(Duration::from_millis(30));
        let mut adapter = SpeechOutputAdapter::new(synth, None);
        let mut intensity = adapter.intensity();

        adapter.speak("olá mundo");
        // First change is the smoothed sample, second the reset to 0.
        intensity.changed().await.unwrap();
        let level = *intensity.borrow_and_update();
        assert!(level > 0.0 && level <= 1.0);

        let outcome = adapter.next_done().await;
        assert_eq!(outcome.cause, DoneCause::Completed);
        assert!((*adapter.intensity().borrow()).abs() < f32::EPSILON);
    }
}
