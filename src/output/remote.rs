//! Remote HTTP synthesis backend.
//!
//! Posts `{model, voice, input}` to the configured speech endpoint and hands
//! the binary audio payload to an injected player. Playback (and therefore
//! the audio-energy signal) stays host-provided; this backend only swaps
//! where the audio comes from.

use crate::config::TtsConfig;
use crate::error::{Result, VoiceError};
use crate::output::Synthesizer;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

/// Plays an encoded audio payload on the host's audio device.
#[async_trait]
pub trait AudioPlayer: Send + Sync {
    /// Play `audio`, pushing normalized energy samples on `levels` while
    /// playing. Resolves when playback finishes.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding or playback fails.
    async fn play(&self, audio: Vec<u8>, levels: mpsc::UnboundedSender<f32>) -> Result<()>;
}

/// Synthesizer backend that fetches audio from a remote speech API.
pub struct RemoteTts {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    voice: String,
    player: Arc<dyn AudioPlayer>,
}

impl RemoteTts {
    /// Create a remote backend for the configured endpoint.
    #[must_use]
    pub fn new(config: &TtsConfig, player: Arc<dyn AudioPlayer>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_s))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: format!("{}/audio/speech", config.api_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            voice: config.voice.clone(),
            player,
        }
    }
}

#[async_trait]
impl Synthesizer for RemoteTts {
    async fn speak(&self, text: &str, levels: mpsc::UnboundedSender<f32>) -> Result<()> {
        let body = serde_json::json!({
            "model": self.model,
            "voice": self.voice,
            "input": text,
        });

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::Output(format!("speech request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VoiceError::Output(format!(
                "speech endpoint returned status {status}"
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| VoiceError::Output(format!("failed to read audio payload: {e}")))?;
        info!("fetched {} bytes of synthesized audio", audio.len());

        self.player.play(audio.to_vec(), levels).await
    }
}
