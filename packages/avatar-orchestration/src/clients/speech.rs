//! Speech synthesis client
//!
//! Standard mode calls a stock neural voice; cloned mode calls a voice
//! cloning endpoint that reads the owner's samples from the artifact store.

use async_trait::async_trait;
use avatar_storage::{layout, ArtifactKey, ObjectStore, StorageError, VoiceMode};
use reqwest::header::ACCEPT;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::SpeechConfig;

#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("speech backend rejected request: {0}")]
    Rejected(String),

    #[error("no voice samples found for owner {owner_id}")]
    VoiceSamplesMissing { owner_id: String },

    #[error("voice cloning is not configured")]
    CloningNotConfigured,

    #[error("speech backend unreachable: {0}")]
    Transport(String),

    #[error("speech backend returned empty audio")]
    EmptyAudio,

    #[error("voice sample lookup failed: {0}")]
    Storage(#[from] StorageError),
}

impl SynthesisError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SynthesisError::Transport(_))
    }
}

/// Audio generation collaborator: text in, speech audio bytes out
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        voice_mode: VoiceMode,
        owner_id: &str,
    ) -> Result<Vec<u8>, SynthesisError>;
}

/// Keys of the owner's uploaded voice samples
///
/// # Errors
///
/// `VoiceSamplesMissing` when the owner has none.
pub async fn voice_samples(
    artifacts: &dyn ObjectStore,
    owner_id: &str,
) -> Result<Vec<ArtifactKey>, SynthesisError> {
    let samples: Vec<ArtifactKey> = artifacts
        .list(&layout::voice_samples_prefix(owner_id))
        .await?
        .into_iter()
        .filter(|k| !k.as_str().ends_with('/'))
        .collect();

    if samples.is_empty() {
        return Err(SynthesisError::VoiceSamplesMissing {
            owner_id: owner_id.to_string(),
        });
    }
    Ok(samples)
}

/// HTTP speech gateway client
pub struct HttpSpeechSynthesizer {
    http: reqwest::Client,
    config: SpeechConfig,
    artifacts: Arc<dyn ObjectStore>,
}

impl HttpSpeechSynthesizer {
    pub fn new(
        config: SpeechConfig,
        artifacts: Arc<dyn ObjectStore>,
    ) -> Result<Self, SynthesisError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SynthesisError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            config,
            artifacts,
        })
    }

    async fn post_for_audio(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<Vec<u8>, SynthesisError> {
        let response = self
            .http
            .post(url)
            .header(ACCEPT, "audio/mpeg")
            .json(body)
            .send()
            .await
            .map_err(|e| SynthesisError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(SynthesisError::Transport(format!("{} returned {}", url, status)));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SynthesisError::Rejected(format!("{}: {}", status, text)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SynthesisError::Transport(e.to_string()))?;
        if bytes.is_empty() {
            return Err(SynthesisError::EmptyAudio);
        }
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        voice_mode: VoiceMode,
        owner_id: &str,
    ) -> Result<Vec<u8>, SynthesisError> {
        let audio = match voice_mode {
            VoiceMode::Standard => {
                let body = json!({
                    "text": text,
                    "voiceId": self.config.voice_id,
                    "engine": "neural",
                    "outputFormat": "mp3",
                    "sampleRate": self.config.sample_rate,
                });
                self.post_for_audio(&self.config.endpoint, &body).await?
            }
            VoiceMode::Cloned => {
                let endpoint = self
                    .config
                    .clone_endpoint
                    .as_deref()
                    .ok_or(SynthesisError::CloningNotConfigured)?;
                let samples = voice_samples(self.artifacts.as_ref(), owner_id).await?;
                debug!("Owner {} has {} voice samples", owner_id, samples.len());

                let prefix = layout::voice_samples_prefix(owner_id);
                let body = json!({
                    "userId": owner_id,
                    "text": text,
                    "voiceSamplesLocation": self.artifacts.location_uri(&prefix),
                });
                self.post_for_audio(endpoint, &body).await?
            }
        };

        info!(
            "Synthesized {} bytes of {} audio for owner {}",
            audio.len(),
            voice_mode,
            owner_id
        );
        Ok(audio)
    }
}
