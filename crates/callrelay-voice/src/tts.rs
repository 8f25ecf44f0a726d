use crate::config::SynthesisConfig;
use crate::error::StageError;
use crate::stage::SynthesisStage;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

/// Maximum text input size for synthesis (64 KiB). Prevents resource exhaustion from
/// oversized synthesis requests.
const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

#[derive(Debug, Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

/// Synthesizes speech through an ElevenLabs-compatible `/text-to-speech/{voice_id}`
/// endpoint.
///
/// Returns the response body unchanged. Its codec is whatever the backend is
/// configured to produce (MP3 by default), which the telephony layer plays as-is.
#[derive(Debug, Clone)]
pub struct ElevenLabsSynthesizer {
    config: SynthesisConfig,
    client: Client,
}

impl ElevenLabsSynthesizer {
    pub fn new(config: SynthesisConfig) -> Result<Self, StageError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| StageError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn url(&self) -> String {
        format!(
            "{}/text-to-speech/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.voice_id
        )
    }
}

#[async_trait]
impl SynthesisStage for ElevenLabsSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, StageError> {
        if text.len() > MAX_TTS_INPUT_BYTES {
            return Err(StageError::Upstream(format!(
                "text exceeds maximum size: {} bytes (limit: {} bytes)",
                text.len(),
                MAX_TTS_INPUT_BYTES
            )));
        }

        if self.config.voice_id.is_empty() {
            return Err(StageError::Config(
                "synthesis voice_id is not configured. Set synthesis.voice_id in config \
                 or the ELEVENLABS_VOICE_ID environment variable."
                    .to_string(),
            ));
        }

        let body = SynthesisRequest {
            text,
            model_id: &self.config.model_id,
            voice_settings: VoiceSettings {
                stability: self.config.stability,
                similarity_boost: self.config.similarity_boost,
            },
        };

        let response = self
            .client
            .post(self.url())
            .header("xi-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| StageError::Upstream(format!("synthesis request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StageError::Upstream(format!(
                "synthesis backend returned HTTP {}: {}",
                status, body
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| StageError::Upstream(format!("failed to read synthesis audio: {}", e)))?;

        if audio.is_empty() {
            return Err(StageError::EmptyResult(
                "synthesis backend returned no audio".to_string(),
            ));
        }

        Ok(audio.to_vec())
    }
}
