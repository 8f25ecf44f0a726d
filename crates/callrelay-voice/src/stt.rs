use crate::config::TranscriptionConfig;
use crate::error::StageError;
use crate::stage::TranscriptionStage;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;

/// Maximum audio input size for transcription (25 MiB, the OpenAI upload limit).
const MAX_TRANSCRIPTION_INPUT_BYTES: usize = 25 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

/// Rejects transcripts too short to be worth answering.
///
/// Returns the trimmed transcript otherwise.
pub fn meaningful_transcript(text: &str, min_chars: usize) -> Result<String, StageError> {
    let trimmed = text.trim();
    let chars = trimmed.chars().count();
    if chars == 0 || chars < min_chars {
        return Err(StageError::EmptyResult(format!(
            "transcript has {} characters (minimum {})",
            chars, min_chars
        )));
    }
    Ok(trimmed.to_string())
}

/// Transcribes clips through an OpenAI-compatible `/audio/transcriptions` endpoint.
#[derive(Debug, Clone)]
pub struct WhisperTranscriber {
    config: TranscriptionConfig,
    client: Client,
}

impl WhisperTranscriber {
    pub fn new(config: TranscriptionConfig) -> Result<Self, StageError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| StageError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn url(&self) -> String {
        format!(
            "{}/audio/transcriptions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl TranscriptionStage for WhisperTranscriber {
    async fn transcribe(&self, clip: &[u8]) -> Result<String, StageError> {
        if clip.len() > MAX_TRANSCRIPTION_INPUT_BYTES {
            return Err(StageError::Upstream(format!(
                "audio data exceeds maximum size: {} bytes (limit: {} bytes)",
                clip.len(),
                MAX_TRANSCRIPTION_INPUT_BYTES
            )));
        }

        let part = Part::bytes(clip.to_vec())
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| StageError::Upstream(format!("invalid upload part: {}", e)))?;
        let form = Form::new()
            .part("file", part)
            .text("model", self.config.model.clone());

        let mut request = self.client.post(self.url()).multipart(form);
        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StageError::Upstream(format!("transcription request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StageError::Upstream(format!(
                "transcription backend returned HTTP {}: {}",
                status, body
            )));
        }

        let parsed: TranscriptionResponse = response.json().await.map_err(|e| {
            StageError::Upstream(format!("invalid transcription response: {}", e))
        })?;

        let text = meaningful_transcript(&parsed.text, self.config.min_chars)?;
        tracing::debug!(chars = text.chars().count(), "transcribed clip");
        Ok(text)
    }
}
