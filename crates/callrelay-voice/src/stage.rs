//! The three request/response stages a caller utterance passes through.
//!
//! Stages hold no per-call state: each call gets exactly the input it needs
//! and returns exactly the output, so any implementation (HTTP adapter or test
//! fake) can stand in for another.

use crate::chat::ChatResponder;
use crate::config::{ResponseConfig, SynthesisConfig, TranscriptionConfig};
use crate::error::StageError;
use crate::stt::WhisperTranscriber;
use crate::tts::ElevenLabsSynthesizer;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Caller audio to text.
#[async_trait]
pub trait TranscriptionStage: Send + Sync {
    /// Fails with `EmptyResult` when the transcript is too short to answer.
    async fn transcribe(&self, clip: &[u8]) -> Result<String, StageError>;
}

/// Caller text to reply text.
#[async_trait]
pub trait ResponseStage: Send + Sync {
    async fn respond(&self, text: &str) -> Result<String, StageError>;
}

/// Reply text to playable audio.
#[async_trait]
pub trait SynthesisStage: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, StageError>;
}

/// One implementation of each stage.
#[derive(Clone)]
pub struct Stages {
    pub transcription: Arc<dyn TranscriptionStage>,
    pub response: Arc<dyn ResponseStage>,
    pub synthesis: Arc<dyn SynthesisStage>,
}

impl fmt::Debug for Stages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stages").finish_non_exhaustive()
    }
}

impl Stages {
    pub fn new(
        transcription: Arc<dyn TranscriptionStage>,
        response: Arc<dyn ResponseStage>,
        synthesis: Arc<dyn SynthesisStage>,
    ) -> Self {
        Self {
            transcription,
            response,
            synthesis,
        }
    }

    /// Builds the HTTP adapters for all three stages.
    pub fn from_config(
        transcription: &TranscriptionConfig,
        response: &ResponseConfig,
        synthesis: &SynthesisConfig,
    ) -> Result<Self, StageError> {
        Ok(Self::new(
            Arc::new(WhisperTranscriber::new(transcription.clone())?),
            Arc::new(ChatResponder::new(response.clone())?),
            Arc::new(ElevenLabsSynthesizer::new(synthesis.clone())?),
        ))
    }
}
