//! One utterance through transcription, response and synthesis.

use callrelay_store::{Artifact, ArtifactKind, ArtifactStore, StoreError};
use callrelay_voice::{StageError, Stages};
use std::time::Instant;
use thiserror::Error;

/// Why a pipeline run produced no reply.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("stage failed: {0}")]
    Stage(#[from] StageError),

    #[error("artifact store failed: {0}")]
    Store(#[from] StoreError),
}

/// Runs the three stages strictly in sequence and persists the reply.
///
/// Holds no per-call state; one instance serves every session.
#[derive(Debug, Clone)]
pub struct Pipeline {
    store: ArtifactStore,
    stages: Stages,
}

impl Pipeline {
    pub fn new(store: ArtifactStore, stages: Stages) -> Self {
        Self { store, stages }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Turns one caller clip into a synthesized reply artifact.
    ///
    /// The clip is persisted as an uploaded-clip artifact for the duration of
    /// transcription and deleted afterwards whatever the outcome.
    pub async fn run(&self, call_id: &str, clip: Vec<u8>) -> Result<Artifact, PipelineError> {
        let upload = self.store.write(ArtifactKind::UploadedClip, &clip).await?;
        tracing::debug!(call_id, artifact = %upload.name, bytes = upload.len, "stored caller clip");

        let started = Instant::now();
        let transcript = self.stages.transcription.transcribe(&clip).await;
        let transcribe_ms = started.elapsed().as_millis() as u64;

        if let Err(e) = self.store.delete(&upload.name).await {
            tracing::warn!(
                call_id,
                artifact = %upload.name,
                error = %e,
                "failed to delete caller clip"
            );
        }

        let transcript = transcript?;
        tracing::debug!(call_id, transcribe_ms, transcript = %transcript, "transcribed utterance");

        let started = Instant::now();
        let reply_text = self.stages.response.respond(&transcript).await?;
        let respond_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(call_id, respond_ms, reply = %reply_text, "generated reply");

        let started = Instant::now();
        let audio = self.stages.synthesis.synthesize(&reply_text).await?;
        let synthesize_ms = started.elapsed().as_millis() as u64;

        let reply = self
            .store
            .write(ArtifactKind::SynthesizedReply, &audio)
            .await?;

        tracing::info!(
            call_id,
            artifact = %reply.name,
            transcribe_ms,
            respond_ms,
            synthesize_ms,
            "reply ready"
        );

        Ok(reply)
    }
}
