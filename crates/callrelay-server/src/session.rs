//! Per-call state machine.
//!
//! A [`CallSession`] owns one call's buffered audio and drives the pipeline
//! once per utterance:
//!
//! ```text
//! AwaitingInput --append--> Accumulating --end of utterance--> Processing
//!       ^                        |                                |
//!       |                 (empty buffer)                  success | failure
//!       +------------------------+<-------------------------------+    |
//!       +<------------------------- Error <----------------------------+
//!
//! any state --close--> Closed
//! ```
//!
//! Audio appended while an utterance is processing is buffered for the next
//! utterance; it never joins the clip already handed to the pipeline. Pipeline
//! runs for one session are serialized in the order their end-of-utterance
//! signals arrive, while runs for different sessions proceed independently.

use crate::accumulator::AudioAccumulator;
use crate::media::AudioFormat;
use crate::pipeline::{Pipeline, PipelineError};
use callrelay_store::Artifact;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::broadcast;

/// Capacity of each session's transition feed.
const TRANSITION_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingInput,
    Accumulating,
    Processing,
    Error,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::AwaitingInput => "awaiting_input",
            SessionState::Accumulating => "accumulating",
            SessionState::Processing => "processing",
            SessionState::Error => "error",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session {0} is closed")]
    SessionClosed(String),
}

/// Result of one end-of-utterance signal.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Nothing was buffered; no stage ran.
    NoUtterance,
    /// The pipeline produced a reply artifact.
    Reply(Artifact),
    /// A stage failed; the caller should hear the fallback message.
    Fallback,
}

/// What the telephony layer should play on its next prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Playback {
    /// First prompt of the call.
    Greeting,
    /// The named reply artifact.
    Reply(String),
    /// The fixed apology after a failed utterance.
    Fallback,
}

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    accumulator: AudioAccumulator,
    last_artifact: Option<Artifact>,
    pending: Option<Playback>,
    greeted: bool,
}

/// One call's buffered audio and pipeline state.
#[derive(Debug)]
pub struct CallSession {
    id: String,
    inner: Mutex<SessionInner>,
    /// Held for the whole of a pipeline run so runs never overlap.
    turn: tokio::sync::Mutex<()>,
    transitions: broadcast::Sender<SessionState>,
}

impl CallSession {
    pub fn new(id: impl Into<String>) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            id: id.into(),
            inner: Mutex::new(SessionInner {
                state: SessionState::AwaitingInput,
                accumulator: AudioAccumulator::new(),
                last_artifact: None,
                pending: None,
                greeted: false,
            }),
            turn: tokio::sync::Mutex::new(()),
            transitions,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// The most recent successfully synthesized reply, if any.
    pub fn last_artifact(&self) -> Option<Artifact> {
        self.lock().last_artifact.clone()
    }

    /// Bytes buffered for the next utterance.
    pub fn buffered_len(&self) -> usize {
        self.lock().accumulator.len()
    }

    /// Every state this session enters from now on, in order.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionState> {
        self.transitions.subscribe()
    }

    /// Buffers an inbound audio chunk.
    pub fn append(&self, chunk: &[u8]) -> Result<(), SessionError> {
        let mut inner = self.lock();
        match inner.state {
            SessionState::Closed => {
                tracing::debug!(call_id = %self.id, "audio after close ignored");
                return Err(self.closed());
            }
            SessionState::AwaitingInput => self.transition(&mut inner, SessionState::Accumulating),
            SessionState::Accumulating | SessionState::Processing | SessionState::Error => {}
        }
        inner.accumulator.append(chunk);
        Ok(())
    }

    /// Flushes the buffered utterance and runs it through `pipeline`.
    ///
    /// Waits for any earlier run on this session to finish first. A stage
    /// failure is not an error here: it yields [`TurnOutcome::Fallback`] and
    /// the session is ready for the next utterance. If the session is closed
    /// while the pipeline runs, the reply is discarded and `SessionClosed`
    /// is returned.
    pub async fn end_of_utterance(
        &self,
        pipeline: &Pipeline,
        format: AudioFormat,
    ) -> Result<TurnOutcome, SessionError> {
        let _turn = self.turn.lock().await;
        let clip = self.lock().accumulator.flush();
        self.run_turn(pipeline, format, clip).await
    }

    /// Runs one complete utterance, such as a finished recording, through
    /// `pipeline`.
    ///
    /// The clip never passes through the buffer, so recordings submitted
    /// back to back are transcribed separately and in submission order.
    /// Outcomes are the same as for [`CallSession::end_of_utterance`].
    pub async fn submit_utterance(
        &self,
        pipeline: &Pipeline,
        clip: Vec<u8>,
        format: AudioFormat,
    ) -> Result<TurnOutcome, SessionError> {
        if self.is_closed() {
            return Err(self.closed());
        }
        let _turn = self.turn.lock().await;
        {
            let mut inner = self.lock();
            if inner.state != SessionState::Closed && !clip.is_empty() {
                self.transition(&mut inner, SessionState::Accumulating);
            }
        }
        self.run_turn(pipeline, format, clip).await
    }

    /// Processes `clip` as one utterance. The turn lock must be held.
    async fn run_turn(
        &self,
        pipeline: &Pipeline,
        format: AudioFormat,
        clip: Vec<u8>,
    ) -> Result<TurnOutcome, SessionError> {
        {
            let mut inner = self.lock();
            if inner.state == SessionState::Closed {
                return Err(self.closed());
            }
            if clip.is_empty() {
                tracing::debug!(call_id = %self.id, "end of utterance with nothing buffered");
                let next = if inner.accumulator.is_empty() {
                    SessionState::AwaitingInput
                } else {
                    SessionState::Accumulating
                };
                self.transition(&mut inner, next);
                return Ok(TurnOutcome::NoUtterance);
            }
            self.transition(&mut inner, SessionState::Processing);
        }

        let result = pipeline.run(&self.id, format.frame(clip)).await;

        let orphan = {
            let mut inner = self.lock();
            if inner.state != SessionState::Closed {
                return Ok(self.settle(&mut inner, result));
            }
            result.ok()
        };

        if let Some(artifact) = orphan {
            tracing::info!(
                call_id = %self.id,
                artifact = %artifact.name,
                "call ended during processing, discarding reply"
            );
            if let Err(e) = pipeline.store().delete(&artifact.name).await {
                tracing::warn!(
                    call_id = %self.id,
                    artifact = %artifact.name,
                    error = %e,
                    "failed to delete discarded reply"
                );
            }
        }
        Err(self.closed())
    }

    /// Records a finished run on a session that is still open.
    fn settle(
        &self,
        inner: &mut SessionInner,
        result: Result<Artifact, PipelineError>,
    ) -> TurnOutcome {
        let outcome = match result {
            Ok(artifact) => {
                inner.last_artifact = Some(artifact.clone());
                inner.pending = Some(Playback::Reply(artifact.name.clone()));
                TurnOutcome::Reply(artifact)
            }
            Err(e) => {
                tracing::warn!(call_id = %self.id, error = %e, "utterance failed, falling back");
                self.transition(inner, SessionState::Error);
                inner.pending = Some(Playback::Fallback);
                TurnOutcome::Fallback
            }
        };

        let next = if inner.accumulator.is_empty() {
            SessionState::AwaitingInput
        } else {
            SessionState::Accumulating
        };
        self.transition(inner, next);

        outcome
    }

    /// Takes what should be played on the next prompt.
    ///
    /// A pending reply or fallback is handed out once. The greeting is offered
    /// only on the first prompt of the call.
    pub fn take_playback(&self) -> Result<Option<Playback>, SessionError> {
        let mut inner = self.lock();
        if inner.state == SessionState::Closed {
            return Err(self.closed());
        }
        let first = !inner.greeted;
        inner.greeted = true;
        Ok(match inner.pending.take() {
            Some(playback) => Some(playback),
            None if first => Some(Playback::Greeting),
            None => None,
        })
    }

    /// Ends the session, releasing its buffer and artifact reference.
    ///
    /// Returns `false` if it was already closed. A pipeline run in flight is
    /// left to finish; its result is discarded.
    pub fn close(&self) -> bool {
        let mut inner = self.lock();
        if inner.state == SessionState::Closed {
            return false;
        }
        inner.accumulator.clear();
        inner.last_artifact = None;
        inner.pending = None;
        self.transition(&mut inner, SessionState::Closed);
        true
    }

    fn transition(&self, inner: &mut SessionInner, next: SessionState) {
        if inner.state == next {
            return;
        }
        tracing::debug!(call_id = %self.id, from = %inner.state, to = %next, "session transition");
        inner.state = next;
        // No receivers is the common case outside tests.
        let _ = self.transitions.send(next);
    }

    fn closed(&self) -> SessionError {
        SessionError::SessionClosed(self.id.clone())
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
