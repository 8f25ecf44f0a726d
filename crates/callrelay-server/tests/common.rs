#![allow(dead_code)]

use async_trait::async_trait;
use callrelay_server::pipeline::Pipeline;
use callrelay_server::session::{CallSession, SessionState};
use callrelay_server::AppState;
use callrelay_server::config::TelephonyConfig;
use callrelay_store::{ArtifactStore, Clock, ManualClock};
use callrelay_voice::{
    meaningful_transcript, ResponseStage, StageError, Stages, SynthesisStage, TranscriptionStage,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

type TranscribeFn = dyn Fn(&[u8]) -> Result<String, StageError> + Send + Sync;
type RespondFn = dyn Fn(&str) -> Result<String, StageError> + Send + Sync;
type SynthesizeFn = dyn Fn(&str) -> Result<Vec<u8>, StageError> + Send + Sync;

/// Counts calls and tracks how many run at once.
#[derive(Debug, Default)]
pub struct CallStats {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl CallStats {
    fn enter(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

pub struct FakeTranscriber {
    f: Box<TranscribeFn>,
    delay: Duration,
    pub stats: CallStats,
    pub clips: Mutex<Vec<Vec<u8>>>,
}

impl FakeTranscriber {
    pub fn new(f: impl Fn(&[u8]) -> Result<String, StageError> + Send + Sync + 'static) -> Self {
        Self {
            f: Box::new(f),
            delay: Duration::ZERO,
            stats: CallStats::default(),
            clips: Mutex::new(Vec::new()),
        }
    }

    /// Always hears `text`.
    pub fn returning(text: &'static str) -> Self {
        Self::new(move |_| meaningful_transcript(text, 2))
    }

    /// Hears the clip bytes as UTF-8 text.
    pub fn echo() -> Self {
        Self::new(|clip| meaningful_transcript(&String::from_utf8_lossy(clip), 2))
    }

    pub fn failing() -> Self {
        Self::new(|_| Err(StageError::Upstream("transcription backend returned HTTP 503".into())))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn clips(&self) -> Vec<Vec<u8>> {
        self.clips.lock().unwrap().clone()
    }
}

#[async_trait]
impl TranscriptionStage for FakeTranscriber {
    async fn transcribe(&self, clip: &[u8]) -> Result<String, StageError> {
        self.stats.enter();
        self.clips.lock().unwrap().push(clip.to_vec());
        tokio::time::sleep(self.delay).await;
        self.stats.exit();
        (self.f)(clip)
    }
}

pub struct FakeResponder {
    f: Box<RespondFn>,
    delay: Duration,
    pub stats: CallStats,
}

impl FakeResponder {
    pub fn new(f: impl Fn(&str) -> Result<String, StageError> + Send + Sync + 'static) -> Self {
        Self {
            f: Box::new(f),
            delay: Duration::ZERO,
            stats: CallStats::default(),
        }
    }

    pub fn returning(reply: &'static str) -> Self {
        Self::new(move |_| Ok(reply.to_string()))
    }

    /// Replies with `"reply to: {text}"`.
    pub fn echo() -> Self {
        Self::new(|text| Ok(format!("reply to: {}", text)))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl ResponseStage for FakeResponder {
    async fn respond(&self, text: &str) -> Result<String, StageError> {
        self.stats.enter();
        tokio::time::sleep(self.delay).await;
        self.stats.exit();
        (self.f)(text)
    }
}

pub struct FakeSynthesizer {
    f: Box<SynthesizeFn>,
    delay: Duration,
    pub stats: CallStats,
}

impl FakeSynthesizer {
    pub fn new(f: impl Fn(&str) -> Result<Vec<u8>, StageError> + Send + Sync + 'static) -> Self {
        Self {
            f: Box::new(f),
            delay: Duration::ZERO,
            stats: CallStats::default(),
        }
    }

    pub fn returning(audio: &'static [u8]) -> Self {
        Self::new(move |_| Ok(audio.to_vec()))
    }

    /// Produces `"AUDIO:{text}"` as the audio bytes.
    pub fn echo() -> Self {
        Self::new(|text| Ok(format!("AUDIO:{}", text).into_bytes()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl SynthesisStage for FakeSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, StageError> {
        self.stats.enter();
        tokio::time::sleep(self.delay).await;
        self.stats.exit();
        (self.f)(text)
    }
}

/// A pipeline over fake stages and a temporary artifact directory.
pub struct Harness {
    pub dir: TempDir,
    pub clock: Arc<ManualClock>,
    pub store: ArtifactStore,
    pub transcriber: Arc<FakeTranscriber>,
    pub responder: Arc<FakeResponder>,
    pub synthesizer: Arc<FakeSynthesizer>,
    pub pipeline: Pipeline,
}

impl Harness {
    pub async fn new(
        transcriber: FakeTranscriber,
        responder: FakeResponder,
        synthesizer: FakeSynthesizer,
    ) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let clock = Arc::new(ManualClock::default());
        let store = ArtifactStore::open_with_clock(dir.path(), clock.clone() as Arc<dyn Clock>)
            .await
            .expect("open store");

        let transcriber = Arc::new(transcriber);
        let responder = Arc::new(responder);
        let synthesizer = Arc::new(synthesizer);
        let stages = Stages::new(transcriber.clone(), responder.clone(), synthesizer.clone());
        let pipeline = Pipeline::new(store.clone(), stages);

        Self {
            dir,
            clock,
            store,
            transcriber,
            responder,
            synthesizer,
            pipeline,
        }
    }

    /// Stages that answer every clip with a reply derived from its bytes.
    pub async fn echoing() -> Self {
        Self::new(
            FakeTranscriber::echo(),
            FakeResponder::echo(),
            FakeSynthesizer::echo(),
        )
        .await
    }

    pub fn app_state(&self, telephony: TelephonyConfig) -> AppState {
        AppState::new(
            self.pipeline.clone(),
            telephony,
            Some("https://relay.example".to_string()),
        )
    }

    pub fn stage_calls(&self) -> usize {
        self.transcriber.stats.calls()
            + self.responder.stats.calls()
            + self.synthesizer.stats.calls()
    }
}

/// Waits until `rx` reports `state`, failing after a second.
pub async fn wait_for_state(rx: &mut broadcast::Receiver<SessionState>, state: SessionState) {
    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            match rx.recv().await {
                Ok(s) if s == state => return,
                Ok(_) => continue,
                Err(e) => panic!("transition feed ended: {}", e),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("session never reached {}", state));
}

/// Drains every transition already reported.
pub fn drain(rx: &mut broadcast::Receiver<SessionState>) -> Vec<SessionState> {
    let mut seen = Vec::new();
    while let Ok(state) = rx.try_recv() {
        seen.push(state);
    }
    seen
}

pub fn new_session(id: &str) -> Arc<CallSession> {
    Arc::new(CallSession::new(id))
}
