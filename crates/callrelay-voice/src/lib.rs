//! Speech and language stages for call relaying.
//!
//! Provides the three stages every caller utterance goes through: speech
//! to text, text to reply, and reply to speech. Each stage is a trait with
//! one async operation so that the HTTP adapters here and in-process fakes
//! are interchangeable.
//!
//! The adapters speak the OpenAI transcription and chat-completion APIs and
//! the ElevenLabs text-to-speech API, or any server compatible with them.
//! Every request runs under the stage's configured timeout, so a stage
//! either returns a value or a classifiable [`StageError`] in bounded time.

pub mod chat;
pub mod config;
pub mod error;
pub mod stage;
pub mod stt;
pub mod tts;

pub use chat::ChatResponder;
pub use config::{ResponseConfig, SynthesisConfig, TranscriptionConfig};
pub use error::StageError;
pub use stage::{ResponseStage, Stages, SynthesisStage, TranscriptionStage};
pub use stt::{meaningful_transcript, WhisperTranscriber};
pub use tts::ElevenLabsSynthesizer;
