use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io/v1";

fn default_openai_base_url() -> String {
    OPENAI_BASE_URL.to_string()
}

fn default_elevenlabs_base_url() -> String {
    ELEVENLABS_BASE_URL.to_string()
}

fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

fn default_min_chars() -> usize {
    2
}

fn default_response_model() -> String {
    "gpt-4o".to_string()
}

fn default_system_prompt() -> String {
    "You are a helpful AI voice assistant on a phone call. Answer briefly and clearly.".to_string()
}

fn default_synthesis_model() -> String {
    "eleven_monolingual_v1".to_string()
}

fn default_voice_setting() -> f32 {
    0.5
}

fn default_request_timeout_seconds() -> u64 {
    30
}

fn default_synthesis_timeout_seconds() -> u64 {
    60
}

/// Speech-to-text backend settings (OpenAI-compatible `/audio/transcriptions`).
#[derive(Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_transcription_model")]
    pub model: String,
    /// Transcripts with fewer characters than this (after trimming) count as empty.
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
    #[serde(default = "default_request_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            api_key: String::new(),
            model: default_transcription_model(),
            min_chars: default_min_chars(),
            timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

impl fmt::Debug for TranscriptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscriptionConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("min_chars", &self.min_chars)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

impl TranscriptionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Text-generation backend settings (OpenAI-compatible `/chat/completions`).
#[derive(Clone, Serialize, Deserialize)]
pub struct ResponseConfig {
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_response_model")]
    pub model: String,
    /// System prompt constraining tone and length of replies.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_request_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            api_key: String::new(),
            model: default_response_model(),
            system_prompt: default_system_prompt(),
            max_tokens: None,
            timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

impl fmt::Debug for ResponseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("system_prompt", &self.system_prompt)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

impl ResponseConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Text-to-speech backend settings (ElevenLabs-compatible `/text-to-speech/{voice}`).
#[derive(Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    #[serde(default = "default_elevenlabs_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default)]
    pub voice_id: String,
    #[serde(default = "default_synthesis_model")]
    pub model_id: String,
    #[serde(default = "default_voice_setting")]
    pub stability: f32,
    #[serde(default = "default_voice_setting")]
    pub similarity_boost: f32,
    #[serde(default = "default_synthesis_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            base_url: default_elevenlabs_base_url(),
            api_key: String::new(),
            voice_id: String::new(),
            model_id: default_synthesis_model(),
            stability: default_voice_setting(),
            similarity_boost: default_voice_setting(),
            timeout_seconds: default_synthesis_timeout_seconds(),
        }
    }
}

impl fmt::Debug for SynthesisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynthesisConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("voice_id", &self.voice_id)
            .field("model_id", &self.model_id)
            .field("stability", &self.stability)
            .field("similarity_boost", &self.similarity_boost)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

impl SynthesisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}
