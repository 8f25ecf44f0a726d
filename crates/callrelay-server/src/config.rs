//! Server configuration loading from file and environment variables.

use callrelay_voice::{ResponseConfig, SynthesisConfig, TranscriptionConfig};
use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Artifact storage and retention.
    #[serde(default)]
    pub artifacts: ArtifactConfig,

    /// Call flow settings.
    #[serde(default)]
    pub telephony: TelephonyConfig,

    #[serde(default)]
    pub transcription: TranscriptionConfig,

    #[serde(default)]
    pub response: ResponseConfig,

    #[serde(default)]
    pub synthesis: SynthesisConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Externally reachable base URL (e.g. `https://relay.example.com`).
    ///
    /// When unset, URLs handed to the telephony provider are derived from the
    /// request's `Host` header.
    #[serde(default)]
    pub public_url: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "callrelay_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Where artifacts live and how long replies are kept.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactConfig {
    #[serde(default = "default_artifact_dir")]
    pub dir: String,

    /// Replies older than this are removed by the retention sweep. Must
    /// comfortably exceed the time the telephony provider takes to fetch a reply.
    #[serde(default = "default_retention_seconds")]
    pub retention_seconds: u64,

    /// Seconds between sweeps. `0` disables the retention task.
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

#[derive(Clone, Deserialize)]
pub struct TelephonyConfig {
    /// Maximum length in seconds of one recorded utterance.
    #[serde(default = "default_record_max_length")]
    pub record_max_length: u32,

    /// Spoken when an utterance could not be answered.
    #[serde(default = "default_fallback_message")]
    pub fallback_message: String,

    /// Spoken once at the start of a call, if set.
    #[serde(default)]
    pub greeting: Option<String>,

    /// Credentials for fetching recordings by URL.
    #[serde(default)]
    pub account_sid: String,

    #[serde(default)]
    pub auth_token: String,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    10000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_artifact_dir() -> String {
    "artifacts".to_string()
}

fn default_retention_seconds() -> u64 {
    600
}

fn default_sweep_interval_seconds() -> u64 {
    60
}

fn default_record_max_length() -> u32 {
    10
}

fn default_fallback_message() -> String {
    "Sorry, I didn't catch that. Please try again after the beep.".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            dir: default_artifact_dir(),
            retention_seconds: default_retention_seconds(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

impl ArtifactConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            record_max_length: default_record_max_length(),
            fallback_message: default_fallback_message(),
            greeting: None,
            account_sid: String::new(),
            auth_token: String::new(),
        }
    }
}

impl fmt::Debug for TelephonyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelephonyConfig")
            .field("record_max_length", &self.record_max_length)
            .field("fallback_message", &self.fallback_message)
            .field("greeting", &self.greeting)
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"[REDACTED]")
            .finish()
    }
}

impl TelephonyConfig {
    /// Basic-auth credentials for recording downloads, when configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.account_sid.is_empty() {
            None
        } else {
            Some((&self.account_sid, &self.auth_token))
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `CALLRELAY_HOST` overrides `server.host`
/// - `CALLRELAY_PORT` (or `PORT`) overrides `server.port`
/// - `CALLRELAY_PUBLIC_URL` overrides `server.public_url`
/// - `CALLRELAY_LOG_LEVEL` overrides `logging.level`
/// - `CALLRELAY_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `CALLRELAY_ARTIFACT_DIR` overrides `artifacts.dir`
/// - `OPENAI_API_KEY` sets `transcription.api_key` and `response.api_key`
/// - `ELEVENLABS_API_KEY` sets `synthesis.api_key`
/// - `ELEVENLABS_VOICE_ID` sets `synthesis.voice_id`
/// - `TWILIO_ACCOUNT_SID` and `TWILIO_AUTH_TOKEN` set the recording credentials
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Applies environment overrides using `lookup` to read variables.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(host) = lookup("CALLRELAY_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = lookup("CALLRELAY_PORT").or_else(|| lookup("PORT")) {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(url) = lookup("CALLRELAY_PUBLIC_URL") {
        config.server.public_url = Some(url).filter(|u| !u.trim().is_empty());
    }
    if let Some(level) = lookup("CALLRELAY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("CALLRELAY_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(dir) = lookup("CALLRELAY_ARTIFACT_DIR") {
        config.artifacts.dir = dir;
    }
    if let Some(key) = lookup("OPENAI_API_KEY") {
        config.transcription.api_key = key.clone();
        config.response.api_key = key;
    }
    if let Some(key) = lookup("ELEVENLABS_API_KEY") {
        config.synthesis.api_key = key;
    }
    if let Some(voice) = lookup("ELEVENLABS_VOICE_ID") {
        config.synthesis.voice_id = voice;
    }
    if let Some(sid) = lookup("TWILIO_ACCOUNT_SID") {
        config.telephony.account_sid = sid;
    }
    if let Some(token) = lookup("TWILIO_AUTH_TOKEN") {
        config.telephony.auth_token = token;
    }
}
