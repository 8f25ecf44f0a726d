//! Media Streams wire frames and clip framing.
//!
//! Twilio streams call audio over a WebSocket as JSON frames whose `event`
//! field selects the payload. Audio arrives as base64 G.711 μ-law, 8 kHz mono,
//! with no container; before transcription the accumulated samples are wrapped
//! in a WAV header so the transcription backend can identify the codec. The
//! samples themselves are never converted.

use serde::{Deserialize, Serialize};

/// WAVE format tag for ITU G.711 μ-law.
const WAVE_FORMAT_MULAW: u16 = 7;

/// Encoding name Twilio reports for μ-law streams.
pub const MULAW_ENCODING: &str = "audio/x-mulaw";

/// Sample rates accepted from a stream's `mediaFormat`.
const SAMPLE_RATES: std::ops::RangeInclusive<u32> = 8000..=48000;

/// Channel counts accepted from a stream's `mediaFormat`.
const CHANNELS: std::ops::RangeInclusive<u16> = 1..=2;

/// Size of the header written by [`mulaw_wav`].
const MULAW_WAV_HEADER_LEN: usize = 58;

/// Inbound Media Streams frame.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum StreamEvent {
    Connected,
    Start {
        start: StreamStart,
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
    },
    Media {
        media: MediaChunk,
    },
    Mark {
        #[serde(default)]
        mark: Option<MarkLabel>,
    },
    Stop {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStart {
    #[serde(default)]
    pub call_sid: Option<String>,
    #[serde(default)]
    pub stream_sid: Option<String>,
    #[serde(default)]
    pub media_format: Option<MediaFormat>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    pub encoding: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
}

fn default_sample_rate() -> u32 {
    8000
}

fn default_channels() -> u16 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaChunk {
    /// Base64-encoded audio.
    pub payload: String,
    #[serde(default)]
    pub track: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkLabel {
    pub name: String,
}

/// Outbound `mark` frame telling the stream peer a reply is ready.
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingMark {
    event: &'static str,
    #[serde(rename = "streamSid")]
    stream_sid: String,
    mark: MarkLabel,
}

impl OutgoingMark {
    pub fn new(stream_sid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            event: "mark",
            stream_sid: stream_sid.into(),
            mark: MarkLabel { name: name.into() },
        }
    }
}

/// How the bytes of a flushed utterance are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// The clip carries its own container, as telephony recordings do.
    Container,
    /// Headerless μ-law samples.
    Mulaw { sample_rate: u32, channels: u16 },
}

impl AudioFormat {
    /// The format of a Twilio Media Stream when the start frame omits it.
    pub const TWILIO_STREAM: AudioFormat = AudioFormat::Mulaw {
        sample_rate: 8000,
        channels: 1,
    };

    pub fn from_media_format(format: Option<&MediaFormat>) -> Self {
        match format {
            Some(f) if f.encoding.eq_ignore_ascii_case(MULAW_ENCODING) => {
                if SAMPLE_RATES.contains(&f.sample_rate) && CHANNELS.contains(&f.channels) {
                    AudioFormat::Mulaw {
                        sample_rate: f.sample_rate,
                        channels: f.channels,
                    }
                } else {
                    tracing::warn!(
                        sample_rate = f.sample_rate,
                        channels = f.channels,
                        "implausible stream media format, assuming 8 kHz mono"
                    );
                    AudioFormat::TWILIO_STREAM
                }
            }
            Some(f) => {
                tracing::warn!(
                    encoding = %f.encoding,
                    "unrecognised stream encoding, forwarding samples without a container"
                );
                AudioFormat::Container
            }
            None => AudioFormat::TWILIO_STREAM,
        }
    }

    /// Produces the clip handed to the transcription stage.
    pub fn frame(self, raw: Vec<u8>) -> Vec<u8> {
        match self {
            AudioFormat::Container => raw,
            AudioFormat::Mulaw {
                sample_rate,
                channels,
            } => match mulaw_wav(&raw, sample_rate, channels) {
                Some(wav) => wav,
                None => {
                    tracing::warn!(
                        len = raw.len(),
                        sample_rate,
                        channels,
                        "clip cannot be described by a WAV header, forwarding raw samples"
                    );
                    raw
                }
            },
        }
    }
}

/// Wraps μ-law samples in a WAV container.
///
/// Returns `None` when the header fields would not fit their 32-bit slots.
pub fn mulaw_wav(samples: &[u8], sample_rate: u32, channels: u16) -> Option<Vec<u8>> {
    let channels = channels.max(1);
    let data_len = u32::try_from(samples.len()).ok()?;
    let frames = data_len / u32::from(channels);
    let byte_rate = sample_rate.checked_mul(u32::from(channels))?;
    // WAVE tag + fmt (8 + 18) + fact (8 + 4) + data header (8)
    let riff_len = data_len.checked_add(4 + 26 + 12 + 8)?;

    let mut wav = Vec::with_capacity(MULAW_WAV_HEADER_LEN + samples.len());

    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&riff_len.to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    // fmt chunk, non-PCM layout with a zero-length extension
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&18u32.to_le_bytes());
    wav.extend_from_slice(&WAVE_FORMAT_MULAW.to_le_bytes());
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&channels.to_le_bytes()); // block align
    wav.extend_from_slice(&8u16.to_le_bytes()); // bits per sample
    wav.extend_from_slice(&0u16.to_le_bytes()); // cbSize

    wav.extend_from_slice(b"fact");
    wav.extend_from_slice(&4u32.to_le_bytes());
    wav.extend_from_slice(&frames.to_le_bytes());

    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.extend_from_slice(samples);

    Some(wav)
}
