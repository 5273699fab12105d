//! Duplex wire protocol: tagged JSON messages with base64 PCM16 payloads.
//!
//! The same message set runs on both legs: what the client sends the relay
//! is what the relay forwards upstream ([`ClientEvent`]), and what the
//! upstream emits is what the relay translates back to the client
//! ([`ServerEvent`]). Audio is 16-bit signed little-endian PCM, mono,
//! 24 kHz, carried base64-encoded inside message frames.

use serde::{Deserialize, Serialize};

/// Fixed capture/playback sample rate in Hz.
pub const SAMPLE_RATE: u32 = 24_000;
/// Mono throughout.
pub const CHANNELS: u16 = 1;
/// Samples per frame: 40 ms at 24 kHz, sized to bound end-to-end latency.
pub const FRAME_SAMPLES: usize = 960;
/// Bytes per frame (PCM16).
pub const FRAME_BYTES: usize = FRAME_SAMPLES * 2;
/// Frame duration in milliseconds.
pub const FRAME_MS: u64 = 40;

/// Base64 carriage for PCM16 payloads inside JSON frames.
mod base64_pcm {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        BASE64.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(encoded)
            .map_err(|e| serde::de::Error::custom(format!("invalid base64 audio: {}", e)))
    }
}

/// Messages flowing toward the model: client → relay and relay → upstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// One captured audio frame.
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioAppend {
        #[serde(with = "base64_pcm")]
        audio: Vec<u8>,
    },

    /// Close out the buffered utterance.
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioCommit,

    /// Local VAD detected speech onset.
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,

    /// Local VAD detected end of speech.
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,

    /// Request a reply. The relay suppresses duplicates while one is pending.
    #[serde(rename = "response.create")]
    ResponseCreate,

    /// Cancel the in-flight reply (barge-in).
    #[serde(rename = "response.cancel")]
    ResponseCancel,

    #[serde(rename = "error")]
    Error { message: String },
}

/// Messages flowing from the model: upstream → relay and relay → client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// The upstream accepted a reply request.
    #[serde(rename = "response.created")]
    ResponseCreated,

    /// Incremental reply text.
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta { delta: String },

    /// Incremental synthesized reply audio (PCM16, same format as capture).
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        #[serde(with = "base64_pcm")]
        delta: Vec<u8>,
    },

    /// Reply finished. Some upstreams tag this `response.done`.
    #[serde(rename = "response.completed", alias = "response.done")]
    ResponseCompleted {
        #[serde(default)]
        output_text: String,
    },

    /// Terminal transcript of the user's utterance.
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted { transcript: String },

    /// Upstream-side VAD observed speech onset.
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,

    /// Upstream-side VAD observed end of speech.
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,

    /// ContentGuard side channel: the transcript was flagged. Does not
    /// suppress the spoken reply.
    #[serde(rename = "moderation.flagged")]
    ModerationFlagged { flags: Vec<String> },

    /// The session hit its hard deadline; the connection is closing.
    #[serde(rename = "session.expired")]
    SessionExpired,

    #[serde(rename = "error")]
    Error { message: String },
}

/// Speaker role for transcripts and memory records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A transcript update for one utterance. A partial event supersedes the
/// prior partial for the same id; a terminal event closes the utterance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptEvent {
    pub id: String,
    pub text: String,
    pub partial: bool,
    pub role: Role,
}

/// Interpret raw PCM16 bytes as little-endian samples.
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

/// Pack samples into little-endian PCM16 bytes.
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}
