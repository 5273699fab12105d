//! Error types for the client voice pipeline.

use thiserror::Error;

/// Result type alias for voice pipeline operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur in the client-side pipeline.
#[derive(Error, Debug)]
pub enum VoiceError {
    /// No usable input device, or the OS refused access to it. Terminal for
    /// the attempt.
    #[error("microphone permission denied: {0}")]
    MicrophonePermissionDenied(String),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("playback error: {0}")]
    Playback(String),

    /// The duplex channel closed and the single reconnect did not recover it.
    #[error("transport closed: {0}")]
    TransportClosed(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed inbound message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The session hit its hard deadline.
    #[error("session expired")]
    SessionExpired,

    #[error("channel send error: {0}")]
    ChannelSend(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<cpal::DevicesError> for VoiceError {
    fn from(err: cpal::DevicesError) -> Self {
        VoiceError::AudioDevice(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for VoiceError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        match err {
            cpal::DefaultStreamConfigError::DeviceNotAvailable => {
                VoiceError::MicrophonePermissionDenied("input device not available".to_string())
            }
            other => VoiceError::AudioDevice(other.to_string()),
        }
    }
}

impl From<cpal::BuildStreamError> for VoiceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        match err {
            cpal::BuildStreamError::DeviceNotAvailable => {
                VoiceError::MicrophonePermissionDenied("input device not available".to_string())
            }
            other => VoiceError::AudioStream(other.to_string()),
        }
    }
}

impl From<cpal::PlayStreamError> for VoiceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        VoiceError::AudioStream(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for VoiceError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                VoiceError::TransportClosed("websocket closed".to_string())
            }
            other => VoiceError::Transport(other.to_string()),
        }
    }
}
