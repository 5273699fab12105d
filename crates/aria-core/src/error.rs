//! Error taxonomy shared across the relay.

use thiserror::Error;

/// Result type alias for core relay operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can cross the relay boundary. Everything session- or
/// connection-fatal is one of these; transient conditions (heartbeat
/// misses, the single transport reconnect) are handled locally and never
/// surface here.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A required server credential or setting is absent. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The upstream credential exchange or handshake failed. Retryable.
    #[error("upstream unavailable: {message}")]
    UpstreamUnavailable {
        message: String,
        /// Seconds the upstream asked us to wait, when it said so (429).
        retry_after: Option<u64>,
    },

    /// The client could not open a microphone stream. Terminal for the attempt.
    #[error("microphone permission denied: {0}")]
    MicrophonePermissionDenied(String),

    /// A duplex leg closed unexpectedly. Triggers the single-reconnect policy.
    #[error("transport closed: {0}")]
    TransportClosed(String),

    /// A malformed or out-of-protocol message. Connection-scoped.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The session's hard deadline passed. Hard close, no retry.
    #[error("session expired")]
    SessionExpired,
}

impl CoreError {
    /// Whether the caller may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::UpstreamUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(CoreError::UpstreamUnavailable {
            message: "502".into(),
            retry_after: None
        }
        .is_retryable());
        assert!(!CoreError::SessionExpired.is_retryable());
        assert!(!CoreError::Configuration("missing key".into()).is_retryable());
    }
}
