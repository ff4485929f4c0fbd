//! Domain errors

use super::value_objects::{ChannelSide, ResponseId, SessionId};
use thiserror::Error;

/// Domain result type
pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Error, Debug, Clone)]
pub enum RelayError {
    /// Malformed or unexpected wire message. Fatal to the session only.
    #[error("Protocol error on {side} channel: {message}")]
    Protocol { side: ChannelSide, message: String },

    /// A socket closed while the session was still active.
    #[error("Upstream disconnect on {side} channel: {reason}")]
    UpstreamDisconnect { side: ChannelSide, reason: String },

    #[error("Handshake on {side} channel did not complete in time")]
    HandshakeTimeout { side: ChannelSide },

    #[error("Handshake on {side} channel failed: {message}")]
    HandshakeFailed { side: ChannelSide, message: String },

    /// Recoverable: the controller drops buffered output and returns to idle.
    #[error("Truncate of response {response_id} not acknowledged after {waited_ms}ms")]
    TruncateTimeout {
        response_id: ResponseId,
        waited_ms: u64,
    },

    #[error("Persistence write for session {session_id} failed after {attempts} attempts: {message}")]
    PersistenceWrite {
        session_id: SessionId,
        attempts: u32,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Entity already exists: {0}")]
    AlreadyExists(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    pub fn protocol(side: ChannelSide, message: impl Into<String>) -> Self {
        RelayError::Protocol {
            side,
            message: message.into(),
        }
    }

    pub fn disconnect(side: ChannelSide, reason: impl Into<String>) -> Self {
        RelayError::UpstreamDisconnect {
            side,
            reason: reason.into(),
        }
    }

    /// Whether the session can keep running after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RelayError::TruncateTimeout { .. } | RelayError::PersistenceWrite { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RelayError::protocol(ChannelSide::Telephony, "unexpected event 'foo'");
        assert_eq!(
            err.to_string(),
            "Protocol error on telephony channel: unexpected event 'foo'"
        );

        let err = RelayError::disconnect(ChannelSide::Realtime, "socket closed");
        assert!(err.to_string().contains("realtime"));
    }

    #[test]
    fn test_recoverable_errors() {
        let timeout = RelayError::TruncateTimeout {
            response_id: ResponseId::new("resp_1"),
            waited_ms: 2000,
        };
        assert!(timeout.is_recoverable());
        assert!(!RelayError::protocol(ChannelSide::Telephony, "bad").is_recoverable());
        assert!(!RelayError::Configuration("missing key".into()).is_recoverable());
    }
}
