//! Call session value objects

use serde::{Deserialize, Serialize};
use std::fmt;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Telephony handshake done, realtime service not yet connected
    Created,
    /// Both channels open, audio flowing
    Active,
    /// Closing both channels
    Terminating,
    /// Channels closed, record flushed
    Closed,
}

impl SessionState {
    /// Check if state transition is valid
    pub fn can_transition_to(&self, new_state: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, new_state),
            (Created, Active) | (Created, Terminating) | (Active, Terminating) | (Terminating, Closed)
        )
    }

    pub fn is_open(&self) -> bool {
        matches!(self, SessionState::Created | SessionState::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Active => "active",
            SessionState::Terminating => "terminating",
            SessionState::Closed => "closed",
        }
    }
}

/// Reason a call session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndReason {
    /// Telephony side sent `stop`
    CallerHangup,
    /// Either socket closed while the session was active
    UpstreamDisconnect,
    /// Malformed or unexpected wire message
    ProtocolError,
    /// Realtime service session could not be opened in time
    HandshakeFailed,
    /// Process is shutting down
    ServerShutdown,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::CallerHangup => "caller-hangup",
            EndReason::UpstreamDisconnect => "upstream-disconnect",
            EndReason::ProtocolError => "protocol-error",
            EndReason::HandshakeFailed => "handshake-failed",
            EndReason::ServerShutdown => "server-shutdown",
        }
    }

    pub fn is_abnormal(&self) -> bool {
        !matches!(self, EndReason::CallerHangup | EndReason::ServerShutdown)
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who spoke a transcript turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Caller,
    Assistant,
}
