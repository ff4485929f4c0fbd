//! Shared value objects used across the relay

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Relay-side session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Declares a string-backed identifier issued by one of the remote peers.
macro_rules! remote_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

remote_id!(
    /// Telephony media stream identifier (`streamSid`)
    StreamSid
);
remote_id!(
    /// Telephony call identifier (`callSid`)
    CallSid
);
remote_id!(
    /// Realtime service session identifier
    AiSessionId
);
remote_id!(
    /// Realtime service response identifier
    ResponseId
);
remote_id!(
    /// Realtime service conversation item identifier
    ItemId
);

/// Which of the two sockets an event or error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelSide {
    /// Telephony media stream
    Telephony,
    /// Realtime voice service
    Realtime,
}

impl ChannelSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelSide::Telephony => "telephony",
            ChannelSide::Realtime => "realtime",
        }
    }

    /// The socket on the other end of the relay
    pub fn peer(&self) -> ChannelSide {
        match self {
            ChannelSide::Telephony => ChannelSide::Realtime,
            ChannelSide::Realtime => ChannelSide::Telephony,
        }
    }
}

impl fmt::Display for ChannelSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_id_serializes_as_plain_string() {
        let id = ResponseId::new("resp_123");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"resp_123\"");
        assert_eq!(id.to_string(), "resp_123");

        let parsed: StreamSid = serde_json::from_str("\"MZ42\"").unwrap();
        assert_eq!(parsed.as_str(), "MZ42");
    }

    #[test]
    fn test_channel_side_peer() {
        assert_eq!(ChannelSide::Telephony.peer(), ChannelSide::Realtime);
        assert_eq!(ChannelSide::Realtime.peer(), ChannelSide::Telephony);
        assert_eq!(ChannelSide::Realtime.to_string(), "realtime");
    }
}
