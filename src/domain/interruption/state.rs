//! Interruption state and the values it trades in

use crate::domain::shared::value_objects::{ItemId, ResponseId};
use std::fmt;

/// Barge-in state of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterruptionState {
    /// Nobody is speaking
    Idle,
    /// Assistant audio for this response is being forwarded to the caller
    AiSpeaking(ResponseId),
    /// Caller is speaking and no response is open
    UserSpeaking,
    /// Truncate issued for this response, awaiting acknowledgment
    Truncating(ResponseId),
}

impl InterruptionState {
    pub fn name(&self) -> &'static str {
        match self {
            InterruptionState::Idle => "idle",
            InterruptionState::AiSpeaking(_) => "ai_speaking",
            InterruptionState::UserSpeaking => "user_speaking",
            InterruptionState::Truncating(_) => "truncating",
        }
    }
}

impl fmt::Display for InterruptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterruptionState::AiSpeaking(r) | InterruptionState::Truncating(r) => {
                write!(f, "{}({})", self.name(), r)
            }
            _ => f.write_str(self.name()),
        }
    }
}

/// Identifies where a response's audio lives in the realtime conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseAudio {
    pub response_id: ResponseId,
    pub item_id: ItemId,
    pub content_index: u32,
}

impl ResponseAudio {
    pub fn new(response_id: ResponseId, item_id: ItemId, content_index: u32) -> Self {
        Self {
            response_id,
            item_id,
            content_index,
        }
    }
}

/// What happened to audio handed to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioDisposition {
    /// Buffered for playout
    Queued(usize),
    /// Nothing to buffer (zero-length frames)
    Ignored,
    /// Response was already truncated; frames discarded
    Dropped(usize),
}
