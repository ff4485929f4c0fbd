//! Normalized events flowing into a session's queue
//!
//! Both channel adapters translate their wire protocol into these events and
//! push them onto one ordered queue; the session consumer loop is the only
//! reader.

use crate::domain::audio::AudioFrame;
use crate::domain::interruption::ResponseAudio;
use crate::domain::session::value_object::Speaker;
use crate::domain::shared::value_objects::{ChannelSide, ItemId, ResponseId};
use bytes::Bytes;

#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Decoded caller audio
    CallerAudio(AudioFrame),
    /// Playback mark echoed by the telephony side
    Mark { name: String },
    /// Keypad digit pressed by the caller
    Dtmf { digit: String },
    /// Telephony `stop`: the caller hung up
    CallerHangup,
    /// Assistant audio for one response
    AudioDelta { audio: ResponseAudio, payload: Bytes },
    /// Partial or final transcript text
    TranscriptDelta {
        speaker: Speaker,
        text: String,
        is_final: bool,
        response_id: Option<ResponseId>,
        item_id: Option<ItemId>,
    },
    ResponseDone {
        response_id: ResponseId,
        status: Option<String>,
        output: Option<serde_json::Value>,
        usage: Option<serde_json::Value>,
    },
    SpeechStarted { source: ChannelSide },
    SpeechStopped { source: ChannelSide },
    FunctionCall {
        call_id: String,
        name: Option<String>,
        arguments: String,
    },
    TruncateAcknowledged { item_id: ItemId, audio_end_ms: u32 },
    ServiceError {
        code: Option<String>,
        message: String,
    },
    /// A socket ended without a protocol-level goodbye
    Disconnected { side: ChannelSide, reason: String },
    /// A peer sent something the adapter could not accept
    ProtocolViolation { side: ChannelSide, message: String },
}

impl SessionEvent {
    /// Short name used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::CallerAudio(_) => "caller_audio",
            SessionEvent::Mark { .. } => "mark",
            SessionEvent::Dtmf { .. } => "dtmf",
            SessionEvent::CallerHangup => "caller_hangup",
            SessionEvent::AudioDelta { .. } => "audio_delta",
            SessionEvent::TranscriptDelta { .. } => "transcript_delta",
            SessionEvent::ResponseDone { .. } => "response_done",
            SessionEvent::SpeechStarted { .. } => "speech_started",
            SessionEvent::SpeechStopped { .. } => "speech_stopped",
            SessionEvent::FunctionCall { .. } => "function_call",
            SessionEvent::TruncateAcknowledged { .. } => "truncate_acknowledged",
            SessionEvent::ServiceError { .. } => "service_error",
            SessionEvent::Disconnected { .. } => "disconnected",
            SessionEvent::ProtocolViolation { .. } => "protocol_violation",
        }
    }
}
