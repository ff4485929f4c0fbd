//! Audio frame entity

use super::format::AudioFormat;
use crate::domain::shared::value_objects::ResponseId;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Direction of travel through the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameDirection {
    /// Caller audio, telephony → realtime service
    Inbound,
    /// Assistant audio, realtime service → telephony
    Outbound,
}

/// One immutable chunk of audio
///
/// Frames are ordered by `sequence` within a direction. Outbound frames carry
/// the response they belong to.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    payload: Bytes,
    format: AudioFormat,
    sequence: u64,
    timestamp: DateTime<Utc>,
    direction: FrameDirection,
    response_id: Option<ResponseId>,
}

impl AudioFrame {
    pub fn inbound(payload: Bytes, format: AudioFormat, sequence: u64) -> Self {
        Self {
            payload,
            format,
            sequence,
            timestamp: Utc::now(),
            direction: FrameDirection::Inbound,
            response_id: None,
        }
    }

    pub fn outbound(
        payload: Bytes,
        format: AudioFormat,
        sequence: u64,
        response_id: ResponseId,
    ) -> Self {
        Self {
            payload,
            format,
            sequence,
            timestamp: Utc::now(),
            direction: FrameDirection::Outbound,
            response_id: Some(response_id),
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn timestamp(&self) -> &DateTime<Utc> {
        &self.timestamp
    }

    pub fn direction(&self) -> FrameDirection {
        self.direction
    }

    pub fn response_id(&self) -> Option<&ResponseId> {
        self.response_id.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn sample_count(&self) -> usize {
        self.format.samples_in(self.payload.len())
    }

    /// Playback duration derived from payload size
    pub fn duration(&self) -> Duration {
        self.format.duration_of(self.sample_count())
    }

    /// Whether this frame belongs to `response_id`
    pub fn belongs_to(&self, response_id: &ResponseId) -> bool {
        self.response_id.as_ref() == Some(response_id)
    }
}
