//! Interruption marker

use crate::domain::shared::value_objects::{ItemId, ResponseId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where to cut an in-flight response
///
/// Created once per interrupted response, consumed once by the realtime
/// adapter. The offset only counts audio already handed to the telephony side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterruptionMarker {
    pub response_id: ResponseId,
    pub item_id: ItemId,
    pub content_index: u32,
    pub audio_end_ms: u32,
    pub forwarded_frames: u32,
    /// Generation was still running; the service must cancel before truncating
    pub cancel_generation: bool,
    pub issued_at: DateTime<Utc>,
}

/// Result of a barge-in: the marker plus what was thrown away locally
#[derive(Debug, Clone, PartialEq)]
pub struct Interruption {
    pub marker: InterruptionMarker,
    pub discarded_frames: usize,
    pub discarded: Duration,
}

/// How a pending truncate ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruncateResolution {
    pub response_id: ResponseId,
    pub timed_out: bool,
    pub waited: Duration,
}
