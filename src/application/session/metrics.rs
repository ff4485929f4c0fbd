//! Session metrics

use crate::domain::session::EndReason;
use metrics::{counter, gauge};

pub const SESSIONS_STARTED: &str = "callrelay_sessions_started_total";
pub const SESSIONS_ENDED: &str = "callrelay_sessions_ended_total";
pub const ACTIVE_SESSIONS: &str = "callrelay_active_sessions";
pub const SESSION_EVENTS: &str = "callrelay_session_events_total";
pub const FRAMES: &str = "callrelay_frames_total";
pub const LATE_FRAMES_DROPPED: &str = "callrelay_late_frames_dropped_total";
pub const TRUNCATIONS: &str = "callrelay_truncations_total";
pub const TRUNCATE_TIMEOUTS: &str = "callrelay_truncate_timeouts_total";

pub fn record_session_started() {
    counter!(SESSIONS_STARTED).increment(1);
    gauge!(ACTIVE_SESSIONS).increment(1.0);
}

pub fn record_session_ended(reason: EndReason) {
    counter!(SESSIONS_ENDED, "reason" => reason.as_str()).increment(1);
    gauge!(ACTIVE_SESSIONS).decrement(1.0);
}

pub fn record_session_event(kind: &'static str) {
    counter!(SESSION_EVENTS, "kind" => kind).increment(1);
}

pub fn record_inbound_frame() {
    counter!(FRAMES, "direction" => "inbound").increment(1);
}

pub fn record_outbound_frame() {
    counter!(FRAMES, "direction" => "outbound").increment(1);
}

pub fn record_late_frames_dropped(frames: usize) {
    counter!(LATE_FRAMES_DROPPED).increment(frames as u64);
}

pub fn record_truncation() {
    counter!(TRUNCATIONS).increment(1);
}

pub fn record_truncate_timeout() {
    counter!(TRUNCATE_TIMEOUTS).increment(1);
}
