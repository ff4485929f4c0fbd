//! Persistence contract for call transcripts and events
//!
//! The store itself lives outside the relay. Sessions only ever talk to it
//! through the [`PersistenceSink`] port: incremental `append` while the call
//! runs and a single `finalize` once it has closed.

use crate::domain::session::{EndReason, Speaker, TranscriptEvent};
use crate::domain::shared::events::RecordedEvent;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{CallSid, SessionId, StreamSid};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transcript line as stored in the final record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    pub ts: DateTime<Utc>,
}

impl From<&TranscriptEvent> for TranscriptEntry {
    fn from(event: &TranscriptEvent) -> Self {
        Self {
            speaker: event.speaker,
            text: event.text.clone(),
            ts: event.timestamp,
        }
    }
}

/// Final record of one call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub call_id: CallSid,
    pub stream_sid: StreamSid,
    pub session_id: SessionId,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub end_reason: EndReason,
    pub transcript: Vec<TranscriptEntry>,
    pub events: Vec<RecordedEvent>,
}

impl CallRecord {
    /// Number of turns spoken by `speaker`
    pub fn turns_by(&self, speaker: Speaker) -> usize {
        self.transcript.iter().filter(|t| t.speaker == speaker).count()
    }
}

/// Durable store for call records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Append one event to the session's incremental log
    async fn append(&self, session_id: &SessionId, event: &RecordedEvent) -> Result<()>;

    /// Store the final record. Called exactly once per session.
    async fn finalize(&self, session_id: &SessionId, record: &CallRecord) -> Result<()>;
}
