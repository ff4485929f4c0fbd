//! In-memory persistence sink

use crate::domain::persistence::{CallRecord, PersistenceSink};
use crate::domain::shared::error::RelayError;
use crate::domain::shared::events::RecordedEvent;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::SessionId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Keeps every appended event and final record in process memory
#[derive(Clone, Default)]
pub struct MemoryPersistenceSink {
    events: Arc<RwLock<HashMap<SessionId, Vec<RecordedEvent>>>>,
    records: Arc<RwLock<HashMap<SessionId, CallRecord>>>,
}

impl MemoryPersistenceSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appended events for a session, in append order
    pub async fn events(&self, session_id: &SessionId) -> Vec<RecordedEvent> {
        self.events
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn record(&self, session_id: &SessionId) -> Option<CallRecord> {
        self.records.read().await.get(session_id).cloned()
    }

    pub async fn records(&self) -> Vec<CallRecord> {
        let mut records: Vec<CallRecord> = self.records.read().await.values().cloned().collect();
        records.sort_by_key(|r| r.started_at);
        records
    }
}

#[async_trait]
impl PersistenceSink for MemoryPersistenceSink {
    async fn append(&self, session_id: &SessionId, event: &RecordedEvent) -> Result<()> {
        let mut events = self.events.write().await;
        events.entry(*session_id).or_default().push(event.clone());
        Ok(())
    }

    async fn finalize(&self, session_id: &SessionId, record: &CallRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(session_id) {
            return Err(RelayError::AlreadyExists(format!(
                "call record for session {}",
                session_id
            )));
        }
        records.insert(*session_id, record.clone());
        debug!(session_id = %session_id, "Call record stored in memory");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::EndReason;
    use crate::domain::shared::value_objects::{CallSid, StreamSid};
    use chrono::Utc;

    fn record(session_id: SessionId) -> CallRecord {
        let now = Utc::now();
        CallRecord {
            call_id: CallSid::new("CA1"),
            stream_sid: StreamSid::new("MZ1"),
            session_id,
            started_at: now,
            ended_at: now,
            end_reason: EndReason::CallerHangup,
            transcript: Vec::new(),
            events: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_events_kept_per_session_in_order() {
        let sink = MemoryPersistenceSink::new();
        let a = SessionId::new();
        let b = SessionId::new();

        sink.append(&a, &RecordedEvent::new("first", serde_json::Value::Null))
            .await
            .unwrap();
        sink.append(&b, &RecordedEvent::new("other", serde_json::Value::Null))
            .await
            .unwrap();
        sink.append(&a, &RecordedEvent::new("second", serde_json::Value::Null))
            .await
            .unwrap();

        let kinds: Vec<String> = sink.events(&a).await.into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec!["first", "second"]);
        assert_eq!(sink.events(&b).await.len(), 1);
    }

    #[tokio::test]
    async fn test_second_finalize_rejected() {
        let sink = MemoryPersistenceSink::new();
        let id = SessionId::new();

        sink.finalize(&id, &record(id)).await.unwrap();
        let err = sink.finalize(&id, &record(id)).await.unwrap_err();
        assert!(matches!(err, RelayError::AlreadyExists(_)));
        assert!(sink.record(&id).await.is_some());
        assert_eq!(sink.records().await.len(), 1);
    }
}
