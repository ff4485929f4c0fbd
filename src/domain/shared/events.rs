//! Recorded session events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Structured event persisted alongside the transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedEvent {
    pub event_id: Uuid,
    /// Dotted event kind, e.g. `truncate.issued`
    pub kind: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

impl RecordedEvent {
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self::at(kind, data, Utc::now())
    }

    pub fn at(kind: impl Into<String>, data: serde_json::Value, occurred_at: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            kind: kind.into(),
            occurred_at,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_recorded_event_wire_shape() {
        let event = RecordedEvent::new("truncate.issued", json!({"audioEndMs": 300}));
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["kind"], "truncate.issued");
        assert_eq!(value["data"]["audioEndMs"], 300);
        assert!(value["occurredAt"].is_string());
    }

    #[test]
    fn test_null_payload_is_omitted() {
        let event = RecordedEvent::new("session.started", serde_json::Value::Null);
        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("data").is_none());
    }
}
