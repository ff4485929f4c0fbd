//! Transcript turns

use super::value_object::Speaker;
use crate::domain::shared::value_objects::ResponseId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One transcript turn, partial or final
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEvent {
    pub speaker: Speaker,
    pub text: String,
    pub is_final: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<ResponseId>,
    /// Assistant turn whose audio was cut off by the caller
    #[serde(default)]
    pub interrupted: bool,
}

impl TranscriptEvent {
    pub fn caller(text: impl Into<String>, is_final: bool) -> Self {
        Self {
            speaker: Speaker::Caller,
            text: text.into(),
            is_final,
            timestamp: Utc::now(),
            response_id: None,
            interrupted: false,
        }
    }

    pub fn assistant(text: impl Into<String>, is_final: bool, response_id: Option<ResponseId>) -> Self {
        Self {
            speaker: Speaker::Assistant,
            text: text.into(),
            is_final,
            timestamp: Utc::now(),
            response_id,
            interrupted: false,
        }
    }
}
