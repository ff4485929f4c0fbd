//! Realtime voice service wire events

use crate::config::RealtimeConfig;
use crate::domain::audio::RealtimeAudioFormat;
use crate::domain::shared::value_objects::{AiSessionId, ItemId, ResponseId};
use serde::{Deserialize, Serialize};

/// Events we send to the service
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionUpdate },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
    #[serde(rename = "response.cancel")]
    ResponseCancel,
    #[serde(rename = "conversation.item.truncate")]
    ConversationItemTruncate {
        item_id: ItemId,
        content_index: u32,
        audio_end_ms: u32,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionUpdate {
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: RealtimeAudioFormat,
    pub output_audio_format: RealtimeAudioFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,
    pub turn_detection: TurnDetection,
    pub temperature: f32,
    pub modalities: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InputAudioTranscription {
    pub model: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix_padding_ms: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub silence_duration_ms: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eagerness: Option<String>,
    pub create_response: bool,
    pub interrupt_response: bool,
}

impl SessionUpdate {
    pub fn from_config(config: &RealtimeConfig) -> Self {
        let td = &config.turn_detection;
        // Threshold and padding only apply to server VAD
        let server_vad = td.mode == "server_vad";

        Self {
            instructions: config.instructions.clone(),
            voice: config.voice.clone(),
            input_audio_format: config.audio_format,
            output_audio_format: config.audio_format,
            input_audio_transcription: (!config.transcription_model.is_empty()).then(|| {
                InputAudioTranscription {
                    model: config.transcription_model.clone(),
                }
            }),
            turn_detection: TurnDetection {
                kind: td.mode.clone(),
                threshold: server_vad.then_some(td.threshold),
                prefix_padding_ms: server_vad.then_some(td.prefix_padding_ms),
                silence_duration_ms: server_vad.then_some(td.silence_duration_ms),
                eagerness: if server_vad { None } else { td.eagerness.clone() },
                create_response: td.create_response,
                interrupt_response: td.interrupt_response,
            },
            temperature: config.temperature,
            modalities: vec!["text".to_string(), "audio".to_string()],
        }
    }
}

/// Events the service sends us. Types the relay does not use land in
/// [`ServerEvent::Other`].
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated { session: SessionInfo },
    #[serde(rename = "session.updated")]
    SessionUpdated { session: SessionInfo },
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta {
        response_id: ResponseId,
        item_id: ItemId,
        #[serde(default)]
        content_index: u32,
        delta: String,
    },
    #[serde(rename = "response.audio_transcript.delta")]
    ResponseAudioTranscriptDelta {
        response_id: ResponseId,
        item_id: ItemId,
        delta: String,
    },
    #[serde(rename = "response.audio_transcript.done")]
    ResponseAudioTranscriptDone {
        response_id: ResponseId,
        item_id: ItemId,
        transcript: String,
    },
    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    InputAudioTranscriptionDelta { item_id: ItemId, delta: String },
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputAudioTranscriptionCompleted { item_id: ItemId, transcript: String },
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        audio_start_ms: u32,
        #[serde(default)]
        item_id: Option<ItemId>,
    },
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        #[serde(default)]
        audio_end_ms: u32,
        #[serde(default)]
        item_id: Option<ItemId>,
    },
    #[serde(rename = "response.done")]
    ResponseDone { response: ResponseInfo },
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        call_id: String,
        #[serde(default)]
        name: Option<String>,
        arguments: String,
    },
    #[serde(rename = "conversation.item.truncated")]
    ConversationItemTruncated {
        item_id: ItemId,
        #[serde(default)]
        content_index: u32,
        audio_end_ms: u32,
    },
    #[serde(rename = "error")]
    Error { error: ErrorDetail },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    pub id: AiSessionId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseInfo {
    pub id: ResponseId,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub usage: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_session_update_shape() {
        let update = ClientEvent::SessionUpdate {
            session: SessionUpdate::from_config(&RealtimeConfig::default()),
        };
        let value = serde_json::to_value(&update).unwrap();

        assert_eq!(value["type"], "session.update");
        assert_eq!(value["session"]["input_audio_format"], "g711_ulaw");
        assert_eq!(value["session"]["output_audio_format"], "g711_ulaw");
        assert_eq!(value["session"]["voice"], "alloy");
        assert_eq!(value["session"]["turn_detection"]["type"], "server_vad");
        assert_eq!(value["session"]["turn_detection"]["silence_duration_ms"], 500);
        assert!(value["session"]["turn_detection"].get("eagerness").is_none());
        assert_eq!(value["session"]["input_audio_transcription"]["model"], "whisper-1");
    }

    #[test]
    fn test_semantic_vad_omits_server_vad_fields() {
        let mut config = RealtimeConfig::default();
        config.turn_detection.mode = "semantic_vad".to_string();
        config.turn_detection.eagerness = Some("high".to_string());
        config.transcription_model.clear();

        let value = serde_json::to_value(SessionUpdate::from_config(&config)).unwrap();
        assert!(value["turn_detection"].get("threshold").is_none());
        assert_eq!(value["turn_detection"]["eagerness"], "high");
        assert!(value.get("input_audio_transcription").is_none());
    }

    #[test]
    fn test_control_events() {
        assert_eq!(
            serde_json::to_value(&ClientEvent::ResponseCancel).unwrap(),
            json!({"type": "response.cancel"})
        );
        let truncate = ClientEvent::ConversationItemTruncate {
            item_id: ItemId::new("item_1"),
            content_index: 0,
            audio_end_ms: 300,
        };
        assert_eq!(
            serde_json::to_value(&truncate).unwrap(),
            json!({"type": "conversation.item.truncate", "item_id": "item_1", "content_index": 0, "audio_end_ms": 300})
        );
    }

    #[test]
    fn test_parse_server_events() {
        let delta: ServerEvent = serde_json::from_value(json!({
            "type": "response.audio.delta",
            "event_id": "ev_1",
            "response_id": "resp_1",
            "item_id": "item_1",
            "output_index": 0,
            "content_index": 0,
            "delta": "AAAA"
        }))
        .unwrap();
        assert!(matches!(delta, ServerEvent::ResponseAudioDelta { .. }));

        let done: ServerEvent = serde_json::from_value(json!({
            "type": "response.done",
            "response": {
                "id": "resp_1", "status": "completed", "output": [],
                "usage": {"total_tokens": 42, "output_tokens": 30}
            }
        }))
        .unwrap();
        let ServerEvent::ResponseDone { response } = done else {
            panic!("expected response.done");
        };
        assert_eq!(response.status.as_deref(), Some("completed"));
        assert_eq!(response.output, Some(json!([])));
        assert_eq!(response.usage.unwrap()["total_tokens"], 42);

        let other: ServerEvent =
            serde_json::from_value(json!({"type": "rate_limits.updated", "rate_limits": []})).unwrap();
        assert!(matches!(other, ServerEvent::Other));
    }

    #[test]
    fn test_known_event_missing_fields_fails() {
        let result = serde_json::from_value::<ServerEvent>(json!({
            "type": "response.audio.delta",
            "response_id": "resp_1"
        }));
        assert!(result.is_err());
    }
}
