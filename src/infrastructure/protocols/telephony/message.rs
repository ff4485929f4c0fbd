//! Telephony media-stream wire messages

use crate::domain::shared::value_objects::{CallSid, StreamSid};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Messages the telephony provider sends us
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundMessage {
    Connected(ConnectedMessage),
    Start(StartMessage),
    Media(MediaMessage),
    Mark(MarkMessage),
    Dtmf(DtmfMessage),
    Stop(StopMessage),
}

impl InboundMessage {
    pub fn name(&self) -> &'static str {
        match self {
            InboundMessage::Connected(_) => "connected",
            InboundMessage::Start(_) => "start",
            InboundMessage::Media(_) => "media",
            InboundMessage::Mark(_) => "mark",
            InboundMessage::Dtmf(_) => "dtmf",
            InboundMessage::Stop(_) => "stop",
        }
    }

    /// Stream the message claims to belong to, if it says
    pub fn stream_sid(&self) -> Option<&StreamSid> {
        match self {
            InboundMessage::Connected(_) => None,
            InboundMessage::Start(m) => Some(&m.stream_sid),
            InboundMessage::Media(m) => m.stream_sid.as_ref(),
            InboundMessage::Mark(m) => m.stream_sid.as_ref(),
            InboundMessage::Dtmf(m) => m.stream_sid.as_ref(),
            InboundMessage::Stop(m) => m.stream_sid.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectedMessage {
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMessage {
    #[serde(default)]
    pub sequence_number: Option<String>,
    pub stream_sid: StreamSid,
    pub start: StartMetadata,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMetadata {
    #[serde(default)]
    pub account_sid: Option<String>,
    pub call_sid: CallSid,
    #[serde(default)]
    pub tracks: Vec<String>,
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
    pub media_format: MediaFormat,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMessage {
    #[serde(default)]
    pub sequence_number: Option<String>,
    #[serde(default)]
    pub stream_sid: Option<StreamSid>,
    pub media: MediaPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaPayload {
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub chunk: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Base64 audio in the negotiated format
    pub payload: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkMessage {
    #[serde(default)]
    pub stream_sid: Option<StreamSid>,
    pub mark: MarkPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DtmfMessage {
    #[serde(default)]
    pub stream_sid: Option<StreamSid>,
    pub dtmf: DtmfPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DtmfPayload {
    #[serde(default)]
    pub track: Option<String>,
    pub digit: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopMessage {
    #[serde(default)]
    pub stream_sid: Option<StreamSid>,
    #[serde(default)]
    pub stop: Option<StopPayload>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopPayload {
    #[serde(default)]
    pub account_sid: Option<String>,
    #[serde(default)]
    pub call_sid: Option<CallSid>,
}

/// Messages we send to the telephony provider
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundMessage {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: StreamSid,
        media: OutboundMedia,
    },
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: StreamSid,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: StreamSid,
        mark: MarkPayload,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundMedia {
    pub payload: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_start() {
        let raw = json!({
            "event": "start",
            "sequenceNumber": "1",
            "streamSid": "MZ1",
            "start": {
                "accountSid": "AC1",
                "streamSid": "MZ1",
                "callSid": "CA1",
                "tracks": ["inbound"],
                "customParameters": {"caller": "+15550100"},
                "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1}
            }
        });

        let msg: InboundMessage = serde_json::from_value(raw).unwrap();
        let InboundMessage::Start(start) = msg else {
            panic!("expected start");
        };
        assert_eq!(start.stream_sid.as_str(), "MZ1");
        assert_eq!(start.start.call_sid.as_str(), "CA1");
        assert_eq!(start.start.media_format.sample_rate, 8000);
        assert_eq!(start.start.custom_parameters["caller"], "+15550100");
    }

    #[test]
    fn test_parse_media_and_stop() {
        let media: InboundMessage = serde_json::from_str(
            r#"{"event":"media","sequenceNumber":"3","streamSid":"MZ1","media":{"track":"inbound","chunk":"2","timestamp":"40","payload":"//8="}}"#,
        )
        .unwrap();
        assert_eq!(media.name(), "media");
        assert_eq!(media.stream_sid().unwrap().as_str(), "MZ1");

        let stop: InboundMessage =
            serde_json::from_str(r#"{"event":"stop","streamSid":"MZ1","stop":{"accountSid":"AC1","callSid":"CA1"}}"#)
                .unwrap();
        assert_eq!(stop.name(), "stop");
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        assert!(serde_json::from_str::<InboundMessage>(r#"{"event":"dance"}"#).is_err());
        assert!(serde_json::from_str::<InboundMessage>(r#"{"event":"media","streamSid":"MZ1"}"#).is_err());
    }

    #[test]
    fn test_outbound_shapes() {
        let media = OutboundMessage::Media {
            stream_sid: StreamSid::new("MZ1"),
            media: OutboundMedia {
                payload: "AAAA".to_string(),
            },
        };
        assert_eq!(
            serde_json::to_value(&media).unwrap(),
            json!({"event": "media", "streamSid": "MZ1", "media": {"payload": "AAAA"}})
        );

        let clear = OutboundMessage::Clear {
            stream_sid: StreamSid::new("MZ1"),
        };
        assert_eq!(
            serde_json::to_value(&clear).unwrap(),
            json!({"event": "clear", "streamSid": "MZ1"})
        );
    }
}
