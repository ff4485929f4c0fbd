//! Realtime voice service channel adapter

use super::connector::RealtimeConnector;
use super::message::{ClientEvent, ServerEvent, SessionUpdate};
use crate::config::RealtimeConfig;
use crate::domain::audio::AudioFrame;
use crate::domain::interruption::{InterruptionMarker, ResponseAudio};
use crate::domain::session::{SessionEvent, Speaker};
use crate::domain::shared::error::RelayError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{AiSessionId, ChannelSide};
use crate::infrastructure::protocols::wire::{
    AdapterHandle, WireChannel, WireFrame, WireSink, WireStream,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SIDE: ChannelSide = ChannelSide::Realtime;

/// Result of a successful session setup
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeHandshake {
    pub session_id: Option<AiSessionId>,
    /// The `session.update` payload the service accepted
    pub configuration: serde_json::Value,
}

/// Instructions for the realtime writer task
#[derive(Debug, Clone)]
pub enum RealtimeCommand {
    /// Forward one converted caller frame
    AppendAudio(AudioFrame),
    /// Cut an in-flight response at the marker's offset
    Truncate(InterruptionMarker),
    Close,
}

pub struct RealtimeAdapter;

impl RealtimeAdapter {
    /// Connect, configure the session, and wait for `session.updated`
    pub async fn open(
        connector: &dyn RealtimeConnector,
        config: &RealtimeConfig,
        timeout: Duration,
    ) -> Result<(RealtimeHandshake, WireChannel)> {
        let setup = async {
            let mut channel = connector.connect(config).await?;

            let session = SessionUpdate::from_config(config);
            let configuration = serde_json::to_value(&session).map_err(|e| {
                RelayError::Internal(format!("failed to serialize session update: {}", e))
            })?;
            send_event(&mut channel.outgoing, &ClientEvent::SessionUpdate { session }).await?;

            let session_id = await_session_updated(&mut channel.incoming).await?;
            let handshake = RealtimeHandshake {
                session_id,
                configuration,
            };
            Ok::<_, RelayError>((handshake, channel))
        };

        let (handshake, channel) = tokio::time::timeout(timeout, setup)
            .await
            .map_err(|_| RelayError::HandshakeTimeout { side: SIDE })??;

        info!(
            ai_session_id = ?handshake.session_id.as_ref().map(AiSessionId::as_str),
            format = config.audio_format.as_str(),
            "Realtime session configured"
        );
        Ok((handshake, channel))
    }

    /// Start the reader and writer tasks
    pub fn spawn(
        channel: WireChannel,
        events: mpsc::Sender<SessionEvent>,
        cancel: CancellationToken,
    ) -> AdapterHandle<RealtimeCommand> {
        let (commands_tx, commands_rx) = mpsc::channel(256);

        let reader = tokio::spawn(run_reader(channel.incoming, events, cancel));
        let writer = tokio::spawn(run_writer(channel.outgoing, commands_rx));

        AdapterHandle {
            commands: commands_tx,
            reader,
            writer,
        }
    }
}

async fn send_event(outgoing: &mut WireSink, event: &ClientEvent) -> Result<()> {
    let json = serde_json::to_string(event)
        .map_err(|e| RelayError::Internal(format!("failed to serialize client event: {}", e)))?;
    outgoing.send(WireFrame::Text(json)).await
}

fn parse_event(text: &str) -> Result<ServerEvent> {
    serde_json::from_str(text).map_err(|e| RelayError::protocol(SIDE, format!("malformed event: {}", e)))
}

async fn await_session_updated(incoming: &mut WireStream) -> Result<Option<AiSessionId>> {
    let mut session_id = None;

    loop {
        let text = match incoming.next().await {
            Some(Ok(WireFrame::Text(text))) => text,
            Some(Ok(WireFrame::Binary(_))) => {
                return Err(RelayError::protocol(SIDE, "binary frame during session setup"))
            }
            Some(Ok(WireFrame::Close)) | None => {
                return Err(RelayError::HandshakeFailed {
                    side: SIDE,
                    message: "socket closed during session setup".to_string(),
                })
            }
            Some(Err(e)) => {
                return Err(RelayError::HandshakeFailed {
                    side: SIDE,
                    message: e.to_string(),
                })
            }
        };

        match parse_event(&text)? {
            ServerEvent::SessionCreated { session } => {
                debug!(ai_session_id = %session.id, "Realtime session created");
                session_id = Some(session.id);
            }
            ServerEvent::SessionUpdated { session } => {
                return Ok(session_id.or(Some(session.id)));
            }
            ServerEvent::Error { error } => {
                return Err(RelayError::HandshakeFailed {
                    side: SIDE,
                    message: error.message,
                })
            }
            _ => debug!("Ignoring event during session setup"),
        }
    }
}

async fn run_reader(
    mut incoming: WireStream,
    events: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = incoming.next() => next,
        };

        let event = match next {
            Some(Ok(WireFrame::Text(text))) => match normalize(&text) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Realtime protocol violation: {}", e);
                    let _ = events
                        .send(SessionEvent::ProtocolViolation {
                            side: SIDE,
                            message: e.to_string(),
                        })
                        .await;
                    break;
                }
            },
            Some(Ok(WireFrame::Binary(_))) => {
                let _ = events
                    .send(SessionEvent::ProtocolViolation {
                        side: SIDE,
                        message: "unexpected binary frame".to_string(),
                    })
                    .await;
                break;
            }
            Some(Ok(WireFrame::Close)) | None => {
                warn!("Realtime socket closed");
                let _ = events
                    .send(SessionEvent::Disconnected {
                        side: SIDE,
                        reason: "socket closed".to_string(),
                    })
                    .await;
                break;
            }
            Some(Err(e)) => {
                warn!("Realtime socket error: {}", e);
                let _ = events
                    .send(SessionEvent::Disconnected {
                        side: SIDE,
                        reason: e.to_string(),
                    })
                    .await;
                break;
            }
        };

        if events.send(event).await.is_err() {
            break;
        }
    }
    debug!("Realtime reader finished");
}

/// Translate one server event; `None` for events the session does not need
fn normalize(text: &str) -> Result<Option<SessionEvent>> {
    let event = match parse_event(text)? {
        ServerEvent::ResponseAudioDelta {
            response_id,
            item_id,
            content_index,
            delta,
        } => {
            let payload = BASE64
                .decode(delta.as_bytes())
                .map_err(|e| RelayError::protocol(SIDE, format!("bad audio delta: {}", e)))?;
            SessionEvent::AudioDelta {
                audio: ResponseAudio::new(response_id, item_id, content_index),
                payload: Bytes::from(payload),
            }
        }
        ServerEvent::ResponseAudioTranscriptDelta {
            response_id,
            item_id,
            delta,
        } => SessionEvent::TranscriptDelta {
            speaker: Speaker::Assistant,
            text: delta,
            is_final: false,
            response_id: Some(response_id),
            item_id: Some(item_id),
        },
        ServerEvent::ResponseAudioTranscriptDone {
            response_id,
            item_id,
            transcript,
        } => SessionEvent::TranscriptDelta {
            speaker: Speaker::Assistant,
            text: transcript,
            is_final: true,
            response_id: Some(response_id),
            item_id: Some(item_id),
        },
        ServerEvent::InputAudioTranscriptionDelta { item_id, delta } => {
            SessionEvent::TranscriptDelta {
                speaker: Speaker::Caller,
                text: delta,
                is_final: false,
                response_id: None,
                item_id: Some(item_id),
            }
        }
        ServerEvent::InputAudioTranscriptionCompleted {
            item_id,
            transcript,
        } => SessionEvent::TranscriptDelta {
            speaker: Speaker::Caller,
            text: transcript,
            is_final: true,
            response_id: None,
            item_id: Some(item_id),
        },
        ServerEvent::SpeechStarted { .. } => SessionEvent::SpeechStarted { source: SIDE },
        ServerEvent::SpeechStopped { .. } => SessionEvent::SpeechStopped { source: SIDE },
        ServerEvent::ResponseDone { response } => SessionEvent::ResponseDone {
            response_id: response.id,
            status: response.status,
            output: response.output,
            usage: response.usage,
        },
        ServerEvent::FunctionCallArgumentsDone {
            call_id,
            name,
            arguments,
        } => SessionEvent::FunctionCall {
            call_id,
            name,
            arguments,
        },
        ServerEvent::ConversationItemTruncated {
            item_id,
            audio_end_ms,
            ..
        } => SessionEvent::TruncateAcknowledged {
            item_id,
            audio_end_ms,
        },
        ServerEvent::Error { error } => SessionEvent::ServiceError {
            code: error.code.or(error.kind),
            message: error.message,
        },
        ServerEvent::SessionCreated { .. } | ServerEvent::SessionUpdated { .. } => {
            debug!("Realtime session event after setup");
            return Ok(None);
        }
        ServerEvent::Other => {
            debug!("Ignoring realtime event");
            return Ok(None);
        }
    };
    Ok(Some(event))
}

async fn run_writer(mut outgoing: WireSink, mut commands: mpsc::Receiver<RealtimeCommand>) {
    while let Some(command) = commands.recv().await {
        let sent = match command {
            RealtimeCommand::AppendAudio(frame) => {
                let event = ClientEvent::InputAudioBufferAppend {
                    audio: BASE64.encode(frame.payload()),
                };
                send_event(&mut outgoing, &event).await
            }
            RealtimeCommand::Truncate(marker) => send_truncate(&mut outgoing, &marker).await,
            RealtimeCommand::Close => {
                if let Err(e) = outgoing.send(WireFrame::Close).await {
                    debug!("Realtime close not delivered: {}", e);
                }
                break;
            }
        };

        if let Err(e) = sent {
            warn!("Realtime send failed: {}", e);
            break;
        }
    }

    let _ = outgoing.close().await;
    debug!("Realtime writer finished");
}

async fn send_truncate(outgoing: &mut WireSink, marker: &InterruptionMarker) -> Result<()> {
    if marker.cancel_generation {
        send_event(outgoing, &ClientEvent::ResponseCancel).await?;
    }
    info!(
        response_id = %marker.response_id,
        item_id = %marker.item_id,
        audio_end_ms = marker.audio_end_ms,
        cancel = marker.cancel_generation,
        "Truncating interrupted response"
    );
    send_event(
        outgoing,
        &ClientEvent::ConversationItemTruncate {
            item_id: marker.item_id.clone(),
            content_index: marker.content_index,
            audio_end_ms: marker.audio_end_ms,
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shared::value_objects::{ItemId, ResponseId};
    use crate::infrastructure::protocols::realtime::connector::InMemoryConnector;
    use crate::infrastructure::protocols::wire::WirePeer;
    use chrono::Utc;
    use serde_json::json;

    async fn opened() -> (WireChannel, WirePeer) {
        let (channel, mut peer) = WireChannel::pair(ChannelSide::Realtime, 64);
        let connector = InMemoryConnector::new();
        connector.push(channel);

        let service = tokio::spawn(async move {
            let update = peer.recv_json().await.unwrap();
            assert_eq!(update["type"], "session.update");
            peer.send_json(&json!({"type": "session.created", "session": {"id": "sess_1"}}))
                .await;
            peer.send_json(&json!({"type": "session.updated", "session": {"id": "sess_1"}}))
                .await;
            peer
        });

        let (handshake, channel) =
            RealtimeAdapter::open(&connector, &RealtimeConfig::default(), Duration::from_secs(1))
                .await
                .unwrap();
        assert_eq!(handshake.session_id, Some(AiSessionId::new("sess_1")));
        assert_eq!(handshake.configuration["input_audio_format"], "g711_ulaw");
        assert!(handshake.configuration.get("api_key").is_none());
        (channel, service.await.unwrap())
    }

    fn marker(cancel_generation: bool) -> InterruptionMarker {
        InterruptionMarker {
            response_id: ResponseId::new("resp_1"),
            item_id: ItemId::new("item_1"),
            content_index: 0,
            audio_end_ms: 300,
            forwarded_frames: 15,
            cancel_generation,
            issued_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_open_waits_for_session_updated() {
        let (_channel, _peer) = opened().await;
    }

    #[tokio::test]
    async fn test_open_fails_on_error_event() {
        let (channel, mut peer) = WireChannel::pair(ChannelSide::Realtime, 8);
        let connector = InMemoryConnector::new();
        connector.push(channel);
        peer.send_json(&json!({"type": "error", "error": {"type": "invalid_request_error", "message": "bad voice"}}))
            .await;

        let err = RealtimeAdapter::open(&connector, &RealtimeConfig::default(), Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RelayError::HandshakeFailed { side: ChannelSide::Realtime, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_times_out() {
        let (channel, _peer) = WireChannel::pair(ChannelSide::Realtime, 8);
        let connector = InMemoryConnector::new();
        connector.push(channel);

        let err = RealtimeAdapter::open(&connector, &RealtimeConfig::default(), Duration::from_secs(10))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RelayError::HandshakeTimeout { side: ChannelSide::Realtime }));
    }

    #[tokio::test]
    async fn test_reader_normalizes_events() {
        let (channel, mut peer) = opened().await;
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let _handle = RealtimeAdapter::spawn(channel, events_tx, CancellationToken::new());

        peer.send_json(&json!({"type": "rate_limits.updated", "rate_limits": []})).await;
        peer.send_json(&json!({
            "type": "response.audio.delta", "response_id": "resp_1", "item_id": "item_1",
            "output_index": 0, "content_index": 0, "delta": BASE64.encode([0xFFu8; 160])
        }))
        .await;
        peer.send_json(&json!({"type": "input_audio_buffer.speech_started", "audio_start_ms": 1200, "item_id": "item_2"}))
            .await;
        peer.send_json(&json!({"type": "conversation.item.truncated", "item_id": "item_1", "content_index": 0, "audio_end_ms": 300}))
            .await;
        peer.send_json(&json!({"type": "conversation.item.input_audio_transcription.completed", "item_id": "item_2", "content_index": 0, "transcript": "hello there"}))
            .await;

        match events_rx.recv().await.unwrap() {
            SessionEvent::AudioDelta { audio, payload } => {
                assert_eq!(audio.response_id, ResponseId::new("resp_1"));
                assert_eq!(payload.len(), 160);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            events_rx.recv().await.unwrap(),
            SessionEvent::SpeechStarted { source: ChannelSide::Realtime }
        ));
        assert!(matches!(
            events_rx.recv().await.unwrap(),
            SessionEvent::TruncateAcknowledged { audio_end_ms: 300, .. }
        ));
        match events_rx.recv().await.unwrap() {
            SessionEvent::TranscriptDelta {
                speaker, is_final, text, ..
            } => {
                assert_eq!(speaker, Speaker::Caller);
                assert!(is_final);
                assert_eq!(text, "hello there");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reader_reports_missing_fields() {
        let (channel, mut peer) = opened().await;
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let _handle = RealtimeAdapter::spawn(channel, events_tx, CancellationToken::new());

        peer.send_json(&json!({"type": "response.done"})).await;
        assert!(matches!(
            events_rx.recv().await.unwrap(),
            SessionEvent::ProtocolViolation { side: ChannelSide::Realtime, .. }
        ));
    }

    #[tokio::test]
    async fn test_truncate_sends_cancel_then_truncate() {
        let (channel, mut peer) = opened().await;
        let (events_tx, _events_rx) = mpsc::channel(16);
        let handle = RealtimeAdapter::spawn(channel, events_tx, CancellationToken::new());

        handle
            .commands
            .send(RealtimeCommand::Truncate(marker(true)))
            .await
            .unwrap();
        assert_eq!(peer.recv_json().await.unwrap()["type"], "response.cancel");
        let truncate = peer.recv_json().await.unwrap();
        assert_eq!(truncate["type"], "conversation.item.truncate");
        assert_eq!(truncate["item_id"], "item_1");
        assert_eq!(truncate["audio_end_ms"], 300);

        handle
            .commands
            .send(RealtimeCommand::Truncate(marker(false)))
            .await
            .unwrap();
        assert_eq!(
            peer.recv_json().await.unwrap()["type"],
            "conversation.item.truncate"
        );
    }

    #[tokio::test]
    async fn test_append_audio() {
        let (channel, mut peer) = opened().await;
        let (events_tx, _events_rx) = mpsc::channel(16);
        let handle = RealtimeAdapter::spawn(channel, events_tx, CancellationToken::new());

        let frame = AudioFrame::inbound(
            Bytes::from_static(&[0xFF, 0xFF, 0xFF]),
            crate::domain::audio::AudioFormat::MULAW_8K,
            1,
        );
        handle.commands.send(RealtimeCommand::AppendAudio(frame)).await.unwrap();
        let append = peer.recv_json().await.unwrap();
        assert_eq!(append["type"], "input_audio_buffer.append");
        assert_eq!(append["audio"], "////");

        handle.commands.send(RealtimeCommand::Close).await.unwrap();
        assert_eq!(peer.recv().await, Some(WireFrame::Close));
    }
}
