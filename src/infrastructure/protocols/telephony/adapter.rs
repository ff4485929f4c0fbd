//! Telephony media channel adapter
//!
//! Runs the `connected`/`start` handshake, then splits into a reader task that
//! turns provider messages into [`SessionEvent`]s and a writer task that
//! drains [`TelephonyCommand`]s onto the socket.

use super::message::{InboundMessage, MarkPayload, OutboundMedia, OutboundMessage};
use super::speech::{SpeechDetector, SpeechTransition};
use crate::config::SpeechDetectionConfig;
use crate::domain::audio::{AudioFormat, AudioFrame};
use crate::domain::session::SessionEvent;
use crate::domain::shared::error::RelayError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{CallSid, ChannelSide, StreamSid};
use crate::infrastructure::media::G711Law;
use crate::infrastructure::protocols::wire::{
    AdapterHandle, WireChannel, WireFrame, WireSink, WireStream,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SIDE: ChannelSide = ChannelSide::Telephony;

/// What the `start` message told us about the call
#[derive(Debug, Clone, PartialEq)]
pub struct TelephonyHandshake {
    pub stream_sid: StreamSid,
    pub call_sid: CallSid,
    pub account_sid: Option<String>,
    pub format: AudioFormat,
    pub custom_parameters: HashMap<String, String>,
}

/// Instructions for the telephony writer task
#[derive(Debug, Clone)]
pub enum TelephonyCommand {
    /// Play one outbound frame
    Media(AudioFrame),
    /// Drop audio buffered on the provider side
    Clear,
    Mark(String),
    Close,
}

pub struct TelephonyAdapter;

impl TelephonyAdapter {
    /// Read until `start`, within `timeout`.
    ///
    /// A leading `connected` is accepted; anything else first is a protocol
    /// error, as is an audio format the relay cannot carry.
    pub async fn handshake(
        mut channel: WireChannel,
        timeout: Duration,
    ) -> Result<(TelephonyHandshake, WireChannel)> {
        let handshake = tokio::time::timeout(timeout, read_start(&mut channel.incoming))
            .await
            .map_err(|_| RelayError::HandshakeTimeout { side: SIDE })??;

        info!(
            stream_sid = %handshake.stream_sid,
            call_sid = %handshake.call_sid,
            format = %handshake.format,
            "Telephony stream started"
        );
        Ok((handshake, channel))
    }

    /// Start the reader and writer tasks
    pub fn spawn(
        channel: WireChannel,
        handshake: &TelephonyHandshake,
        events: mpsc::Sender<SessionEvent>,
        cancel: CancellationToken,
        speech: &SpeechDetectionConfig,
    ) -> AdapterHandle<TelephonyCommand> {
        let (commands_tx, commands_rx) = mpsc::channel(256);

        let detector = speech.enabled.then(|| SpeechDetector::new(speech));
        let reader = TelephonyReader {
            stream_sid: handshake.stream_sid.clone(),
            format: handshake.format,
            law: G711Law::for_encoding(handshake.format.encoding),
            events,
            detector,
            sequence: 0,
        };

        let reader = tokio::spawn(reader.run(channel.incoming, cancel));
        let writer = tokio::spawn(run_writer(
            channel.outgoing,
            handshake.stream_sid.clone(),
            commands_rx,
        ));

        AdapterHandle {
            commands: commands_tx,
            reader,
            writer,
        }
    }
}

async fn read_start(incoming: &mut WireStream) -> Result<TelephonyHandshake> {
    let mut seen_connected = false;

    loop {
        let text = match incoming.next().await {
            Some(Ok(WireFrame::Text(text))) => text,
            Some(Ok(WireFrame::Binary(_))) => {
                return Err(RelayError::protocol(SIDE, "binary frame during handshake"))
            }
            Some(Ok(WireFrame::Close)) | None => {
                return Err(RelayError::HandshakeFailed {
                    side: SIDE,
                    message: "socket closed before start".to_string(),
                })
            }
            Some(Err(e)) => {
                return Err(RelayError::HandshakeFailed {
                    side: SIDE,
                    message: e.to_string(),
                })
            }
        };

        let message: InboundMessage = serde_json::from_str(&text)
            .map_err(|e| RelayError::protocol(SIDE, format!("malformed message: {}", e)))?;

        match message {
            InboundMessage::Connected(connected) if !seen_connected => {
                debug!(protocol = ?connected.protocol, version = ?connected.version, "Telephony connected");
                seen_connected = true;
            }
            InboundMessage::Start(start) => {
                let media_format = &start.start.media_format;
                let format = AudioFormat::from_telephony(
                    &media_format.encoding,
                    media_format.sample_rate,
                    media_format.channels,
                )
                .ok_or_else(|| {
                    RelayError::protocol(
                        SIDE,
                        format!(
                            "unsupported media format {} @ {} Hz x{}",
                            media_format.encoding, media_format.sample_rate, media_format.channels
                        ),
                    )
                })?;

                return Ok(TelephonyHandshake {
                    stream_sid: start.stream_sid,
                    call_sid: start.start.call_sid,
                    account_sid: start.start.account_sid,
                    format,
                    custom_parameters: start.start.custom_parameters,
                });
            }
            other => {
                return Err(RelayError::protocol(
                    SIDE,
                    format!("expected start, got {}", other.name()),
                ))
            }
        }
    }
}

struct TelephonyReader {
    stream_sid: StreamSid,
    format: AudioFormat,
    law: Option<G711Law>,
    events: mpsc::Sender<SessionEvent>,
    detector: Option<SpeechDetector>,
    sequence: u64,
}

/// Whether the reader keeps going after a message
enum Flow {
    Continue,
    Stop,
}

impl TelephonyReader {
    async fn run(mut self, mut incoming: WireStream, cancel: CancellationToken) {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = incoming.next() => next,
            };

            let flow = match next {
                Some(Ok(WireFrame::Text(text))) => self.on_text(&text).await,
                Some(Ok(WireFrame::Binary(_))) => {
                    self.violation("binary frames are not part of the media protocol").await
                }
                Some(Ok(WireFrame::Close)) => self.disconnected("closed without stop").await,
                Some(Err(e)) => self.disconnected(&e.to_string()).await,
                None => self.disconnected("socket ended").await,
            };

            if matches!(flow, Flow::Stop) {
                break;
            }
        }
        debug!(stream_sid = %self.stream_sid, "Telephony reader finished");
    }

    async fn on_text(&mut self, text: &str) -> Flow {
        let message: InboundMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => return self.violation(&format!("malformed message: {}", e)).await,
        };

        if let Some(sid) = message.stream_sid() {
            if sid != &self.stream_sid {
                return self
                    .violation(&format!("message for foreign stream {}", sid))
                    .await;
            }
        }

        match message {
            InboundMessage::Media(media) => {
                let payload = match BASE64.decode(media.media.payload.as_bytes()) {
                    Ok(payload) => payload,
                    Err(e) => return self.violation(&format!("bad media payload: {}", e)).await,
                };
                if payload.is_empty() {
                    debug!(stream_sid = %self.stream_sid, "Ignoring zero-length media");
                    return Flow::Continue;
                }

                self.sequence += 1;
                let frame = AudioFrame::inbound(Bytes::from(payload), self.format, self.sequence);
                if let Some(transition) = self.detect_speech(&frame) {
                    let event = match transition {
                        SpeechTransition::Started => SessionEvent::SpeechStarted { source: SIDE },
                        SpeechTransition::Stopped => SessionEvent::SpeechStopped { source: SIDE },
                    };
                    if !self.emit(event).await {
                        return Flow::Stop;
                    }
                }
                self.emit_or_stop(SessionEvent::CallerAudio(frame)).await
            }
            InboundMessage::Mark(mark) => {
                debug!(stream_sid = %self.stream_sid, mark = %mark.mark.name, "Mark played");
                self.emit_or_stop(SessionEvent::Mark {
                    name: mark.mark.name,
                })
                .await
            }
            InboundMessage::Dtmf(dtmf) => {
                self.emit_or_stop(SessionEvent::Dtmf {
                    digit: dtmf.dtmf.digit,
                })
                .await
            }
            InboundMessage::Stop(_) => {
                info!(stream_sid = %self.stream_sid, "Telephony stream stopped by caller");
                self.emit(SessionEvent::CallerHangup).await;
                Flow::Stop
            }
            InboundMessage::Connected(_) => {
                debug!(stream_sid = %self.stream_sid, "Ignoring repeated connected");
                Flow::Continue
            }
            InboundMessage::Start(_) => self.violation("second start on one stream").await,
        }
    }

    fn detect_speech(&mut self, frame: &AudioFrame) -> Option<SpeechTransition> {
        let detector = self.detector.as_mut()?;
        let law = self.law?;
        let samples = law.decode(frame.payload());
        detector.process(&samples, frame.duration())
    }

    async fn emit(&self, event: SessionEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    async fn emit_or_stop(&self, event: SessionEvent) -> Flow {
        if self.emit(event).await {
            Flow::Continue
        } else {
            Flow::Stop
        }
    }

    async fn violation(&self, message: &str) -> Flow {
        warn!(stream_sid = %self.stream_sid, "Telephony protocol violation: {}", message);
        self.emit(SessionEvent::ProtocolViolation {
            side: SIDE,
            message: message.to_string(),
        })
        .await;
        Flow::Stop
    }

    async fn disconnected(&self, reason: &str) -> Flow {
        warn!(stream_sid = %self.stream_sid, "Telephony socket ended: {}", reason);
        self.emit(SessionEvent::Disconnected {
            side: SIDE,
            reason: reason.to_string(),
        })
        .await;
        Flow::Stop
    }
}

async fn run_writer(
    mut outgoing: WireSink,
    stream_sid: StreamSid,
    mut commands: mpsc::Receiver<TelephonyCommand>,
) {
    while let Some(command) = commands.recv().await {
        let message = match command {
            TelephonyCommand::Media(frame) => OutboundMessage::Media {
                stream_sid: stream_sid.clone(),
                media: OutboundMedia {
                    payload: BASE64.encode(frame.payload()),
                },
            },
            TelephonyCommand::Clear => OutboundMessage::Clear {
                stream_sid: stream_sid.clone(),
            },
            TelephonyCommand::Mark(name) => OutboundMessage::Mark {
                stream_sid: stream_sid.clone(),
                mark: MarkPayload { name },
            },
            TelephonyCommand::Close => {
                if let Err(e) = outgoing.send(WireFrame::Close).await {
                    debug!(stream_sid = %stream_sid, "Telephony close not delivered: {}", e);
                }
                break;
            }
        };

        let json = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(e) => {
                warn!(stream_sid = %stream_sid, "Failed to serialize telephony message: {}", e);
                continue;
            }
        };
        if let Err(e) = outgoing.send(WireFrame::Text(json)).await {
            warn!(stream_sid = %stream_sid, "Telephony send failed: {}", e);
            break;
        }
    }

    let _ = outgoing.close().await;
    debug!(stream_sid = %stream_sid, "Telephony writer finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::protocols::wire::WirePeer;
    use serde_json::json;

    fn start_message(encoding: &str) -> serde_json::Value {
        json!({
            "event": "start",
            "sequenceNumber": "1",
            "streamSid": "MZ1",
            "start": {
                "accountSid": "AC1",
                "streamSid": "MZ1",
                "callSid": "CA1",
                "tracks": ["inbound"],
                "customParameters": {},
                "mediaFormat": {"encoding": encoding, "sampleRate": 8000, "channels": 1}
            }
        })
    }

    fn media_message(payload: &[u8]) -> serde_json::Value {
        json!({
            "event": "media",
            "streamSid": "MZ1",
            "media": {"track": "inbound", "chunk": "1", "timestamp": "0", "payload": BASE64.encode(payload)}
        })
    }

    async fn started() -> (TelephonyHandshake, WireChannel, WirePeer) {
        let (channel, mut peer) = WireChannel::pair(ChannelSide::Telephony, 64);
        peer.send_json(&json!({"event": "connected", "protocol": "Call", "version": "1.0.0"}))
            .await;
        peer.send_json(&start_message("audio/x-mulaw")).await;
        let (handshake, channel) = TelephonyAdapter::handshake(channel, Duration::from_secs(1))
            .await
            .unwrap();
        (handshake, channel, peer)
    }

    #[tokio::test]
    async fn test_handshake_extracts_call() {
        let (handshake, _channel, _peer) = started().await;
        assert_eq!(handshake.stream_sid.as_str(), "MZ1");
        assert_eq!(handshake.call_sid.as_str(), "CA1");
        assert_eq!(handshake.format, AudioFormat::MULAW_8K);
        assert_eq!(handshake.account_sid.as_deref(), Some("AC1"));
    }

    #[tokio::test]
    async fn test_handshake_rejects_media_before_start() {
        let (channel, mut peer) = WireChannel::pair(ChannelSide::Telephony, 8);
        peer.send_json(&media_message(&[0xFF; 160])).await;
        let err = TelephonyAdapter::handshake(channel, Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RelayError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_handshake_rejects_unsupported_format() {
        let (channel, mut peer) = WireChannel::pair(ChannelSide::Telephony, 8);
        peer.send_json(&start_message("audio/l16")).await;
        let err = TelephonyAdapter::handshake(channel, Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("unsupported media format"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_times_out() {
        let (channel, _peer) = WireChannel::pair(ChannelSide::Telephony, 8);
        let err = TelephonyAdapter::handshake(channel, Duration::from_secs(10))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RelayError::HandshakeTimeout { side: ChannelSide::Telephony }));
    }

    #[tokio::test]
    async fn test_reader_emits_frames_in_order_and_skips_empty() {
        let (handshake, channel, mut peer) = started().await;
        let (events_tx, mut events_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let _handle = TelephonyAdapter::spawn(
            channel,
            &handshake,
            events_tx,
            cancel.clone(),
            &SpeechDetectionConfig::default(),
        );

        peer.send_json(&media_message(&[0xFF; 160])).await;
        peer.send_json(&media_message(&[])).await;
        peer.send_json(&media_message(&[0x7F; 160])).await;
        peer.send_json(&json!({"event": "dtmf", "streamSid": "MZ1", "dtmf": {"track": "inbound_track", "digit": "5"}}))
            .await;
        peer.send_json(&json!({"event": "stop", "streamSid": "MZ1", "stop": {"accountSid": "AC1", "callSid": "CA1"}}))
            .await;

        let mut sequences = Vec::new();
        loop {
            match events_rx.recv().await.unwrap() {
                SessionEvent::CallerAudio(frame) => sequences.push(frame.sequence()),
                SessionEvent::Dtmf { digit } => assert_eq!(digit, "5"),
                SessionEvent::CallerHangup => break,
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(sequences, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_reader_reports_malformed_message() {
        let (handshake, channel, mut peer) = started().await;
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let handle = TelephonyAdapter::spawn(
            channel,
            &handshake,
            events_tx,
            CancellationToken::new(),
            &SpeechDetectionConfig::default(),
        );

        peer.send_text("{not json").await;
        assert!(matches!(
            events_rx.recv().await.unwrap(),
            SessionEvent::ProtocolViolation { side: ChannelSide::Telephony, .. }
        ));
        handle.reader.await.unwrap();
    }

    #[tokio::test]
    async fn test_reader_reports_abrupt_disconnect() {
        let (handshake, channel, mut peer) = started().await;
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let _handle = TelephonyAdapter::spawn(
            channel,
            &handshake,
            events_tx,
            CancellationToken::new(),
            &SpeechDetectionConfig::default(),
        );

        peer.hang_up();
        assert!(matches!(
            events_rx.recv().await.unwrap(),
            SessionEvent::Disconnected { side: ChannelSide::Telephony, .. }
        ));
    }

    #[tokio::test]
    async fn test_cancel_stops_reader() {
        let (handshake, channel, _peer) = started().await;
        let (events_tx, _events_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = TelephonyAdapter::spawn(
            channel,
            &handshake,
            events_tx,
            cancel.clone(),
            &SpeechDetectionConfig::default(),
        );

        cancel.cancel();
        handle.reader.await.unwrap();
    }

    #[tokio::test]
    async fn test_writer_sends_media_clear_and_close() {
        let (handshake, channel, mut peer) = started().await;
        let (events_tx, _events_rx) = mpsc::channel(8);
        let handle = TelephonyAdapter::spawn(
            channel,
            &handshake,
            events_tx,
            CancellationToken::new(),
            &SpeechDetectionConfig::default(),
        );

        let frame = AudioFrame::outbound(
            Bytes::from_static(&[0xFF, 0xFF, 0xFF]),
            AudioFormat::MULAW_8K,
            1,
            crate::domain::shared::value_objects::ResponseId::new("r1"),
        );
        handle.commands.send(TelephonyCommand::Media(frame)).await.unwrap();
        handle.commands.send(TelephonyCommand::Clear).await.unwrap();
        handle.commands.send(TelephonyCommand::Close).await.unwrap();

        let media = peer.recv_json().await.unwrap();
        assert_eq!(media["event"], "media");
        assert_eq!(media["streamSid"], "MZ1");
        assert_eq!(media["media"]["payload"], "////");
        assert_eq!(peer.recv_json().await.unwrap()["event"], "clear");
        assert_eq!(peer.recv().await, Some(WireFrame::Close));
        handle.writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_local_speech_detection_emits_started() {
        let (handshake, channel, mut peer) = started().await;
        let (events_tx, mut events_rx) = mpsc::channel(64);
        let speech = SpeechDetectionConfig {
            enabled: true,
            energy_threshold: 1000.0,
            min_speech_ms: 40,
            min_silence_ms: 100,
        };
        let _handle =
            TelephonyAdapter::spawn(channel, &handshake, events_tx, CancellationToken::new(), &speech);

        // 0x80 decodes to full-scale positive in μ-law
        for _ in 0..2 {
            peer.send_json(&media_message(&[0x80; 160])).await;
        }

        assert!(matches!(events_rx.recv().await.unwrap(), SessionEvent::CallerAudio(_)));
        assert!(matches!(
            events_rx.recv().await.unwrap(),
            SessionEvent::SpeechStarted { source: ChannelSide::Telephony }
        ));
        assert!(matches!(events_rx.recv().await.unwrap(), SessionEvent::CallerAudio(_)));
    }
}
