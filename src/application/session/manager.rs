//! Call session manager
//!
//! Runs one relayed call from the telephony `start` message to the persisted
//! record. Both adapters push [`SessionEvent`]s onto one bounded queue; the
//! consumer loop in [`LiveCall::run`] is the only code that touches the
//! session aggregate, the relay and the interruption controller.

use super::metrics;
use super::registry::{ActiveCall, CallRegistry};
use crate::config::Config;
use crate::domain::audio::AudioFrame;
use crate::domain::interruption::{
    AudioDisposition, Interruption, InterruptionController, InterruptionState, ResponseAudio,
};
use crate::domain::session::{
    CallSession, EndReason, SessionEvent, SessionState, Speaker, TranscriptEvent,
};
use crate::domain::shared::error::RelayError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{ChannelSide, ItemId, ResponseId, SessionId, StreamSid};
use crate::infrastructure::media::FrameRelay;
use crate::infrastructure::persistence::PersistenceHandle;
use crate::infrastructure::protocols::realtime::{RealtimeAdapter, RealtimeCommand, RealtimeConnector};
use crate::infrastructure::protocols::telephony::{TelephonyAdapter, TelephonyCommand, TelephonyHandshake};
use crate::infrastructure::protocols::wire::{AdapterHandle, WireChannel, WireFrame};
use futures::SinkExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub session_id: SessionId,
    pub stream_sid: StreamSid,
    pub end_reason: EndReason,
}

/// Creates and drives call sessions
#[derive(Clone)]
pub struct CallSessionManager {
    config: Arc<Config>,
    registry: CallRegistry,
    persistence: PersistenceHandle,
    connector: Arc<dyn RealtimeConnector>,
}

impl CallSessionManager {
    pub fn new(
        config: Arc<Config>,
        registry: CallRegistry,
        persistence: PersistenceHandle,
        connector: Arc<dyn RealtimeConnector>,
    ) -> Self {
        Self {
            config,
            registry,
            persistence,
            connector,
        }
    }

    pub fn registry(&self) -> &CallRegistry {
        &self.registry
    }

    /// Run a call over an accepted telephony socket until it is closed and
    /// its record has been handed to persistence.
    pub async fn run(&self, channel: WireChannel) -> Result<SessionOutcome> {
        let (handshake, mut telephony_channel) =
            match TelephonyAdapter::handshake(channel, self.config.session.handshake_timeout()).await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Telephony handshake failed: {}", e);
                    return Err(e);
                }
            };

        let session = CallSession::new(handshake.stream_sid.clone(), handshake.call_sid.clone());
        let shutdown = CancellationToken::new();
        let active = ActiveCall {
            session_id: *session.id(),
            stream_sid: handshake.stream_sid.clone(),
            call_id: handshake.call_sid.clone(),
            ai_session_id: None,
            state: SessionState::Created,
            started_at: *session.created_at(),
        };
        if let Err(e) = self.registry.insert(active, shutdown.clone()).await {
            warn!(stream_sid = %handshake.stream_sid, "Rejecting call: {}", e);
            let _ = telephony_channel.outgoing.send(WireFrame::Close).await;
            return Err(e);
        }

        metrics::record_session_started();
        info!(
            session_id = %session.id(),
            stream_sid = %handshake.stream_sid,
            call_sid = %handshake.call_sid,
            format = %handshake.format,
            "Call session created"
        );
        publish_latest(&self.persistence, &session);

        let session = match self.connect(session, &handshake, telephony_channel, shutdown).await {
            Ok(live) => live.run().await,
            Err(closed) => closed,
        };
        self.finish(session).await
    }

    /// Open the realtime side and start both adapters
    async fn connect(
        &self,
        mut session: CallSession,
        handshake: &TelephonyHandshake,
        telephony_channel: WireChannel,
        shutdown: CancellationToken,
    ) -> std::result::Result<LiveCall, CallSession> {
        let config = &self.config;

        let relay = match FrameRelay::new(
            handshake.format,
            config.realtime.audio_format.format(),
            config.session.frame_ms,
        ) {
            Ok(relay) => relay,
            Err(e) => {
                return Err(self
                    .abandon(session, telephony_channel, EndReason::ProtocolError, &e)
                    .await)
            }
        };

        let opened = tokio::select! {
            _ = shutdown.cancelled() => Err((
                EndReason::ServerShutdown,
                RelayError::Internal("shutdown during realtime handshake".to_string()),
            )),
            opened = RealtimeAdapter::open(
                self.connector.as_ref(),
                &config.realtime,
                config.session.handshake_timeout(),
            ) => opened.map_err(|e| (EndReason::HandshakeFailed, e)),
        };
        let (ai_handshake, realtime_channel) = match opened {
            Ok(opened) => opened,
            Err((reason, e)) => return Err(self.abandon(session, telephony_channel, reason, &e).await),
        };

        if let Err(e) = session.activate(ai_handshake.session_id.clone()) {
            error!(session_id = %session.id(), "Failed to activate session: {}", e);
        }
        publish_latest(&self.persistence, &session);
        let configured = session.record("session.configured", ai_handshake.configuration);
        self.persistence.append(session.id(), configured);
        if let Err(e) = self
            .registry
            .update(&handshake.stream_sid, SessionState::Active, ai_handshake.session_id)
            .await
        {
            warn!(session_id = %session.id(), "Registry update failed: {}", e);
        }

        let (events_tx, events_rx) = mpsc::channel(config.session.queue_capacity.max(1));
        let io_cancel = CancellationToken::new();
        let telephony = TelephonyAdapter::spawn(
            telephony_channel,
            handshake,
            events_tx.clone(),
            io_cancel.clone(),
            &config.telephony.speech_detection,
        );
        let realtime = RealtimeAdapter::spawn(realtime_channel, events_tx, io_cancel.clone());

        Ok(LiveCall {
            session,
            controller: InterruptionController::new(config.session.truncate_timeout()),
            relay,
            telephony,
            realtime,
            events: events_rx,
            persistence: self.persistence.clone(),
            shutdown,
            io_cancel,
            frame_interval: config.session.frame_interval(),
            grace: config.session.grace_period(),
            last_audio: None,
            playing: None,
        })
    }

    /// Close a session whose realtime side never came up
    async fn abandon(
        &self,
        mut session: CallSession,
        mut telephony_channel: WireChannel,
        reason: EndReason,
        cause: &RelayError,
    ) -> CallSession {
        warn!(session_id = %session.id(), end_reason = %reason, "Realtime side not opened: {}", cause);

        let event = session.record("session.failed", json!({ "error": cause.to_string() }));
        self.persistence.append(session.id(), event);
        if let Err(e) = session.begin_termination(reason) {
            error!(session_id = %session.id(), "Failed to terminate session: {}", e);
        }
        publish_latest(&self.persistence, &session);

        let grace = self.config.session.grace_period();
        if tokio::time::timeout(grace, telephony_channel.outgoing.send(WireFrame::Close))
            .await
            .is_err()
        {
            warn!(session_id = %session.id(), "Telephony close not delivered within grace period");
        }

        if let Err(e) = session.close() {
            error!(session_id = %session.id(), "Failed to close session: {}", e);
        }
        publish_latest(&self.persistence, &session);
        session
    }

    /// Unregister the call and hand its record to persistence
    async fn finish(&self, mut session: CallSession) -> Result<SessionOutcome> {
        let session_id = *session.id();
        let stream_sid = session.stream_sid().clone();
        let end_reason = session.end_reason().unwrap_or(EndReason::UpstreamDisconnect);

        self.registry.remove(&stream_sid).await;
        metrics::record_session_ended(end_reason);

        let record = session.take_record()?;
        let turns = record.transcript.len();
        if let Err(e) = self.persistence.finalize(&session_id, record).await {
            error!(session_id = %session_id, "Call record not persisted: {}", e);
        }

        info!(
            session_id = %session_id,
            stream_sid = %stream_sid,
            end_reason = %end_reason,
            turns,
            "Call session closed"
        );
        Ok(SessionOutcome {
            session_id,
            stream_sid,
            end_reason,
        })
    }
}

fn publish_latest(persistence: &PersistenceHandle, session: &CallSession) {
    if let Some(event) = session.events().last() {
        persistence.append(session.id(), event.clone());
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// An active session with both adapters running
struct LiveCall {
    session: CallSession,
    controller: InterruptionController,
    relay: FrameRelay,
    telephony: AdapterHandle<TelephonyCommand>,
    realtime: AdapterHandle<RealtimeCommand>,
    events: mpsc::Receiver<SessionEvent>,
    persistence: PersistenceHandle,
    shutdown: CancellationToken,
    io_cancel: CancellationToken,
    frame_interval: Duration,
    grace: Duration,
    /// Last response audio seen, for flushing its tail on `response.done`
    last_audio: Option<ResponseAudio>,
    /// Response whose frames are currently going out
    playing: Option<ResponseId>,
}

impl LiveCall {
    /// Consume events until the session must end; returns the closed session
    async fn run(mut self) -> CallSession {
        let mut tick = tokio::time::interval(self.frame_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reason = loop {
            let deadline = self.controller.truncate_deadline();
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break EndReason::ServerShutdown,
                _ = tick.tick() => self.on_tick().await,
                _ = wait_until(deadline) => self.on_truncate_deadline(),
                event = self.events.recv() => match event {
                    Some(event) => {
                        if let Some(reason) = self.handle(event).await {
                            break reason;
                        }
                    }
                    None => break EndReason::UpstreamDisconnect,
                },
            }
        };

        self.terminate(reason).await
    }

    async fn handle(&mut self, event: SessionEvent) -> Option<EndReason> {
        metrics::record_session_event(event.kind());
        match event {
            SessionEvent::CallerAudio(frame) => self.forward_caller_audio(&frame).await,
            SessionEvent::Mark { name } => {
                debug!(session_id = %self.session.id(), mark = %name, "Playback mark reached");
                self.record("mark", json!({ "name": name }));
            }
            SessionEvent::Dtmf { digit } => {
                info!(session_id = %self.session.id(), digit = %digit, "DTMF received");
                self.record("dtmf", json!({ "digit": digit }));
            }
            SessionEvent::CallerHangup => return Some(EndReason::CallerHangup),
            SessionEvent::AudioDelta { audio, payload } => self.on_audio_delta(audio, &payload),
            SessionEvent::TranscriptDelta {
                speaker,
                text,
                is_final,
                response_id,
                ..
            } => self.on_transcript(speaker, text, is_final, response_id),
            SessionEvent::ResponseDone {
                response_id,
                status,
                output,
                usage,
            } => self.on_response_done(response_id, status, output, usage),
            SessionEvent::SpeechStarted { source } => self.on_speech_started(source).await,
            SessionEvent::SpeechStopped { source } => {
                debug!(session_id = %self.session.id(), source = %source, "Caller speech stopped");
                self.controller.on_speech_stopped();
            }
            SessionEvent::FunctionCall {
                call_id,
                name,
                arguments,
            } => {
                info!(session_id = %self.session.id(), call_id = %call_id, name = ?name, "Function call requested");
                self.record(
                    "function_call",
                    json!({ "callId": call_id, "name": name, "arguments": arguments }),
                );
            }
            SessionEvent::TruncateAcknowledged {
                item_id,
                audio_end_ms,
            } => self.on_truncate_ack(item_id, audio_end_ms),
            SessionEvent::ServiceError { code, message } => {
                warn!(session_id = %self.session.id(), code = ?code, "Realtime service error: {}", message);
                self.record("service.error", json!({ "code": code, "message": message }));
            }
            SessionEvent::Disconnected { side, reason } => {
                self.record("channel.disconnected", json!({ "side": side, "reason": reason }));
                return Some(EndReason::UpstreamDisconnect);
            }
            SessionEvent::ProtocolViolation { side, message } => {
                self.record("protocol.violation", json!({ "side": side, "message": message }));
                return Some(EndReason::ProtocolError);
            }
        }
        None
    }

    async fn forward_caller_audio(&mut self, frame: &AudioFrame) {
        let Some(converted) = self.relay.inbound(frame) else {
            return;
        };
        match self
            .realtime
            .commands
            .send(RealtimeCommand::AppendAudio(converted))
            .await
        {
            Ok(()) => metrics::record_inbound_frame(),
            Err(_) => debug!(session_id = %self.session.id(), "Realtime writer stopped, caller audio dropped"),
        }
    }

    fn on_audio_delta(&mut self, audio: ResponseAudio, payload: &[u8]) {
        if self.controller.is_truncated(&audio.response_id) {
            debug!(response_id = %audio.response_id, "Dropping audio delta for truncated response");
            metrics::record_late_frames_dropped(1);
            return;
        }

        let frames = self.relay.outbound(&audio.response_id, payload);
        let (current, earlier): (Vec<AudioFrame>, Vec<AudioFrame>) = frames
            .into_iter()
            .partition(|f| f.belongs_to(&audio.response_id));

        if !earlier.is_empty() {
            if let Some(previous) = self.last_audio.clone() {
                self.queue_audio(&previous, earlier);
            }
        }
        self.queue_audio(&audio, current);
        self.last_audio = Some(audio);
    }

    fn queue_audio(&mut self, audio: &ResponseAudio, frames: Vec<AudioFrame>) {
        if frames.is_empty() {
            return;
        }
        if let AudioDisposition::Dropped(count) = self.controller.on_audio(audio, frames) {
            metrics::record_late_frames_dropped(count);
        }
    }

    fn on_response_done(
        &mut self,
        response_id: ResponseId,
        status: Option<String>,
        output: Option<serde_json::Value>,
        usage: Option<serde_json::Value>,
    ) {
        let current = self
            .last_audio
            .clone()
            .filter(|audio| audio.response_id == response_id);
        if let Some(audio) = current {
            if let Some(tail) = self.relay.flush_outbound() {
                self.queue_audio(&audio, vec![tail]);
            }
        }

        self.controller.on_response_done(&response_id);
        self.record(
            "response.done",
            json!({
                "responseId": response_id,
                "status": status,
                "output": output,
                "usage": usage,
            }),
        );
    }

    fn on_transcript(
        &mut self,
        speaker: Speaker,
        text: String,
        is_final: bool,
        response_id: Option<ResponseId>,
    ) {
        if !is_final {
            debug!(session_id = %self.session.id(), speaker = ?speaker, "Partial transcript");
            return;
        }

        let interrupted = response_id
            .as_ref()
            .is_some_and(|r| self.controller.is_truncated(r));
        let mut turn = match speaker {
            Speaker::Caller => TranscriptEvent::caller(text, true),
            Speaker::Assistant => TranscriptEvent::assistant(text, true, response_id),
        };
        turn.interrupted = interrupted;

        match self.session.append_transcript(turn) {
            Ok(turn) => {
                let data = serde_json::to_value(&turn).unwrap_or(serde_json::Value::Null);
                self.record("transcript", data);
            }
            Err(e) => warn!(session_id = %self.session.id(), "Transcript turn not logged: {}", e),
        }
    }

    async fn on_speech_started(&mut self, source: ChannelSide) {
        match self.controller.on_speech_started(Instant::now()) {
            Some(interruption) => self.interrupt(source, interruption).await,
            None => debug!(
                session_id = %self.session.id(),
                source = %source,
                state = %self.controller.state(),
                "Caller speech started"
            ),
        }
    }

    /// Caller barged in: stop playback and cut the response at what was heard
    async fn interrupt(&mut self, source: ChannelSide, interruption: Interruption) {
        let dropped_bytes = self.relay.discard_outbound();
        self.playing = None;
        let marker = interruption.marker;

        info!(
            session_id = %self.session.id(),
            response_id = %marker.response_id,
            audio_end_ms = marker.audio_end_ms,
            discarded_frames = interruption.discarded_frames,
            source = %source,
            "Caller interrupted response"
        );

        if self.telephony.commands.send(TelephonyCommand::Clear).await.is_err() {
            debug!(session_id = %self.session.id(), "Telephony writer stopped, clear not sent");
        }
        if self
            .realtime
            .commands
            .send(RealtimeCommand::Truncate(marker.clone()))
            .await
            .is_err()
        {
            warn!(session_id = %self.session.id(), "Realtime writer stopped, truncate not sent");
        }
        metrics::record_truncation();

        self.record(
            "truncate.issued",
            json!({
                "source": source,
                "marker": marker,
                "discardedFrames": interruption.discarded_frames,
                "discardedMs": interruption.discarded.as_millis() as u64,
                "discardedBytes": dropped_bytes,
            }),
        );
    }

    fn on_truncate_ack(&mut self, item_id: ItemId, audio_end_ms: u32) {
        match self.controller.on_truncate_ack(&item_id, Instant::now()) {
            Some(resolution) => {
                debug!(
                    session_id = %self.session.id(),
                    response_id = %resolution.response_id,
                    waited_ms = resolution.waited.as_millis() as u64,
                    "Truncate acknowledged"
                );
                self.record(
                    "truncate.acknowledged",
                    json!({
                        "responseId": resolution.response_id,
                        "itemId": item_id,
                        "audioEndMs": audio_end_ms,
                        "waitedMs": resolution.waited.as_millis() as u64,
                    }),
                );
            }
            None => debug!(item_id = %item_id, "Unmatched truncate acknowledgment"),
        }
    }

    fn on_truncate_deadline(&mut self) {
        let Some(resolution) = self.controller.on_truncate_timeout(Instant::now()) else {
            return;
        };
        let error = RelayError::TruncateTimeout {
            response_id: resolution.response_id.clone(),
            waited_ms: resolution.waited.as_millis() as u64,
        };
        metrics::record_truncate_timeout();
        self.record(
            "truncate.timeout",
            json!({
                "responseId": resolution.response_id,
                "waitedMs": resolution.waited.as_millis() as u64,
                "error": error.to_string(),
            }),
        );
    }

    /// One playout tick: hand at most one frame to telephony
    async fn on_tick(&mut self) {
        let frame = self.controller.next_frame();
        let next = frame.as_ref().and_then(|f| f.response_id().cloned());
        self.finish_playout(next.as_ref()).await;

        if let Some(frame) = frame {
            self.playing = next;
            match self.telephony.commands.send(TelephonyCommand::Media(frame)).await {
                Ok(()) => metrics::record_outbound_frame(),
                Err(_) => debug!(session_id = %self.session.id(), "Telephony writer stopped, frame dropped"),
            }
        }
    }

    /// Mark the end of a response's playout once its last frame went out
    async fn finish_playout(&mut self, next: Option<&ResponseId>) {
        let Some(playing) = self.playing.as_ref() else {
            return;
        };
        if next == Some(playing) {
            return;
        }
        let still_open = matches!(
            self.controller.state(),
            InterruptionState::AiSpeaking(open) if open == playing
        );
        if next.is_none() && still_open {
            return;
        }

        let name = format!("response:{}", playing);
        self.playing = None;
        if self.telephony.commands.send(TelephonyCommand::Mark(name)).await.is_err() {
            debug!(session_id = %self.session.id(), "Telephony writer stopped, mark not sent");
        }
    }

    fn record(&mut self, kind: &str, data: serde_json::Value) {
        let event = self.session.record(kind, data);
        self.persistence.append(self.session.id(), event);
    }

    /// Close both sides within the grace period and move to `Closed`
    async fn terminate(mut self, reason: EndReason) -> CallSession {
        match self.session.begin_termination(reason) {
            Ok(_) => publish_latest(&self.persistence, &self.session),
            Err(e) => error!(session_id = %self.session.id(), "Failed to terminate session: {}", e),
        }

        let dropped_frames = self.controller.drain();
        // A tail is only delivered right behind audio that was actually played
        let tail = self
            .relay
            .flush_outbound()
            .filter(|_| dropped_frames == 0 && reason != EndReason::CallerHangup);
        info!(
            session_id = %self.session.id(),
            end_reason = %reason,
            dropped_frames,
            flushed_tail = tail.is_some(),
            "Terminating call session"
        );

        let LiveCall {
            mut session,
            telephony,
            realtime,
            events,
            persistence,
            io_cancel,
            grace,
            ..
        } = self;

        io_cancel.cancel();
        drop(events);
        if let Some(tail) = tail {
            match telephony.commands.try_send(TelephonyCommand::Media(tail)) {
                Ok(()) => metrics::record_outbound_frame(),
                Err(_) => debug!(session_id = %session.id(), "Telephony writer stopped, tail dropped"),
            }
        }
        tokio::join!(
            close_adapter(telephony, TelephonyCommand::Close, grace, ChannelSide::Telephony),
            close_adapter(realtime, RealtimeCommand::Close, grace, ChannelSide::Realtime),
        );

        if let Err(e) = session.close() {
            error!(session_id = %session.id(), "Failed to close session: {}", e);
        }
        publish_latest(&persistence, &session);
        session
    }
}

/// Ask the writer to close its socket; abort whatever outlives the grace period
async fn close_adapter<C>(handle: AdapterHandle<C>, close: C, grace: Duration, side: ChannelSide) {
    let AdapterHandle {
        commands,
        mut reader,
        mut writer,
    } = handle;

    if commands.try_send(close).is_err() {
        debug!(side = %side, "Close command not queued");
    }
    drop(commands);

    let stopped = tokio::time::timeout(grace, async {
        let _ = (&mut writer).await;
        let _ = (&mut reader).await;
    })
    .await;

    if stopped.is_err() {
        warn!(
            side = %side,
            grace_ms = grace.as_millis() as u64,
            "Adapter still running after grace period, aborting"
        );
        writer.abort();
        reader.abort();
    }
}
