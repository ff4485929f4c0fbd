//! Call session aggregate root

use crate::domain::persistence::{CallRecord, TranscriptEntry};
use crate::domain::session::transcript::TranscriptEvent;
use crate::domain::session::value_object::{EndReason, SessionState};
use crate::domain::shared::error::RelayError;
use crate::domain::shared::events::RecordedEvent;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{AiSessionId, CallSid, SessionId, StreamSid};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;

/// Call session aggregate root
///
/// Owned by exactly one session consumer loop, which is the only code that
/// mutates it. Holds the transcript and the structured event log that are
/// flushed to persistence once the session closes.
#[derive(Debug, Clone)]
pub struct CallSession {
    id: SessionId,
    stream_sid: StreamSid,
    call_sid: CallSid,
    ai_session_id: Option<AiSessionId>,
    state: SessionState,
    end_reason: Option<EndReason>,
    transcript: Vec<TranscriptEvent>,
    events: Vec<RecordedEvent>,
    created_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    finalized: bool,
}

impl CallSession {
    /// Create a session for a completed telephony handshake
    pub fn new(stream_sid: StreamSid, call_sid: CallSid) -> Self {
        let created_at = Utc::now();
        let mut session = Self {
            id: SessionId::new(),
            stream_sid,
            call_sid,
            ai_session_id: None,
            state: SessionState::Created,
            end_reason: None,
            transcript: Vec::new(),
            events: Vec::new(),
            created_at,
            closed_at: None,
            finalized: false,
        };

        let data = json!({
            "streamSid": session.stream_sid,
            "callSid": session.call_sid,
        });
        session.record("session.created", data);

        session
    }

    /// Realtime service session is open; audio can flow
    pub fn activate(&mut self, ai_session_id: Option<AiSessionId>) -> Result<()> {
        self.transition_to(SessionState::Active)?;
        self.ai_session_id = ai_session_id;
        let data = json!({ "aiSessionId": self.ai_session_id });
        self.record("session.active", data);
        Ok(())
    }

    /// Start closing the session.
    ///
    /// Returns `false` when the session is already terminating; the first end
    /// reason wins.
    pub fn begin_termination(&mut self, reason: EndReason) -> Result<bool> {
        if matches!(self.state, SessionState::Terminating) {
            return Ok(false);
        }
        self.transition_to(SessionState::Terminating)?;
        self.end_reason = Some(reason);
        self.record("session.terminating", json!({ "endReason": reason }));
        Ok(true)
    }

    /// Both channels are closed
    pub fn close(&mut self) -> Result<()> {
        self.transition_to(SessionState::Closed)?;
        let closed_at = self.next_timestamp(Utc::now());
        self.closed_at = Some(closed_at);
        self.record("session.closed", json!({ "endReason": self.end_reason }));
        Ok(())
    }

    /// Append a final transcript turn.
    ///
    /// Timestamps are forced strictly increasing so the persisted order always
    /// matches arrival order.
    pub fn append_transcript(&mut self, mut event: TranscriptEvent) -> Result<TranscriptEvent> {
        if !self.state.is_open() {
            return Err(RelayError::InvalidStateTransition(format!(
                "Cannot append transcript in {} state",
                self.state.as_str()
            )));
        }
        if !event.is_final {
            return Err(RelayError::Internal(
                "Only final transcript turns are logged".to_string(),
            ));
        }

        event.timestamp = self.next_timestamp(event.timestamp);
        self.transcript.push(event.clone());
        Ok(event)
    }

    /// Record a structured event and return a copy for persistence
    pub fn record(&mut self, kind: &str, data: serde_json::Value) -> RecordedEvent {
        let now = Utc::now();
        let at = match self.events.last() {
            Some(last) if now <= last.occurred_at => last.occurred_at + Duration::microseconds(1),
            _ => now,
        };
        let event = RecordedEvent::at(kind, data, at);
        self.events.push(event.clone());
        event
    }

    /// Build the final record. Only once, and only after close.
    pub fn take_record(&mut self) -> Result<CallRecord> {
        if self.state != SessionState::Closed {
            return Err(RelayError::InvalidStateTransition(
                "Session must be closed before it is finalized".to_string(),
            ));
        }
        if self.finalized {
            return Err(RelayError::AlreadyExists(format!(
                "Record for session {} was already finalized",
                self.id
            )));
        }
        self.finalized = true;

        Ok(CallRecord {
            call_id: self.call_sid.clone(),
            stream_sid: self.stream_sid.clone(),
            session_id: self.id,
            started_at: self.created_at,
            ended_at: self.closed_at.unwrap_or_else(Utc::now),
            end_reason: self.end_reason.unwrap_or(EndReason::UpstreamDisconnect),
            transcript: self.transcript.iter().map(TranscriptEntry::from).collect(),
            events: self.events.clone(),
        })
    }

    fn next_timestamp(&self, candidate: DateTime<Utc>) -> DateTime<Utc> {
        match self.transcript.last() {
            Some(last) if candidate <= last.timestamp => last.timestamp + Duration::microseconds(1),
            _ => candidate,
        }
    }

    fn transition_to(&mut self, new_state: SessionState) -> Result<()> {
        if !self.state.can_transition_to(new_state) {
            return Err(RelayError::InvalidStateTransition(format!(
                "Cannot transition from {:?} to {:?}",
                self.state, new_state
            )));
        }

        self.state = new_state;
        Ok(())
    }

    // Getters
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn stream_sid(&self) -> &StreamSid {
        &self.stream_sid
    }

    pub fn call_sid(&self) -> &CallSid {
        &self.call_sid
    }

    pub fn ai_session_id(&self) -> Option<&AiSessionId> {
        self.ai_session_id.as_ref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.end_reason
    }

    pub fn transcript(&self) -> &[TranscriptEvent] {
        &self.transcript
    }

    pub fn events(&self) -> &[RecordedEvent] {
        &self.events
    }

    pub fn created_at(&self) -> &DateTime<Utc> {
        &self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::value_object::Speaker;

    fn create_test_session() -> CallSession {
        CallSession::new(StreamSid::new("MZ-test"), CallSid::new("CA-test"))
    }

    #[test]
    fn test_session_lifecycle() {
        let mut session = create_test_session();
        assert_eq!(session.state(), SessionState::Created);

        session.activate(Some(AiSessionId::new("sess_1"))).unwrap();
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.ai_session_id().unwrap().as_str(), "sess_1");

        assert!(session.begin_termination(EndReason::CallerHangup).unwrap());
        assert!(!session.begin_termination(EndReason::UpstreamDisconnect).unwrap());
        assert_eq!(session.end_reason(), Some(EndReason::CallerHangup));

        session.close().unwrap();
        assert_eq!(session.state(), SessionState::Closed);

        let record = session.take_record().unwrap();
        assert_eq!(record.end_reason, EndReason::CallerHangup);
        assert!(record.ended_at >= record.started_at);
        let kinds: Vec<_> = record.events.iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(
            kinds,
            vec!["session.created", "session.active", "session.terminating", "session.closed"]
        );
    }

    #[test]
    fn test_record_is_taken_exactly_once() {
        let mut session = create_test_session();
        assert!(session.take_record().is_err());

        session.begin_termination(EndReason::HandshakeFailed).unwrap();
        session.close().unwrap();

        assert!(session.take_record().is_ok());
        assert!(matches!(
            session.take_record(),
            Err(RelayError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_cannot_close_open_session() {
        let mut session = create_test_session();
        assert!(session.close().is_err());
    }

    #[test]
    fn test_transcript_timestamps_strictly_increase() {
        let mut session = create_test_session();
        session.activate(None).unwrap();

        let frozen = Utc::now();
        for i in 0..5 {
            let mut turn = TranscriptEvent::caller(format!("turn {}", i), true);
            turn.timestamp = frozen;
            session.append_transcript(turn).unwrap();
        }

        let stamps: Vec<_> = session.transcript().iter().map(|t| t.timestamp).collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(session.transcript()[4].text, "turn 4");
        assert_eq!(session.transcript()[0].speaker, Speaker::Caller);
    }

    #[test]
    fn test_partial_transcript_is_rejected() {
        let mut session = create_test_session();
        session.activate(None).unwrap();
        assert!(session
            .append_transcript(TranscriptEvent::caller("hel", false))
            .is_err());
        assert!(session.transcript().is_empty());
    }

    #[test]
    fn test_no_transcript_after_termination() {
        let mut session = create_test_session();
        session.activate(None).unwrap();
        session.begin_termination(EndReason::CallerHangup).unwrap();
        assert!(session
            .append_transcript(TranscriptEvent::caller("late", true))
            .is_err());
    }
}
