//! Interruption controller
//!
//! Owns the outbound playout buffer of one session. Assistant audio is
//! queued here by response and released one frame per playout tick through
//! [`InterruptionController::next_frame`], so the forwarded count of a
//! response is always what the caller has actually been sent. When the
//! caller barges in, the forwarded count becomes the truncate offset and
//! everything still buffered is discarded.

use super::marker::{Interruption, InterruptionMarker, TruncateResolution};
use super::state::{AudioDisposition, InterruptionState, ResponseAudio};
use crate::domain::audio::AudioFrame;
use crate::domain::shared::value_objects::{ItemId, ResponseId};
use chrono::Utc;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Audio window of one response
#[derive(Debug, Clone)]
struct SpeakingWindow {
    audio: ResponseAudio,
    forwarded_frames: u32,
    forwarded: Duration,
    generation_done: bool,
}

impl SpeakingWindow {
    fn new(audio: ResponseAudio) -> Self {
        Self {
            audio,
            forwarded_frames: 0,
            forwarded: Duration::ZERO,
            generation_done: false,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingTruncate {
    response_id: ResponseId,
    item_id: ItemId,
    issued: Instant,
    deadline: Instant,
}

pub struct InterruptionController {
    state: InterruptionState,
    open: Option<SpeakingWindow>,
    queued: VecDeque<SpeakingWindow>,
    playout: VecDeque<AudioFrame>,
    truncated: HashSet<ResponseId>,
    pending: Option<PendingTruncate>,
    ack_timeout: Duration,
}

impl InterruptionController {
    pub fn new(ack_timeout: Duration) -> Self {
        Self {
            state: InterruptionState::Idle,
            open: None,
            queued: VecDeque::new(),
            playout: VecDeque::new(),
            truncated: HashSet::new(),
            pending: None,
            ack_timeout,
        }
    }

    pub fn state(&self) -> &InterruptionState {
        &self.state
    }

    /// Frames waiting for the playout tick
    pub fn buffered_frames(&self) -> usize {
        self.playout.len()
    }

    /// Frames of the open response already handed to telephony
    pub fn forwarded_frames(&self) -> u32 {
        self.open.as_ref().map_or(0, |w| w.forwarded_frames)
    }

    pub fn is_truncated(&self, response_id: &ResponseId) -> bool {
        self.truncated.contains(response_id)
    }

    /// When the pending truncate gives up waiting for its acknowledgment
    pub fn truncate_deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.deadline)
    }

    /// Queue converted assistant audio for playout
    pub fn on_audio(&mut self, audio: &ResponseAudio, frames: Vec<AudioFrame>) -> AudioDisposition {
        let frames: Vec<AudioFrame> = frames.into_iter().filter(|f| !f.is_empty()).collect();
        if frames.is_empty() {
            return AudioDisposition::Ignored;
        }

        let response_id = &audio.response_id;
        if self.truncated.contains(response_id) {
            debug!(response_id = %response_id, frames = frames.len(), "Dropping late audio for truncated response");
            return AudioDisposition::Dropped(frames.len());
        }

        let known = self
            .open
            .as_ref()
            .is_some_and(|w| &w.audio.response_id == response_id)
            || self.queued.iter().any(|w| &w.audio.response_id == response_id);

        if !known {
            let window = SpeakingWindow::new(audio.clone());
            if self.open.is_none() && self.pending.is_none() && self.queued.is_empty() {
                self.open_window(window);
            } else {
                debug!(response_id = %response_id, "Queueing response behind current window");
                self.queued.push_back(window);
            }
        }

        let count = frames.len();
        self.playout.extend(frames);
        AudioDisposition::Queued(count)
    }

    /// Release the next frame for the playout tick.
    ///
    /// Returns `None` when nothing may be forwarded right now, including
    /// while a truncate is pending.
    pub fn next_frame(&mut self) -> Option<AudioFrame> {
        loop {
            match &self.state {
                InterruptionState::AiSpeaking(response_id) => {
                    let response_id = response_id.clone();
                    if self.drop_orphaned_head() {
                        continue;
                    }
                    let ready = self
                        .playout
                        .front()
                        .is_some_and(|f| f.belongs_to(&response_id));

                    if ready {
                        let frame = self.playout.pop_front()?;
                        if let Some(window) = self.open.as_mut() {
                            window.forwarded_frames += 1;
                            window.forwarded += frame.duration();
                        }
                        return Some(frame);
                    }

                    let done = self.open.as_ref().is_some_and(|w| w.generation_done);
                    if !done {
                        return None;
                    }
                    self.close_window();
                }
                InterruptionState::Idle => {
                    if !self.promote_queued() {
                        return None;
                    }
                }
                InterruptionState::UserSpeaking | InterruptionState::Truncating(_) => return None,
            }
        }
    }

    /// The service finished generating `response_id`
    pub fn on_response_done(&mut self, response_id: &ResponseId) -> bool {
        if let Some(window) = self.open.as_mut() {
            if &window.audio.response_id == response_id {
                window.generation_done = true;
                let drained = !self.playout.iter().any(|f| f.belongs_to(response_id));
                if drained && matches!(self.state, InterruptionState::AiSpeaking(_)) {
                    self.close_window();
                    self.promote_queued();
                }
                return true;
            }
        }

        if let Some(window) = self
            .queued
            .iter_mut()
            .find(|w| &w.audio.response_id == response_id)
        {
            window.generation_done = true;
            return true;
        }

        false
    }

    /// Caller started speaking.
    ///
    /// Emits an [`Interruption`] only when a response is being played; any
    /// other state either records that the caller is speaking or ignores the
    /// signal.
    pub fn on_speech_started(&mut self, now: Instant) -> Option<Interruption> {
        match &self.state {
            InterruptionState::Idle => {
                self.transition(InterruptionState::UserSpeaking);
                None
            }
            InterruptionState::UserSpeaking | InterruptionState::Truncating(_) => None,
            InterruptionState::AiSpeaking(_) => {
                let window = self.open.take()?;
                self.transition(InterruptionState::UserSpeaking);

                let discarded_frames = self.playout.len();
                let discarded = self.playout.iter().map(AudioFrame::duration).sum();
                self.playout.clear();
                for later in self.queued.drain(..) {
                    self.truncated.insert(later.audio.response_id);
                }

                let ResponseAudio {
                    response_id,
                    item_id,
                    content_index,
                } = window.audio;
                self.truncated.insert(response_id.clone());

                let marker = InterruptionMarker {
                    response_id: response_id.clone(),
                    item_id: item_id.clone(),
                    content_index,
                    audio_end_ms: window.forwarded.as_millis() as u32,
                    forwarded_frames: window.forwarded_frames,
                    cancel_generation: !window.generation_done,
                    issued_at: Utc::now(),
                };

                self.pending = Some(PendingTruncate {
                    response_id: response_id.clone(),
                    item_id,
                    issued: now,
                    deadline: now + self.ack_timeout,
                });
                self.transition(InterruptionState::Truncating(response_id));

                Some(Interruption {
                    marker,
                    discarded_frames,
                    discarded,
                })
            }
        }
    }

    /// Caller stopped speaking
    pub fn on_speech_stopped(&mut self) {
        if matches!(self.state, InterruptionState::UserSpeaking) {
            self.transition(InterruptionState::Idle);
        }
    }

    /// The service confirmed the truncate for `item_id`
    pub fn on_truncate_ack(&mut self, item_id: &ItemId, now: Instant) -> Option<TruncateResolution> {
        match self.pending.take() {
            Some(pending) if &pending.item_id == item_id => Some(self.resolve(pending, now, false)),
            other => {
                self.pending = other;
                debug!(item_id = %item_id, "Ignoring truncate acknowledgment with no pending truncate");
                None
            }
        }
    }

    /// Give up on an acknowledgment whose deadline has passed
    pub fn on_truncate_timeout(&mut self, now: Instant) -> Option<TruncateResolution> {
        let expired = self.pending.as_ref().is_some_and(|p| now >= p.deadline);
        if !expired {
            return None;
        }
        let pending = self.pending.take()?;
        let resolution = self.resolve(pending, now, true);
        warn!(
            response_id = %resolution.response_id,
            waited_ms = resolution.waited.as_millis() as u64,
            "Truncate acknowledgment timed out, dropped locally"
        );
        Some(resolution)
    }

    /// Drop all pending playout, e.g. when the session closes
    pub fn drain(&mut self) -> usize {
        let dropped = self.playout.len();
        self.playout.clear();
        self.queued.clear();
        self.open = None;
        self.pending = None;
        self.state = InterruptionState::Idle;
        dropped
    }

    fn resolve(&mut self, pending: PendingTruncate, now: Instant, timed_out: bool) -> TruncateResolution {
        let waited = now.saturating_duration_since(pending.issued);
        let response_id = pending.response_id;

        self.playout.retain(|f| !f.belongs_to(&response_id));
        self.transition(InterruptionState::Idle);
        self.promote_queued();

        TruncateResolution {
            response_id,
            timed_out,
            waited,
        }
    }

    fn open_window(&mut self, window: SpeakingWindow) {
        let response_id = window.audio.response_id.clone();
        self.open = Some(window);
        self.transition(InterruptionState::AiSpeaking(response_id));
    }

    fn close_window(&mut self) {
        if let Some(window) = self.open.take() {
            debug!(
                response_id = %window.audio.response_id,
                frames = window.forwarded_frames,
                "Response playout finished"
            );
        }
        self.transition(InterruptionState::Idle);
    }

    fn has_window(&self, response_id: &ResponseId) -> bool {
        self.open
            .iter()
            .chain(self.queued.iter())
            .any(|w| &w.audio.response_id == response_id)
    }

    /// Drop a head frame whose response no longer has a window
    fn drop_orphaned_head(&mut self) -> bool {
        let orphaned = self
            .playout
            .front()
            .is_some_and(|f| f.response_id().map_or(true, |r| !self.has_window(r)));
        if orphaned {
            if let Some(frame) = self.playout.pop_front() {
                debug!(response_id = ?frame.response_id(), "Dropping frame of a finished response");
            }
        }
        orphaned
    }

    fn promote_queued(&mut self) -> bool {
        if !matches!(self.state, InterruptionState::Idle) {
            return false;
        }
        match self.queued.pop_front() {
            Some(window) => {
                self.open_window(window);
                true
            }
            None => false,
        }
    }

    fn transition(&mut self, next: InterruptionState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "Interruption state change");
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::audio::AudioFormat;
    use bytes::Bytes;

    fn audio(response: &str) -> ResponseAudio {
        ResponseAudio::new(ResponseId::new(response), ItemId::new(format!("item_{}", response)), 0)
    }

    fn frames(response: &str, count: usize) -> Vec<AudioFrame> {
        (0..count)
            .map(|i| {
                AudioFrame::outbound(
                    Bytes::from(vec![0xFF; 160]),
                    AudioFormat::MULAW_8K,
                    i as u64,
                    ResponseId::new(response),
                )
            })
            .collect()
    }

    fn controller() -> InterruptionController {
        InterruptionController::new(Duration::from_secs(2))
    }

    fn forward(controller: &mut InterruptionController, ticks: usize) -> usize {
        (0..ticks).filter_map(|_| controller.next_frame()).count()
    }

    #[test]
    fn test_first_audio_opens_window() {
        let mut c = controller();
        assert_eq!(c.on_audio(&audio("r1"), frames("r1", 3)), AudioDisposition::Queued(3));
        assert_eq!(c.state(), &InterruptionState::AiSpeaking(ResponseId::new("r1")));
    }

    #[test]
    fn test_barge_in_offset_counts_forwarded_audio_only() {
        let mut c = controller();
        c.on_audio(&audio("r1"), frames("r1", 40));
        assert_eq!(forward(&mut c, 15), 15);

        let now = Instant::now();
        let interruption = c.on_speech_started(now).unwrap();
        assert_eq!(interruption.marker.audio_end_ms, 300);
        assert_eq!(interruption.marker.forwarded_frames, 15);
        assert_eq!(interruption.marker.item_id, ItemId::new("item_r1"));
        assert!(interruption.marker.cancel_generation);
        assert_eq!(interruption.discarded_frames, 25);
        assert_eq!(interruption.discarded, Duration::from_millis(500));

        assert_eq!(c.state(), &InterruptionState::Truncating(ResponseId::new("r1")));
        assert_eq!(c.buffered_frames(), 0);
        assert!(c.next_frame().is_none());
        assert_eq!(c.truncate_deadline(), Some(now + Duration::from_secs(2)));
    }

    #[test]
    fn test_second_signal_while_truncating_is_noop() {
        let mut c = controller();
        c.on_audio(&audio("r1"), frames("r1", 10));
        forward(&mut c, 2);

        assert!(c.on_speech_started(Instant::now()).is_some());
        assert!(c.on_speech_started(Instant::now()).is_none());
        assert!(c.on_speech_started(Instant::now()).is_none());
    }

    #[test]
    fn test_late_audio_for_truncated_response_is_dropped() {
        let mut c = controller();
        c.on_audio(&audio("r1"), frames("r1", 4));
        forward(&mut c, 1);
        c.on_speech_started(Instant::now()).unwrap();

        assert_eq!(c.on_audio(&audio("r1"), frames("r1", 5)), AudioDisposition::Dropped(5));
        c.on_truncate_ack(&ItemId::new("item_r1"), Instant::now()).unwrap();
        assert_eq!(c.on_audio(&audio("r1"), frames("r1", 5)), AudioDisposition::Dropped(5));
        assert!(c.next_frame().is_none());
        assert_eq!(c.state(), &InterruptionState::Idle);
    }

    #[test]
    fn test_ack_returns_to_idle() {
        let mut c = controller();
        c.on_audio(&audio("r1"), frames("r1", 4));
        forward(&mut c, 2);
        let issued = Instant::now();
        c.on_speech_started(issued).unwrap();

        assert!(c.on_truncate_ack(&ItemId::new("other"), issued).is_none());
        let resolution = c
            .on_truncate_ack(&ItemId::new("item_r1"), issued + Duration::from_millis(150))
            .unwrap();
        assert!(!resolution.timed_out);
        assert_eq!(resolution.waited, Duration::from_millis(150));
        assert_eq!(c.state(), &InterruptionState::Idle);
        assert!(c.truncate_deadline().is_none());
    }

    #[test]
    fn test_ack_timeout_forces_idle() {
        let mut c = controller();
        c.on_audio(&audio("r1"), frames("r1", 4));
        forward(&mut c, 1);
        let issued = Instant::now();
        c.on_speech_started(issued).unwrap();

        assert!(c.on_truncate_timeout(issued + Duration::from_millis(1999)).is_none());
        let resolution = c.on_truncate_timeout(issued + Duration::from_secs(2)).unwrap();
        assert!(resolution.timed_out);
        assert_eq!(resolution.response_id, ResponseId::new("r1"));
        assert_eq!(c.state(), &InterruptionState::Idle);
    }

    #[test]
    fn test_response_done_closes_window_after_last_frame() {
        let mut c = controller();
        c.on_audio(&audio("r1"), frames("r1", 2));
        assert!(c.on_response_done(&ResponseId::new("r1")));
        assert_eq!(c.state(), &InterruptionState::AiSpeaking(ResponseId::new("r1")));

        assert_eq!(forward(&mut c, 2), 2);
        assert!(c.next_frame().is_none());
        assert_eq!(c.state(), &InterruptionState::Idle);
    }

    #[test]
    fn test_barge_in_after_generation_done_skips_cancel() {
        let mut c = controller();
        c.on_audio(&audio("r1"), frames("r1", 5));
        c.on_response_done(&ResponseId::new("r1"));
        forward(&mut c, 3);

        let interruption = c.on_speech_started(Instant::now()).unwrap();
        assert!(!interruption.marker.cancel_generation);
        assert_eq!(interruption.marker.audio_end_ms, 60);
    }

    #[test]
    fn test_queued_response_opens_after_previous_finishes() {
        let mut c = controller();
        c.on_audio(&audio("r1"), frames("r1", 2));
        c.on_audio(&audio("r2"), frames("r2", 2));
        c.on_response_done(&ResponseId::new("r1"));

        assert!(c.next_frame().unwrap().belongs_to(&ResponseId::new("r1")));
        assert!(c.next_frame().unwrap().belongs_to(&ResponseId::new("r1")));
        let third = c.next_frame().unwrap();
        assert!(third.belongs_to(&ResponseId::new("r2")));
        assert_eq!(c.state(), &InterruptionState::AiSpeaking(ResponseId::new("r2")));
        assert_eq!(c.forwarded_frames(), 1);
    }

    #[test]
    fn test_interleaved_deltas_do_not_stall_playout() {
        let mut c = controller();
        c.on_audio(&audio("r1"), frames("r1", 2));
        c.on_audio(&audio("r2"), frames("r2", 1));
        c.on_audio(&audio("r1"), frames("r1", 1));
        c.on_response_done(&ResponseId::new("r1"));
        c.on_response_done(&ResponseId::new("r2"));

        assert_eq!(forward(&mut c, 3), 3);
        assert!(c.next_frame().is_none());
        assert_eq!(c.buffered_frames(), 0);
        assert_eq!(c.state(), &InterruptionState::Idle);

        c.on_audio(&audio("r3"), frames("r3", 2));
        assert!(c.next_frame().unwrap().belongs_to(&ResponseId::new("r3")));
        assert!(c.next_frame().unwrap().belongs_to(&ResponseId::new("r3")));
    }

    #[test]
    fn test_barge_in_discards_queued_responses() {
        let mut c = controller();
        c.on_audio(&audio("r1"), frames("r1", 3));
        c.on_audio(&audio("r2"), frames("r2", 3));
        forward(&mut c, 1);

        let interruption = c.on_speech_started(Instant::now()).unwrap();
        assert_eq!(interruption.discarded_frames, 5);
        assert!(c.is_truncated(&ResponseId::new("r2")));
        assert_eq!(c.on_audio(&audio("r2"), frames("r2", 1)), AudioDisposition::Dropped(1));
    }

    #[test]
    fn test_speech_without_response() {
        let mut c = controller();
        assert!(c.on_speech_started(Instant::now()).is_none());
        assert_eq!(c.state(), &InterruptionState::UserSpeaking);
        c.on_speech_stopped();
        assert_eq!(c.state(), &InterruptionState::Idle);
    }

    #[test]
    fn test_zero_length_frames_never_count() {
        let mut c = controller();
        let empty = AudioFrame::outbound(
            Bytes::new(),
            AudioFormat::MULAW_8K,
            0,
            ResponseId::new("r1"),
        );
        assert_eq!(c.on_audio(&audio("r1"), vec![empty]), AudioDisposition::Ignored);
        assert_eq!(c.state(), &InterruptionState::Idle);
        assert!(c.next_frame().is_none());
    }

    #[test]
    fn test_offset_never_exceeds_forwarded() {
        for forwarded in 0..12 {
            let mut c = controller();
            c.on_audio(&audio("r1"), frames("r1", 10));
            let sent = forward(&mut c, forwarded);
            let marker = c.on_speech_started(Instant::now()).unwrap().marker;
            assert_eq!(marker.forwarded_frames as usize, sent);
            assert!(marker.audio_end_ms as usize <= sent * 20);
        }
    }
}
