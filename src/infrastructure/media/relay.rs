//! Audio frame relay
//!
//! Converts audio between the telephony representation (G.711 at 8 kHz,
//! 20 ms frames) and whatever the realtime service was configured with.
//! Inbound conversion is one frame in, one frame out. Outbound deltas arrive
//! in arbitrary sizes and are re-chunked into whole telephony frames; the
//! sub-frame remainder stays buffered until more audio, a response change,
//! an explicit flush, or a discard.

use super::codec::{pcm16_from_le, pcm16_to_le, Downsampler, G711Law, Upsampler};
use crate::domain::audio::{AudioEncoding, AudioFormat, AudioFrame};
use crate::domain::shared::error::RelayError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::ResponseId;
use bytes::{Bytes, BytesMut};
use tracing::debug;

pub struct FrameRelay {
    telephony: AudioFormat,
    telephony_law: G711Law,
    realtime: AudioFormat,
    frame_bytes: usize,
    upsampler: Upsampler,
    downsampler: Downsampler,
    /// Odd trailing byte of a PCM16 delta
    dangling: Option<u8>,
    /// Telephony-encoded audio short of a whole frame
    pending: BytesMut,
    current_response: Option<ResponseId>,
    inbound_sequence: u64,
    outbound_sequence: u64,
}

impl FrameRelay {
    pub fn new(telephony: AudioFormat, realtime: AudioFormat, frame_ms: u32) -> Result<Self> {
        let telephony_law = G711Law::for_encoding(telephony.encoding).ok_or_else(|| {
            RelayError::Configuration(format!("Telephony audio must be G.711, got {}", telephony))
        })?;

        if realtime.sample_rate % telephony.sample_rate != 0 {
            return Err(RelayError::Configuration(format!(
                "Cannot relay {} to {}: rates are not an integer ratio",
                telephony, realtime
            )));
        }
        let factor = (realtime.sample_rate / telephony.sample_rate) as usize;
        if realtime.encoding != AudioEncoding::Pcm16 && factor != 1 {
            return Err(RelayError::Configuration(format!(
                "Realtime G.711 audio must be 8 kHz, got {}",
                realtime
            )));
        }

        let frame_bytes = telephony.frame_bytes(frame_ms);
        if frame_bytes == 0 {
            return Err(RelayError::Configuration(format!(
                "Frame interval of {} ms is too short",
                frame_ms
            )));
        }

        Ok(Self {
            telephony,
            telephony_law,
            realtime,
            frame_bytes,
            upsampler: Upsampler::new(factor),
            downsampler: Downsampler::new(factor),
            dangling: None,
            pending: BytesMut::with_capacity(frame_bytes * 2),
            current_response: None,
            inbound_sequence: 0,
            outbound_sequence: 0,
        })
    }

    /// Bytes waiting for a whole outbound frame
    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    /// Convert one caller frame for the realtime service.
    ///
    /// Zero-length frames yield nothing and do not consume a sequence number.
    pub fn inbound(&mut self, frame: &AudioFrame) -> Option<AudioFrame> {
        if frame.is_empty() {
            return None;
        }

        let payload = match G711Law::for_encoding(self.realtime.encoding) {
            Some(target) => self.telephony_law.transcode(target, frame.payload()),
            None => {
                let pcm = self.telephony_law.decode(frame.payload());
                pcm16_to_le(&self.upsampler.process(&pcm))
            }
        };

        self.inbound_sequence += 1;
        Some(AudioFrame::inbound(payload, self.realtime, self.inbound_sequence))
    }

    /// Convert an assistant audio delta into whole telephony frames.
    ///
    /// Audio left over from a different, earlier response is flushed first so
    /// a frame never carries two responses.
    pub fn outbound(&mut self, response_id: &ResponseId, payload: &[u8]) -> Vec<AudioFrame> {
        let mut frames = Vec::new();

        if self.current_response.as_ref() != Some(response_id) {
            frames.extend(self.flush_outbound());
            self.current_response = Some(response_id.clone());
        }

        let encoded = self.to_telephony(payload);
        self.pending.extend_from_slice(&encoded);

        while self.pending.len() >= self.frame_bytes {
            let chunk = self.pending.split_to(self.frame_bytes).freeze();
            frames.push(self.outbound_frame(chunk, response_id.clone()));
        }

        frames
    }

    /// Emit the buffered remainder of the current response as a short frame
    pub fn flush_outbound(&mut self) -> Option<AudioFrame> {
        let Some(response_id) = self.current_response.take() else {
            self.discard_outbound();
            return None;
        };

        self.dangling = None;
        if let Some(sample) = self.downsampler.flush() {
            self.pending
                .extend_from_slice(&[self.telephony_law.encode_sample(sample)]);
        }
        if self.pending.is_empty() {
            return None;
        }

        let chunk = self.pending.split().freeze();
        debug!(response_id = %response_id, bytes = chunk.len(), "Flushed partial outbound frame");
        Some(self.outbound_frame(chunk, response_id))
    }

    /// Throw away everything buffered for the current response.
    ///
    /// Returns the number of telephony bytes dropped.
    pub fn discard_outbound(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        self.dangling = None;
        self.downsampler.reset();
        self.current_response = None;
        dropped
    }

    fn to_telephony(&mut self, payload: &[u8]) -> Bytes {
        match G711Law::for_encoding(self.realtime.encoding) {
            Some(source) => source.transcode(self.telephony_law, payload),
            None => {
                let mut joined = Vec::with_capacity(payload.len() + 1);
                joined.extend(self.dangling.take());
                joined.extend_from_slice(payload);
                if joined.len() % 2 == 1 {
                    self.dangling = joined.pop();
                }

                let pcm = pcm16_from_le(&joined);
                self.telephony_law.encode(&self.downsampler.process(&pcm))
            }
        }
    }

    fn outbound_frame(&mut self, payload: Bytes, response_id: ResponseId) -> AudioFrame {
        self.outbound_sequence += 1;
        AudioFrame::outbound(payload, self.telephony, self.outbound_sequence, response_id)
    }
}
