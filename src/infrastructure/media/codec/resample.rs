//! Integer-ratio resampling and PCM16 byte packing
//!
//! Both resamplers keep state between calls so a stream split into arbitrary
//! chunks produces the same samples as the unsplit stream.

use bytes::{BufMut, Bytes, BytesMut};

/// Linear-interpolation upsampler (e.g. 8 kHz → 24 kHz with factor 3)
#[derive(Debug, Clone)]
pub struct Upsampler {
    factor: usize,
    last: Option<i16>,
}

impl Upsampler {
    pub fn new(factor: usize) -> Self {
        Self {
            factor: factor.max(1),
            last: None,
        }
    }

    /// Emits `factor` samples per input sample, interpolated from the
    /// previous input sample (carried across calls).
    pub fn process(&mut self, input: &[i16]) -> Vec<i16> {
        let mut output = Vec::with_capacity(input.len() * self.factor);
        let factor = self.factor as i32;

        for &sample in input {
            let prev = self.last.unwrap_or(sample) as i32;
            let delta = sample as i32 - prev;
            for step in 1..=factor {
                output.push((prev + delta * step / factor) as i16);
            }
            self.last = Some(sample);
        }

        output
    }
}

/// Averaging decimator (e.g. 24 kHz → 8 kHz with factor 3)
#[derive(Debug, Clone)]
pub struct Downsampler {
    factor: usize,
    pending: Vec<i16>,
}

impl Downsampler {
    pub fn new(factor: usize) -> Self {
        let factor = factor.max(1);
        Self {
            factor,
            pending: Vec::with_capacity(factor),
        }
    }

    /// One output sample per complete group of `factor` inputs; an
    /// incomplete trailing group waits for the next call.
    pub fn process(&mut self, input: &[i16]) -> Vec<i16> {
        let mut output = Vec::with_capacity((self.pending.len() + input.len()) / self.factor);

        for &sample in input {
            self.pending.push(sample);
            if self.pending.len() == self.factor {
                output.push(average(&self.pending));
                self.pending.clear();
            }
        }

        output
    }

    /// Average of the incomplete group, if any
    pub fn flush(&mut self) -> Option<i16> {
        if self.pending.is_empty() {
            return None;
        }
        let sample = average(&self.pending);
        self.pending.clear();
        Some(sample)
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

fn average(samples: &[i16]) -> i16 {
    let sum: i32 = samples.iter().map(|&s| s as i32).sum();
    (sum / samples.len() as i32) as i16
}

/// Little-endian PCM16 bytes to samples. A trailing odd byte is ignored.
pub fn pcm16_from_le(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Samples to little-endian PCM16 bytes
pub fn pcm16_to_le(samples: &[i16]) -> Bytes {
    let mut output = BytesMut::with_capacity(samples.len() * 2);
    for &sample in samples {
        output.put_i16_le(sample);
    }
    output.freeze()
}
