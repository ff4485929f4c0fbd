//! Audio format value objects

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Sample encoding of an audio payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioEncoding {
    /// G.711 μ-law, one byte per sample
    MuLaw,
    /// G.711 A-law, one byte per sample
    ALaw,
    /// Signed 16-bit little-endian PCM
    Pcm16,
}

impl AudioEncoding {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            AudioEncoding::MuLaw | AudioEncoding::ALaw => 1,
            AudioEncoding::Pcm16 => 2,
        }
    }
}

/// Encoding plus sample rate (always mono)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub encoding: AudioEncoding,
    pub sample_rate: u32,
}

impl AudioFormat {
    pub const MULAW_8K: AudioFormat = AudioFormat {
        encoding: AudioEncoding::MuLaw,
        sample_rate: 8000,
    };
    pub const ALAW_8K: AudioFormat = AudioFormat {
        encoding: AudioEncoding::ALaw,
        sample_rate: 8000,
    };
    pub const PCM16_24K: AudioFormat = AudioFormat {
        encoding: AudioEncoding::Pcm16,
        sample_rate: 24000,
    };

    /// Parse the telephony `mediaFormat` description
    pub fn from_telephony(encoding: &str, sample_rate: u32, channels: u32) -> Option<Self> {
        if channels != 1 || sample_rate != 8000 {
            return None;
        }
        match encoding {
            "audio/x-mulaw" => Some(Self::MULAW_8K),
            "audio/x-alaw" => Some(Self::ALAW_8K),
            _ => None,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.encoding.bytes_per_sample()
    }

    /// Number of whole samples in a payload of `len` bytes
    pub fn samples_in(&self, len: usize) -> usize {
        len / self.bytes_per_sample()
    }

    /// Samples covering `frame_ms` milliseconds
    pub fn samples_per_frame(&self, frame_ms: u32) -> usize {
        (self.sample_rate as usize * frame_ms as usize) / 1000
    }

    /// Payload size of one `frame_ms` frame
    pub fn frame_bytes(&self, frame_ms: u32) -> usize {
        self.samples_per_frame(frame_ms) * self.bytes_per_sample()
    }

    /// Playback duration of `samples` samples
    pub fn duration_of(&self, samples: usize) -> Duration {
        Duration::from_micros(samples as u64 * 1_000_000 / self.sample_rate as u64)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}@{}Hz", self.encoding, self.sample_rate)
    }
}

/// Audio format names understood by the realtime voice service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RealtimeAudioFormat {
    G711Ulaw,
    G711Alaw,
    Pcm16,
}

impl RealtimeAudioFormat {
    pub fn format(&self) -> AudioFormat {
        match self {
            RealtimeAudioFormat::G711Ulaw => AudioFormat::MULAW_8K,
            RealtimeAudioFormat::G711Alaw => AudioFormat::ALAW_8K,
            RealtimeAudioFormat::Pcm16 => AudioFormat::PCM16_24K,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RealtimeAudioFormat::G711Ulaw => "g711_ulaw",
            RealtimeAudioFormat::G711Alaw => "g711_alaw",
            RealtimeAudioFormat::Pcm16 => "pcm16",
        }
    }
}
