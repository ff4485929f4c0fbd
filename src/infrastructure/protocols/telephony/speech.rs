//! Energy-based caller speech detection
//!
//! A lightweight alternative to the realtime service's own turn detection.
//! Frames whose RMS exceeds the threshold count as speech; a transition is
//! reported only after the minimum speech or silence run has accumulated.

use crate::config::SpeechDetectionConfig;
use std::time::Duration;
use tracing::debug;

/// Edge reported by the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechTransition {
    Started,
    Stopped,
}

pub struct SpeechDetector {
    threshold: f32,
    min_speech: Duration,
    min_silence: Duration,
    speaking: bool,
    run: Duration,
}

impl SpeechDetector {
    pub fn new(config: &SpeechDetectionConfig) -> Self {
        Self {
            threshold: config.energy_threshold,
            min_speech: Duration::from_millis(config.min_speech_ms as u64),
            min_silence: Duration::from_millis(config.min_silence_ms as u64),
            speaking: false,
            run: Duration::ZERO,
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Feed one frame of decoded samples lasting `duration`
    pub fn process(&mut self, samples: &[i16], duration: Duration) -> Option<SpeechTransition> {
        if samples.is_empty() {
            return None;
        }

        let loud = rms(samples) >= self.threshold;
        if loud == self.speaking {
            self.run = Duration::ZERO;
            return None;
        }

        self.run += duration;
        let needed = if self.speaking {
            self.min_silence
        } else {
            self.min_speech
        };
        if self.run < needed {
            return None;
        }

        self.speaking = loud;
        self.run = Duration::ZERO;
        let transition = if loud {
            SpeechTransition::Started
        } else {
            SpeechTransition::Stopped
        };
        debug!(?transition, "Local speech detector transition");
        Some(transition)
    }
}

fn rms(samples: &[i16]) -> f32 {
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}
