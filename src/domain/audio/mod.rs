//! Audio value objects shared by both sides of the relay

pub mod format;
pub mod frame;

pub use format::{AudioEncoding, AudioFormat, RealtimeAudioFormat};
pub use frame::{AudioFrame, FrameDirection};
