//! Audio codec implementations

pub mod g711;
pub mod resample;

pub use g711::G711Law;
pub use resample::{pcm16_from_le, pcm16_to_le, Downsampler, Upsampler};
