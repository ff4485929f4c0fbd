//! Media processing implementations

pub mod codec;
pub mod relay;

pub use codec::{Downsampler, G711Law, Upsampler};
pub use relay::FrameRelay;
