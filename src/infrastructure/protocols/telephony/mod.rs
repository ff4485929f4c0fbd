//! Telephony media stream side

pub mod adapter;
pub mod message;
pub mod speech;

pub use adapter::{TelephonyAdapter, TelephonyCommand, TelephonyHandshake};
pub use speech::{SpeechDetector, SpeechTransition};
