//! Barge-in handling: playout window tracking and truncate markers

pub mod controller;
pub mod marker;
pub mod state;

pub use controller::InterruptionController;
pub use marker::{Interruption, InterruptionMarker, TruncateResolution};
pub use state::{AudioDisposition, InterruptionState, ResponseAudio};
