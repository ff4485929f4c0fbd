//! Shared kernel - Common types used across the relay

pub mod error;
pub mod events;
pub mod result;
pub mod value_objects;

pub use error::RelayError;
pub use events::RecordedEvent;
pub use result::Result;
pub use value_objects::*;
