//! Domain layer - Core relay logic and rules
//!
//! This layer contains:
//! - Aggregates: the call session and its transcript
//! - Value Objects: audio formats, frames, identifiers
//! - Domain Services: the interruption controller
//! - Ports: the persistence sink

pub mod audio;
pub mod interruption;
pub mod persistence;
pub mod session;
pub mod shared;

// Re-export commonly used types
pub use shared::{RelayError, Result};
