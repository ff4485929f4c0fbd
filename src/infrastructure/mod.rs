//! Infrastructure layer - Technical implementations
//!
//! This layer contains:
//! - Audio codecs and the frame relay
//! - Socket adapters for the telephony and realtime sides
//! - Persistence sinks and the background writer

pub mod media;
pub mod persistence;
pub mod protocols;
