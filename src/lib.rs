//! CallRelay - Telephony media stream to realtime voice AI relay
//!
//! A Domain-Driven Design (DDD) implementation of a per-call relay between a
//! telephony provider's media WebSocket and a realtime voice service, with
//! barge-in handling and transcript persistence.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;

// Re-export commonly used types
pub use domain::shared::error::RelayError;
pub use domain::shared::result::Result;
