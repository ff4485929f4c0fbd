//! Application layer - Use cases and application services
//!
//! This layer orchestrates domain objects to fulfill use cases:
//! - Running a relayed call from handshake to persisted record
//! - Tracking active calls for the operational API and shutdown

pub mod session;

pub use session::{ActiveCall, CallRegistry, CallSessionManager, SessionOutcome};
