//! Call session use cases

pub mod manager;
pub mod metrics;
pub mod registry;

pub use manager::{CallSessionManager, SessionOutcome};
pub use registry::{ActiveCall, CallRegistry};
