//! API interface implementations

pub mod calls_handler;
pub mod dto;
pub mod media_stream;
pub mod metrics_handler;
pub mod router;
pub mod state;

pub use metrics_handler::{init_metrics, standalone_handle};
pub use router::build_router;
pub use state::AppState;
