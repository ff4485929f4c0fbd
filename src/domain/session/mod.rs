//! Call session bounded context - one bridged call's lifecycle and transcript

pub mod aggregate;
pub mod event;
pub mod transcript;
pub mod value_object;

pub use aggregate::CallSession;
pub use event::SessionEvent;
pub use transcript::TranscriptEvent;
pub use value_object::{EndReason, SessionState, Speaker};
