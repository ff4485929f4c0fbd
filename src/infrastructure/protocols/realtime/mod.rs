//! Realtime voice service side

pub mod adapter;
pub mod connector;
pub mod message;

pub use adapter::{RealtimeAdapter, RealtimeCommand, RealtimeHandshake};
pub use connector::{InMemoryConnector, RealtimeConnector, TungsteniteConnector};
