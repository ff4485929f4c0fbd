//! Interface layer - External interfaces
//!
//! This layer handles:
//! - The telephony media stream WebSocket endpoint
//! - Operational REST endpoints and Prometheus metrics
//! - Request/response formatting

pub mod api;
