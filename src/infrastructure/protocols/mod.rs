//! Socket adapters for the two sides of a relayed call

pub mod realtime;
pub mod telephony;
pub mod wire;

pub use wire::{AdapterHandle, WireChannel, WireFrame, WirePeer, WireSink, WireStream};
