//! Huddle signaling relay library.
//!
//! Exposes the relay server for use in tests and embedding. The relay
//! accepts WebSocket connections, tracks room membership, and routes
//! negotiation and presence events between browser clients. It never sees
//! media.

pub mod config;
pub mod registry;
pub mod relay;
pub mod router;
