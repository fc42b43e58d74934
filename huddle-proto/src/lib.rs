//! Shared protocol definitions for the Huddle signaling wire format.

pub mod codec;
pub mod id;
pub mod signal;
