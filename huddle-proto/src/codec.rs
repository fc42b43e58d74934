//! JSON text codec for signaling frames.
//!
//! Frames are carried as WebSocket text messages, one event per frame.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::signal::{ClientEvent, ServerEvent};

/// Default upper bound for a single inbound frame, in bytes (64 KB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The frame is not valid JSON or does not match any known event.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The frame exceeds the configured size limit.
    #[error("frame too large: {size} bytes (max {max})")]
    TooLarge {
        /// Size of the rejected frame.
        size: usize,
        /// Configured limit.
        max: usize,
    },
}

/// Serializes any signaling event into a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] if the value cannot be serialized.
pub fn encode<T: Serialize>(event: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string(event)?)
}

/// Deserializes a JSON text frame into a signaling event.
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] if the text is not a well-formed event.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Decodes a client frame, rejecting it first if it exceeds `max_size` bytes.
///
/// # Errors
///
/// Returns [`CodecError::TooLarge`] for oversized frames and
/// [`CodecError::Malformed`] for frames that do not parse.
pub fn decode_client(text: &str, max_size: usize) -> Result<ClientEvent, CodecError> {
    if text.len() > max_size {
        return Err(CodecError::TooLarge {
            size: text.len(),
            max: max_size,
        });
    }
    decode(text)
}

/// Encodes a relay event for transmission to a client.
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] if the event cannot be serialized.
pub fn encode_server(event: &ServerEvent) -> Result<String, CodecError> {
    encode(event)
}
