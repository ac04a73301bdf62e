//! Framing: one JSON object per message, individually size-bounded.
//!
//! The control channel transport (WebSocket text frames in the relay/agent
//! binaries) hands us whole messages already; this module only owns the
//! JSON encode/decode step and the size-limit check described in spec
//! §4.1. A decode error or an oversize frame is always a
//! [`CodecError::ProtocolViolation`]-class failure: fatal to the whole
//! control channel, never to a single session.

use crate::message::Message;
use thiserror::Error;

/// Default per-message size bound (1 MiB), per spec §4.1.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Encodes a [`Message`] to its wire representation, enforcing the size
/// bound before handing bytes to the transport.
pub fn encode(msg: &Message, max_frame_size: usize) -> Result<String, CodecError> {
    let text = serde_json::to_string(msg)?;
    if text.len() > max_frame_size {
        return Err(CodecError::FrameTooLarge {
            size: text.len(),
            limit: max_frame_size,
        });
    }
    Ok(text)
}

/// Decodes a wire frame into a [`Message`], enforcing the size bound first
/// so an oversize frame never reaches the JSON parser.
pub fn decode(text: &str, max_frame_size: usize) -> Result<Message, CodecError> {
    if text.len() > max_frame_size {
        return Err(CodecError::FrameTooLarge {
            size: text.len(),
            limit: max_frame_size,
        });
    }
    Ok(serde_json::from_str(text)?)
}
