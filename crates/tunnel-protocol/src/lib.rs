//! Wire protocol for the tunnel control channel: frame types, JSON codec,
//! and the base64 payload encoding for `data` frames.

pub mod codec;
pub mod message;
pub mod payload;

pub use codec::{CodecError, DEFAULT_MAX_FRAME_SIZE};
pub use message::{Forward, Message};
