//! Transport-safe encoding of raw TCP bytes for [`crate::Forward::Data`].

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

/// Encodes raw bytes for transport inside a `data` frame.
pub fn encode(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decodes the payload of a `data` frame back into raw bytes.
pub fn decode(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64.decode(payload)
}
