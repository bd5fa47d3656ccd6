//! Best-effort payload decoding.
//!
//! A body that parses as JSON becomes [`DecodedPayload::Structured`];
//! anything else, including bytes that are not valid UTF-8, falls back to
//! [`DecodedPayload::Raw`]. Decoding never fails.

use crate::message::DecodedPayload;

/// Stateless decoder for change-event bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadDecoder;

impl PayloadDecoder {
    pub fn new() -> Self {
        Self
    }

    pub fn decode(&self, raw: &[u8]) -> DecodedPayload {
        decode(raw)
    }
}

/// Decode a raw message body.
///
/// Invalid UTF-8 sequences in the raw fallback are replaced with U+FFFD.
pub fn decode(raw: &[u8]) -> DecodedPayload {
    match std::str::from_utf8(raw) {
        Ok(text) => match serde_json::from_str(text) {
            Ok(value) => DecodedPayload::Structured(value),
            Err(_) => DecodedPayload::Raw(text.to_string()),
        },
        Err(_) => DecodedPayload::Raw(String::from_utf8_lossy(raw).into_owned()),
    }
}
