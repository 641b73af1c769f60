//! Wire codec.
//!
//! Envelopes travel as JSON text. Anything that does not parse as an
//! envelope is read as a bare event name, so the simplest commands can be
//! sent as plain strings.

use crate::Envelope;

/// Error encoding an envelope.
#[derive(Debug, thiserror::Error)]
#[error("failed to encode envelope: {0}")]
pub struct CodecError(#[from] serde_json::Error);

/// Serialize an envelope to its wire form.
pub fn encode(envelope: &Envelope) -> Result<String, CodecError> {
    Ok(serde_json::to_string(envelope)?)
}

/// Parse a wire payload. Never fails.
pub fn decode(raw: &str) -> Envelope {
    match serde_json::from_str::<Envelope>(raw) {
        Ok(envelope) => envelope,
        Err(_) => Envelope::new(raw),
    }
}
