//! Message encoding and decoding for network transport.
//!
//! # Wire Format
//!
//! ```text
//! [version: u8][payload: SBOR-encoded ConsensusMessage]
//! ```
//!
//! The invalid-signers payload nested inside an envelope is itself an
//! SBOR-encoded `Vec<ConsensusMessage>` holding the original signed
//! envelopes of the offending positions.

use crate::ConsensusMessage;
use thiserror::Error;

/// Current wire format version.
pub const WIRE_VERSION: u8 = 1;

/// Errors that can occur during message encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Unknown wire version: {0}")]
    UnknownVersion(u8),

    #[error("Message too short")]
    MessageTooShort,

    #[error("SBOR decode error: {0}")]
    SborDecode(String),

    #[error("SBOR encode error: {0}")]
    SborEncode(String),
}

/// Encode a consensus message to wire format.
pub fn encode_message(message: &ConsensusMessage) -> Result<Vec<u8>, CodecError> {
    let payload =
        sbor::basic_encode(message).map_err(|e| CodecError::SborEncode(format!("{e:?}")))?;

    let mut bytes = Vec::with_capacity(1 + payload.len());
    bytes.push(WIRE_VERSION);
    bytes.extend(payload);
    Ok(bytes)
}

/// Decode a consensus message from wire format.
pub fn decode_message(data: &[u8]) -> Result<ConsensusMessage, CodecError> {
    if data.is_empty() {
        return Err(CodecError::MessageTooShort);
    }
    let version = data[0];
    if version != WIRE_VERSION {
        return Err(CodecError::UnknownVersion(version));
    }
    sbor::basic_decode(&data[1..]).map_err(|e| CodecError::SborDecode(format!("{e:?}")))
}

/// Encode the invalid-signers payload: the original envelopes of the
/// positions whose shares failed verification.
pub fn encode_invalid_signers_payload(
    envelopes: &[ConsensusMessage],
) -> Result<Vec<u8>, CodecError> {
    sbor::basic_encode(&envelopes.to_vec()).map_err(|e| CodecError::SborEncode(format!("{e:?}")))
}

/// Decode the invalid-signers payload.
pub fn decode_invalid_signers_payload(data: &[u8]) -> Result<Vec<ConsensusMessage>, CodecError> {
    sbor::basic_decode(data).map_err(|e| CodecError::SborDecode(format!("{e:?}")))
}
