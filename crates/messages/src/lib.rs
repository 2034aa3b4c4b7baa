//! Network messages for the consensus protocol.

mod codec;
mod envelope;

pub use codec::{
    decode_invalid_signers_payload, decode_message, encode_invalid_signers_payload,
    encode_message, CodecError, WIRE_VERSION,
};
pub use envelope::{ConsensusMessage, MessageType};
