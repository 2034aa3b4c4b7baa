//! The consensus message envelope.
//!
//! One envelope shape carries every consensus message type; which fields
//! are populated depends on the type. The message type travels as a raw
//! integer so that peers running newer protocol versions degrade to
//! `Unknown` instead of failing to decode.

use rondel_types::{Hash, RoundIndex};
use sbor::prelude::*;
use std::fmt;

/// Consensus message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Block body and header in one message (leader broadcast).
    BlockBodyAndHeader,
    /// Block body alone.
    BlockBody,
    /// Block header alone.
    BlockHeader,
    /// BLS signature share.
    Signature,
    /// End-of-round final info (bitmap + aggregate + leader signature).
    FinalInfo,
    /// Envelopes of signers whose shares failed verification.
    InvalidSigners,
    /// Anything this version does not understand.
    Unknown,
}

impl MessageType {
    /// Wire integer for this type.
    pub fn as_wire(self) -> i32 {
        match self {
            MessageType::BlockBodyAndHeader => 0,
            MessageType::BlockBody => 1,
            MessageType::BlockHeader => 2,
            MessageType::Signature => 3,
            MessageType::FinalInfo => 4,
            MessageType::InvalidSigners => 5,
            MessageType::Unknown => -1,
        }
    }

    /// Map a wire integer to a type. Unknown integers map to `Unknown`.
    pub fn from_wire(value: i32) -> Self {
        match value {
            0 => MessageType::BlockBodyAndHeader,
            1 => MessageType::BlockBody,
            2 => MessageType::BlockHeader,
            3 => MessageType::Signature,
            4 => MessageType::FinalInfo,
            5 => MessageType::InvalidSigners,
            _ => MessageType::Unknown,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::BlockBodyAndHeader => write!(f, "(BLOCK_BODY_AND_HEADER)"),
            MessageType::BlockBody => write!(f, "(BLOCK_BODY)"),
            MessageType::BlockHeader => write!(f, "(BLOCK_HEADER)"),
            MessageType::Signature => write!(f, "(SIGNATURE)"),
            MessageType::FinalInfo => write!(f, "(FINAL_INFO)"),
            MessageType::Unknown => write!(f, "(UNKNOWN)"),
            _ => write!(f, "Undefined message type"),
        }
    }
}

impl std::str::FromStr for MessageType {
    type Err = std::convert::Infallible;

    /// Unknown literal strings map to `Unknown`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "(BLOCK_BODY_AND_HEADER)" => MessageType::BlockBodyAndHeader,
            "(BLOCK_BODY)" => MessageType::BlockBody,
            "(BLOCK_HEADER)" => MessageType::BlockHeader,
            "(SIGNATURE)" => MessageType::Signature,
            "(FINAL_INFO)" => MessageType::FinalInfo,
            _ => MessageType::Unknown,
        })
    }
}

/// The consensus message envelope.
///
/// Empty `Vec` stands for an absent field.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct ConsensusMessage {
    /// Identifier of the block proposed this round.
    pub data_hash: Vec<u8>,
    /// Serialized header (BLOCK_HEADER / BLOCK_BODY_AND_HEADER).
    pub header: Vec<u8>,
    /// Serialized body (BLOCK_BODY / BLOCK_BODY_AND_HEADER).
    pub body: Vec<u8>,
    /// BLS signature share (SIGNATURE).
    pub signature_share: Vec<u8>,
    /// Participation bitmap (FINAL_INFO).
    pub bitmap: Vec<u8>,
    /// Aggregated signature (FINAL_INFO).
    pub aggregate_signature: Vec<u8>,
    /// Sender's public key.
    pub pub_key: Vec<u8>,
    /// Leader signature over the final header (FINAL_INFO, legacy mode).
    pub leader_signature: Vec<u8>,
    /// Raw wire message type. Use [`ConsensusMessage::message_type`].
    pub message_type: i32,
    /// Round the message belongs to.
    pub round_index: i64,
    /// Chain identifier, rejected on mismatch.
    pub chain_id: Vec<u8>,
    /// Reserved.
    pub extra1: Vec<u8>,
    /// Reserved.
    pub extra2: Vec<u8>,
    /// Reserved.
    pub extra3: Vec<u8>,
    /// Peer id the transport associated with the sender.
    pub associated_peer_id: Vec<u8>,
    /// Serialized envelopes of invalid signers (INVALID_SIGNERS).
    pub invalid_signers_payload: Vec<u8>,
}

impl ConsensusMessage {
    /// Typed view of the wire message type.
    pub fn message_type(&self) -> MessageType {
        MessageType::from_wire(self.message_type)
    }

    /// Round index as a typed value.
    pub fn round(&self) -> RoundIndex {
        RoundIndex(self.round_index)
    }

    /// The data hash as a [`Hash`], when it has the right length.
    pub fn data_hash(&self) -> Option<Hash> {
        let raw: [u8; 32] = self.data_hash.as_slice().try_into().ok()?;
        Some(Hash::from_raw(raw))
    }

    /// A bare envelope for the given type, round and sender.
    pub fn bare(message_type: MessageType, round: RoundIndex, pub_key: Vec<u8>) -> Self {
        Self {
            message_type: message_type.as_wire(),
            round_index: round.0,
            pub_key,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_strings_are_exact() {
        assert_eq!(
            MessageType::BlockBodyAndHeader.to_string(),
            "(BLOCK_BODY_AND_HEADER)"
        );
        assert_eq!(MessageType::BlockBody.to_string(), "(BLOCK_BODY)");
        assert_eq!(MessageType::BlockHeader.to_string(), "(BLOCK_HEADER)");
        assert_eq!(MessageType::Signature.to_string(), "(SIGNATURE)");
        assert_eq!(MessageType::FinalInfo.to_string(), "(FINAL_INFO)");
        assert_eq!(MessageType::Unknown.to_string(), "(UNKNOWN)");
        assert_eq!(
            MessageType::InvalidSigners.to_string(),
            "Undefined message type"
        );
    }

    #[test]
    fn test_unknown_wire_values_map_to_unknown() {
        assert_eq!(MessageType::from_wire(42), MessageType::Unknown);
        assert_eq!(MessageType::from_wire(-7), MessageType::Unknown);
        assert_eq!(MessageType::from_wire(3), MessageType::Signature);
    }

    #[test]
    fn test_unknown_literal_strings_map_to_unknown() {
        let parsed: MessageType = "(SOMETHING_ELSE)".parse().unwrap();
        assert_eq!(parsed, MessageType::Unknown);
        let parsed: MessageType = "(SIGNATURE)".parse().unwrap();
        assert_eq!(parsed, MessageType::Signature);
    }

    #[test]
    fn test_data_hash_length_check() {
        let mut msg = ConsensusMessage::bare(MessageType::Signature, RoundIndex(1), vec![1]);
        msg.data_hash = vec![1, 2, 3];
        assert!(msg.data_hash().is_none());
        msg.data_hash = Hash::from_bytes(b"x").as_bytes().to_vec();
        assert!(msg.data_hash().is_some());
    }
}
