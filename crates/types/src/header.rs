//! The block header family.
//!
//! The chain carries several header shapes: the plain shard header, the
//! shard header extended with validator-statistics data, and the sovereign
//! chain header that additionally references notarized cross-chain headers
//! and an outgoing bridge mini-block. They are modeled as a tagged enum with
//! a common-field accessor trait; the SBOR enum discriminant doubles as the
//! wire variant byte.

use crate::{EpochId, Hash, Nonce, OutgoingMiniBlockHeader, RoundIndex, ShardId, SignatureBytes};
use sbor::prelude::*;
use thiserror::Error;

/// Errors from header validation and type assertions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("Wrong header variant: expected {expected}, got {got}")]
    WrongVariant {
        expected: &'static str,
        got: &'static str,
    },

    #[error("Chain id mismatch")]
    ChainIdMismatch,

    #[error("Header encoding failed: {0}")]
    Encoding(String),
}

/// Fields common to every header shape.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ShardHeader {
    /// Chain position.
    pub nonce: Nonce,
    /// Round the block was proposed in.
    pub round: RoundIndex,
    /// Epoch the block belongs to.
    pub epoch: EpochId,
    /// Shard the block belongs to.
    pub shard: ShardId,
    /// Hash of the previous block's header.
    pub prev_hash: Hash,
    /// Randomness carried over from the previous block.
    pub prev_randomness: Hash,
    /// Fresh randomness contributed by the leader.
    pub randomness: Hash,
    /// Chain identifier, rejected on mismatch.
    pub chain_id: Vec<u8>,
    /// Wall-clock timestamp (seconds since epoch).
    pub timestamp: u64,
    /// State root after applying the body.
    pub state_root: Hash,
    /// Hash of the block body.
    pub body_hash: Hash,
    /// Number of transactions in the body.
    pub tx_count: u32,
    /// Header version stamp.
    pub version: u8,
    /// Participation bitmap (filled at end of round).
    pub pub_keys_bitmap: Vec<u8>,
    /// Aggregated BLS signature over the data hash (filled at end of round).
    pub signature: SignatureBytes,
    /// Leader's own signature over the signed header (legacy mode only).
    pub leader_signature: SignatureBytes,
}

impl ShardHeader {
    /// A header with every field zeroed, for building fixtures and genesis.
    pub fn zeroed() -> Self {
        Self {
            nonce: Nonce::GENESIS,
            round: RoundIndex::GENESIS,
            epoch: EpochId::GENESIS,
            shard: ShardId(0),
            prev_hash: Hash::ZERO,
            prev_randomness: Hash::ZERO,
            randomness: Hash::ZERO,
            chain_id: Vec::new(),
            timestamp: 0,
            state_root: Hash::ZERO,
            body_hash: Hash::ZERO,
            tx_count: 0,
            version: 1,
            pub_keys_bitmap: Vec::new(),
            signature: Vec::new(),
            leader_signature: Vec::new(),
        }
    }
}

/// Shard header carrying validator-statistics data.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ValidatorStatsHeader {
    /// Common header fields.
    pub base: ShardHeader,
    /// Root hash of the validator-statistics trie.
    pub validator_stats_root: Hash,
}

/// Sovereign chain header.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct SovereignHeader {
    /// Common header fields.
    pub base: ShardHeader,
    /// Root hash of the validator-statistics trie, verified separately
    /// from the user-state root.
    pub validator_stats_root: Hash,
    /// Outgoing bridge mini-block, present when the block carries
    /// operations destined for the external bridge.
    pub outgoing_mini_block: Option<OutgoingMiniBlockHeader>,
    /// Hashes of the extended cross-chain headers notarized by this block,
    /// sorted by nonce.
    pub extended_header_hashes: Vec<Hash>,
}

/// The header family. The SBOR discriminant identifies the variant on the
/// wire.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub enum Header {
    /// Plain shard header.
    Shard(ShardHeader),
    /// Metachain header (same shape as the shard header; the variant byte
    /// distinguishes it on the wire).
    Meta(ShardHeader),
    /// Shard header with validator statistics.
    WithValidatorStats(ValidatorStatsHeader),
    /// Sovereign chain header.
    Sovereign(SovereignHeader),
}

/// Read access to the fields every header shape carries, plus the mutation
/// points the end-of-round subround needs.
pub trait HeaderAccessor {
    fn nonce(&self) -> Nonce;
    fn round(&self) -> RoundIndex;
    fn epoch(&self) -> EpochId;
    fn shard(&self) -> ShardId;
    fn prev_hash(&self) -> Hash;
    fn chain_id(&self) -> &[u8];
    fn state_root(&self) -> Hash;
    fn set_signature_data(&mut self, bitmap: Vec<u8>, signature: SignatureBytes);
    fn set_leader_signature(&mut self, signature: SignatureBytes);
}

impl Header {
    fn base(&self) -> &ShardHeader {
        match self {
            Header::Shard(h) | Header::Meta(h) => h,
            Header::WithValidatorStats(h) => &h.base,
            Header::Sovereign(h) => &h.base,
        }
    }

    fn base_mut(&mut self) -> &mut ShardHeader {
        match self {
            Header::Shard(h) | Header::Meta(h) => h,
            Header::WithValidatorStats(h) => &mut h.base,
            Header::Sovereign(h) => &mut h.base,
        }
    }

    /// Variant name for diagnostics and type assertions.
    pub fn variant_name(&self) -> &'static str {
        match self {
            Header::Shard(_) => "Shard",
            Header::Meta(_) => "Meta",
            Header::WithValidatorStats(_) => "WithValidatorStats",
            Header::Sovereign(_) => "Sovereign",
        }
    }

    /// Assert the sovereign variant, for the sovereign block processor.
    pub fn as_sovereign(&self) -> Result<&SovereignHeader, HeaderError> {
        match self {
            Header::Sovereign(h) => Ok(h),
            other => Err(HeaderError::WrongVariant {
                expected: "Sovereign",
                got: other.variant_name(),
            }),
        }
    }

    /// Assert the sovereign variant, mutably.
    pub fn as_sovereign_mut(&mut self) -> Result<&mut SovereignHeader, HeaderError> {
        match self {
            Header::Sovereign(h) => Ok(h),
            other => {
                let got = other.variant_name();
                Err(HeaderError::WrongVariant {
                    expected: "Sovereign",
                    got,
                })
            }
        }
    }

    /// Hash of the header with the end-of-round signature fields cleared.
    ///
    /// This is the "data hash" consensus signs: every participant computes
    /// the same value before the bitmap and aggregate are known.
    pub fn hash_for_signing(&self) -> Result<Hash, HeaderError> {
        let mut unsigned = self.clone();
        {
            let base = unsigned.base_mut();
            base.pub_keys_bitmap = Vec::new();
            base.signature = Vec::new();
            base.leader_signature = Vec::new();
        }
        let encoded =
            sbor::basic_encode(&unsigned).map_err(|e| HeaderError::Encoding(format!("{e:?}")))?;
        Ok(Hash::from_bytes(&encoded))
    }

    /// Hash of the complete header, signature fields included.
    pub fn hash(&self) -> Result<Hash, HeaderError> {
        let encoded =
            sbor::basic_encode(self).map_err(|e| HeaderError::Encoding(format!("{e:?}")))?;
        Ok(Hash::from_bytes(&encoded))
    }

    /// Check the chain id against the expected one.
    pub fn check_chain_id(&self, expected: &[u8]) -> Result<(), HeaderError> {
        if self.chain_id() != expected {
            return Err(HeaderError::ChainIdMismatch);
        }
        Ok(())
    }
}

impl HeaderAccessor for Header {
    fn nonce(&self) -> Nonce {
        self.base().nonce
    }

    fn round(&self) -> RoundIndex {
        self.base().round
    }

    fn epoch(&self) -> EpochId {
        self.base().epoch
    }

    fn shard(&self) -> ShardId {
        self.base().shard
    }

    fn prev_hash(&self) -> Hash {
        self.base().prev_hash
    }

    fn chain_id(&self) -> &[u8] {
        &self.base().chain_id
    }

    fn state_root(&self) -> Hash {
        self.base().state_root
    }

    fn set_signature_data(&mut self, bitmap: Vec<u8>, signature: SignatureBytes) {
        let base = self.base_mut();
        base.pub_keys_bitmap = bitmap;
        base.signature = signature;
    }

    fn set_leader_signature(&mut self, signature: SignatureBytes) {
        self.base_mut().leader_signature = signature;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Header {
        let mut base = ShardHeader::zeroed();
        base.nonce = Nonce(7);
        base.round = RoundIndex(7);
        base.chain_id = b"rondel-test".to_vec();
        Header::Shard(base)
    }

    #[test]
    fn test_signing_hash_ignores_signature_fields() {
        let header = sample_header();
        let before = header.hash_for_signing().unwrap();

        let mut signed = header.clone();
        signed.set_signature_data(vec![0b1111], vec![1, 2, 3]);
        signed.set_leader_signature(vec![4, 5, 6]);

        assert_eq!(before, signed.hash_for_signing().unwrap());
        assert_ne!(signed.hash().unwrap(), before);
    }

    #[test]
    fn test_variant_assertion() {
        let header = sample_header();
        let err = header.as_sovereign().unwrap_err();
        assert_eq!(
            err,
            HeaderError::WrongVariant {
                expected: "Sovereign",
                got: "Shard"
            }
        );
    }

    #[test]
    fn test_chain_id_check() {
        let header = sample_header();
        assert!(header.check_chain_id(b"rondel-test").is_ok());
        assert_eq!(
            header.check_chain_id(b"other"),
            Err(HeaderError::ChainIdMismatch)
        );
    }
}
