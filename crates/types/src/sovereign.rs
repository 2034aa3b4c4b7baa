//! Sovereign-chain types: cross-chain extended headers and outgoing bridge
//! operations.

use crate::{Hash, Header, HeaderAccessor, MiniBlock, Nonce};
use sbor::prelude::*;

/// Reserved marker carried by the tracker's genesis placeholder entry.
pub const EXTENDED_GENESIS_MARKER: &[u8] = b"sovereignChainGenesis";

/// A main-chain header observed by a sovereign node, wrapped together with
/// the mini-blocks destined for the sovereign chain.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ExtendedShardHeader {
    /// The observed main-chain header.
    pub header: Header,
    /// Mini-blocks whose receiver is the sovereign chain, in observation
    /// order. Each carries the sender shard and the transaction hashes.
    pub incoming_mini_blocks: Vec<MiniBlock>,
}

impl ExtendedShardHeader {
    /// Nonce of the wrapped header.
    pub fn nonce(&self) -> Nonce {
        self.header.nonce()
    }

    /// Hash identifying this extended header (hash of the wrapped header).
    pub fn hash(&self) -> Hash {
        self.header.hash().unwrap_or(Hash::ZERO)
    }

    /// All transaction hashes across the incoming mini-blocks.
    pub fn tx_hashes(&self) -> impl Iterator<Item = &Hash> {
        self.incoming_mini_blocks
            .iter()
            .flat_map(|mb| mb.tx_hashes.iter())
    }

    /// Whether this is the tracker's reserved genesis placeholder.
    pub fn is_genesis_placeholder(&self) -> bool {
        self.header.chain_id() == EXTENDED_GENESIS_MARKER && self.nonce() == Nonce::GENESIS
    }
}

/// Header of the outgoing bridge mini-block inside a sovereign header.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct OutgoingMiniBlockHeader {
    /// Hash identifying the batch of outgoing operations for this round.
    pub operations_batch_hash: Hash,
    /// Hashes of the individual outgoing operations in the batch.
    pub operation_hashes: Vec<Hash>,
}

/// A payload queued for delivery to the external bridge.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct OutgoingOperation {
    /// Operation identifier.
    pub hash: Hash,
    /// Opaque bridge payload.
    pub payload: Vec<u8>,
    /// Set once the bridge sink has confirmed delivery.
    pub confirmed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ShardHeader, ShardId};

    #[test]
    fn test_genesis_placeholder_detection() {
        let mut base = ShardHeader::zeroed();
        base.chain_id = EXTENDED_GENESIS_MARKER.to_vec();
        let placeholder = ExtendedShardHeader {
            header: Header::Shard(base),
            incoming_mini_blocks: vec![],
        };
        assert!(placeholder.is_genesis_placeholder());
    }

    #[test]
    fn test_tx_hashes_flattened() {
        let mut base = ShardHeader::zeroed();
        base.nonce = Nonce(3);
        let extended = ExtendedShardHeader {
            header: Header::Shard(base),
            incoming_mini_blocks: vec![
                MiniBlock {
                    sender_shard: ShardId(1),
                    receiver_shard: ShardId(0),
                    tx_hashes: vec![Hash::from_bytes(b"a")],
                    mb_type: crate::MiniBlockType::Incoming,
                },
                MiniBlock {
                    sender_shard: ShardId(2),
                    receiver_shard: ShardId(0),
                    tx_hashes: vec![Hash::from_bytes(b"b"), Hash::from_bytes(b"c")],
                    mb_type: crate::MiniBlockType::Incoming,
                },
            ],
        };
        assert_eq!(extended.tx_hashes().count(), 3);
        assert_eq!(extended.nonce(), Nonce(3));
    }
}
