//! Block body types: mini-blocks and their ordering.

use crate::{Hash, ShardId};
use sbor::prelude::*;

/// Kind of mini-block within a block body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub enum MiniBlockType {
    /// Regular user transactions.
    Tx,
    /// Smart contract results.
    ScResult,
    /// Rewards distribution.
    Rewards,
    /// Transactions observed on another chain (sovereign incoming).
    Incoming,
}

/// An ordered batch of transaction hashes routed between two shards.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct MiniBlock {
    /// Shard the transactions originate from.
    pub sender_shard: ShardId,
    /// Shard the transactions are destined for.
    pub receiver_shard: ShardId,
    /// Transaction hashes, in execution order.
    pub tx_hashes: Vec<Hash>,
    /// Mini-block kind.
    pub mb_type: MiniBlockType,
}

impl MiniBlock {
    /// Hash of the serialized mini-block.
    pub fn hash(&self) -> Hash {
        let encoded = sbor::basic_encode(self).unwrap_or_default();
        Hash::from_bytes(&encoded)
    }
}

/// An ordered sequence of mini-blocks forming a block body.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct Body {
    /// Mini-blocks in inclusion order.
    pub mini_blocks: Vec<MiniBlock>,
}

impl Body {
    /// Empty body.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Total number of transactions across all mini-blocks.
    pub fn tx_count(&self) -> usize {
        self.mini_blocks.iter().map(|mb| mb.tx_hashes.len()).sum()
    }

    /// Hash of the serialized body.
    pub fn hash(&self) -> Hash {
        let encoded = sbor::basic_encode(self).unwrap_or_default();
        Hash::from_bytes(&encoded)
    }
}
