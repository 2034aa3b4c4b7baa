//! Shard block processing for Rondel.
//!
//! [`ShardProcessor`] implements the consensus-facing
//! [`rondel_consensus::BlockProcessor`] contract over journaled accounts
//! state, hash- and nonce-indexed block storage and fork bookkeeping.
//! The storage backends live behind the [`adapters`] traits; [`memory`]
//! provides in-memory backends for tests and local runs.

pub mod adapters;
pub mod memory;

mod processor;

pub use adapters::{
    AccountsAdapter, AccountsError, BlockStore, ForkDetector, StoreError, TxSource,
};
pub use processor::ShardProcessor;
