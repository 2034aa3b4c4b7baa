//! Storage-facing collaborator contracts of the block processor.
//!
//! The processor never touches tries, databases or the mempool directly;
//! it drives them through these traits. Real nodes back them with
//! persistent stores, tests and local runs use the [`crate::memory`]
//! implementations.

use rondel_types::{Body, Hash, Header, MiniBlock, Nonce};
use std::time::Duration;
use thiserror::Error;

/// Errors from the accounts state adapter.
#[derive(Debug, Error)]
pub enum AccountsError {
    #[error("unknown state root {0}")]
    UnknownRoot(Hash),

    #[error("no journaled changes to commit")]
    NothingToCommit,

    #[error("accounts backend failure: {0}")]
    Backend(String),
}

/// Errors from the block store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("block {0} already stored")]
    DuplicateBlock(Hash),

    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Journaled accounts state.
///
/// `apply_body` records changes in a journal and returns the prospective
/// root; nothing is visible to readers of the committed state until
/// `commit`. The journal holds at most one block's worth of changes.
pub trait AccountsAdapter: Send + Sync {
    /// Root hash of the committed state.
    fn root_hash(&self) -> Hash;

    /// Number of journaled, uncommitted entries.
    fn journal_len(&self) -> usize;

    /// Apply a block body on top of the committed state, journaled.
    /// Returns the prospective state root.
    fn apply_body(&self, body: &Body) -> Result<Hash, AccountsError>;

    /// Persist the journal and return the new committed root.
    fn commit(&self) -> Result<Hash, AccountsError>;

    /// Drop all journaled changes.
    fn discard_journal(&self);

    /// Rewind the committed state to a previously committed root.
    fn revert_to_root(&self, root: Hash) -> Result<(), AccountsError>;
}

/// Committed block storage, indexed by hash and by nonce.
pub trait BlockStore: Send + Sync {
    fn put_block(&self, hash: Hash, header: &Header, body: &Body) -> Result<(), StoreError>;

    fn header_by_hash(&self, hash: &Hash) -> Option<Header>;

    fn header_by_nonce(&self, nonce: Nonce) -> Option<Header>;

    fn body_by_hash(&self, hash: &Hash) -> Option<Body>;
}

/// Fork bookkeeping, notified of every committed header.
pub trait ForkDetector: Send + Sync {
    fn add_header(&self, header: &Header, hash: Hash);

    /// Highest committed nonce seen so far.
    fn highest_nonce(&self) -> Nonce;
}

/// Source of mini-blocks for a new proposal.
pub trait TxSource: Send + Sync {
    /// Mini-blocks that fit into the given assembly time, in inclusion
    /// order.
    fn mini_blocks(&self, have_time: Duration) -> Vec<MiniBlock>;
}
