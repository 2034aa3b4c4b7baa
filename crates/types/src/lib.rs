//! Core types for Rondel consensus.
//!
//! This crate provides the foundational types used throughout the consensus
//! implementation:
//!
//! - **Primitives**: Hash, signer bitmaps
//! - **Identifiers**: RoundIndex, Nonce, ShardId, EpochId, etc.
//! - **Consensus types**: the header family, mini-blocks, header proofs
//! - **Sovereign types**: extended shard headers, outgoing bridge operations
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend
//! on any other workspace crates, making it the foundation layer.

mod bitmap;
mod block;
mod epoch;
mod group;
mod hash;
mod header;
mod identifiers;
mod proof;
mod sovereign;

pub use bitmap::{BitmapError, SignerBitmap};
pub use block::{Body, MiniBlock, MiniBlockType};
pub use epoch::{ActivationEpochs, EnableEpochsHandler, EpochFlag};
pub use group::{fallback_threshold, quorum_threshold, ConsensusGroup, GroupError};
pub use hash::{Hash, HexError};
pub use header::{
    Header, HeaderAccessor, HeaderError, ShardHeader, SovereignHeader, ValidatorStatsHeader,
};
pub use identifiers::{EpochId, Nonce, RoundIndex, ShardId, SOVEREIGN_SHARD_ID};
pub use proof::HeaderProof;
pub use sovereign::{
    ExtendedShardHeader, OutgoingMiniBlockHeader, OutgoingOperation, EXTENDED_GENESIS_MARKER,
};

/// A validator public key on the wire (compressed BLS12-381 G1 point).
pub type PubKeyBytes = Vec<u8>;

/// A BLS signature on the wire (compressed BLS12-381 G2 point).
pub type SignatureBytes = Vec<u8>;
