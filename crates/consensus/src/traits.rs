//! Collaborator contracts consumed by the consensus core.
//!
//! Everything the core treats as external lives behind these traits:
//! validator selection, block processing, broadcasting, header signature
//! verification, honesty scoring and the chain head. Constructors validate
//! their collaborators once; downstream code holds non-null references.

use crate::ConsensusError;
use rondel_messages::ConsensusMessage;
use rondel_types::{
    Body, EpochId, Hash, Header, HeaderProof, Nonce, PubKeyBytes, RoundIndex, ShardId,
};
use std::time::Duration;
use thiserror::Error;

/// Errors from block processing collaborators.
#[derive(Debug, Error)]
pub enum BlockProcessingError {
    #[error("Accounts journal is dirty: {journal_len} pending entries")]
    DirtyAccountsJournal { journal_len: usize },

    #[error("State root mismatch: header {header_root}, computed {computed_root}")]
    StateRootMismatch {
        header_root: Hash,
        computed_root: Hash,
    },

    #[error("Wrong header variant: {0}")]
    WrongHeaderVariant(String),

    #[error("Commit failed: {0}")]
    Commit(String),

    #[error("Processing failed: {0}")]
    Other(String),
}

/// Result of processing a proposed block: the header and body as this node
/// computed them.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub header: Header,
    pub body: Body,
}

/// Applies accepted blocks to node state.
pub trait BlockProcessor: Send + Sync {
    /// Create a version-stamped header for the coming block.
    fn create_new_header(
        &self,
        round: RoundIndex,
        nonce: Nonce,
    ) -> Result<Header, BlockProcessingError>;

    /// Assemble a body within limits and finalize the header for proposal.
    fn create_block(
        &self,
        header: Header,
        have_time: Duration,
    ) -> Result<(Header, Body), BlockProcessingError>;

    /// Speculatively apply a proposed block; the computed state root must
    /// match the header's.
    fn process_block(
        &self,
        header: &Header,
        body: &Body,
        have_time: Duration,
    ) -> Result<ProcessOutcome, BlockProcessingError>;

    /// Leader-only hook run after the final header is assembled and before
    /// the commit. A failure here fails the round without committing.
    /// Chain-specific processors use it for work only the proposer does,
    /// such as the sovereign bridge handoff.
    fn leader_pre_commit(&self, header: &Header) -> Result<(), BlockProcessingError> {
        let _ = header;
        Ok(())
    }

    /// Commit the block atomically; on failure the pre-commit state is
    /// restored via `revert_current_block`.
    fn commit_block(&self, header: &Header, body: &Body) -> Result<(), BlockProcessingError>;

    /// Restore the pre-commit state after a failed commit.
    fn revert_current_block(&self);

    /// Rewind node state to a previously committed block.
    fn revert_state_to_block(
        &self,
        header: &Header,
        root_hash: Hash,
    ) -> Result<(), BlockProcessingError>;
}

/// Validator selection for a round.
pub trait NodesCoordinator: Send + Sync {
    /// The ordered consensus group for (prev randomness, round, shard,
    /// epoch). Index 0 is the leader.
    fn consensus_validators_public_keys(
        &self,
        prev_randomness: &Hash,
        round: RoundIndex,
        shard: ShardId,
        epoch: EpochId,
    ) -> Result<Vec<PubKeyBytes>, ConsensusError>;

    /// Stable index of a validator within the epoch's full validator list.
    fn validator_index(&self, pub_key: &[u8], epoch: EpochId) -> Option<usize>;
}

/// Verification of the signature fields carried inside headers.
pub trait HeaderSigVerifier: Send + Sync {
    /// Verify the aggregated signature stored in the header.
    fn verify_signature(&self, header: &Header) -> Result<(), ConsensusError>;

    /// Verify the leader signature stored in the header.
    fn verify_leader_signature(&self, header: &Header) -> Result<(), ConsensusError>;

    /// Verify an aggregate over an explicit (hash, bitmap, signature)
    /// triple without mutating the header.
    fn verify_for_hash(
        &self,
        header: &Header,
        hash: &Hash,
        bitmap: &[u8],
        signature: &[u8],
    ) -> Result<(), ConsensusError>;

    /// Whether the header's structure permits the relaxed fallback quorum.
    fn should_apply_fallback_validation(&self, header: &Header) -> bool;
}

/// Outbound consensus traffic. Implementations must not block.
pub trait BroadcastMessenger: Send + Sync {
    /// Broadcast one consensus envelope.
    fn broadcast_consensus_message(&self, message: &ConsensusMessage)
        -> Result<(), ConsensusError>;

    /// Broadcast a finalized header.
    fn broadcast_header(&self, header: &Header, sender: &[u8]) -> Result<(), ConsensusError>;

    /// Leader path: broadcast the proposed block data.
    fn broadcast_block_data_leader(
        &self,
        header: &Header,
        body: &Body,
        sender: &[u8],
    ) -> Result<(), ConsensusError>;

    /// Queue an equivalent proof on the delayed broadcast path, indexed by
    /// the sender's consensus-group position so earlier positions transmit
    /// first when possible.
    fn prepare_broadcast_equivalent_proof(
        &self,
        proof: &HeaderProof,
        position: usize,
        pub_key: &[u8],
    ) -> Result<(), ConsensusError>;
}

/// Rating of peers by protocol behavior.
pub trait PeerHonesty: Send + Sync {
    /// Reward protocol-conforming behavior.
    fn increase_score(&self, pub_key: &[u8], reason: &'static str);

    /// Penalize malformed or out-of-protocol behavior.
    fn decrease_score(&self, pub_key: &[u8], reason: &'static str);
}

/// Read access to the committed chain head.
pub trait ChainHandle: Send + Sync {
    /// The last committed header.
    fn current_header(&self) -> Header;

    /// Hash of the last committed header.
    fn current_header_hash(&self) -> Hash;
}
