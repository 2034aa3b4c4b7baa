//! Consensus error kinds.

use rondel_chronology::SubroundId;
use rondel_messages::MessageType;
use rondel_types::RoundIndex;
use thiserror::Error;

/// Errors surfaced by the consensus core.
#[derive(Debug, Error)]
pub enum ConsensusError {
    // ── construction ───────────────────────────────────────────────────
    #[error("Missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── message validation ─────────────────────────────────────────────
    #[error("Chain id mismatch")]
    ChainIdMismatch,

    #[error("Sender not in consensus group")]
    SenderNotInGroup,

    #[error("Sender is not the round leader")]
    SenderNotLeader,

    #[error("Message for stale round {0}")]
    StaleRound(RoundIndex),

    #[error("Data hash does not match the proposed block")]
    DataHashMismatch,

    #[error("Malformed message of type {0}")]
    MalformedMessage(MessageType),

    // ── round progress ─────────────────────────────────────────────────
    #[error("Subround {0} canceled")]
    SubroundCanceled(SubroundId),

    #[error("time is out")]
    TimeIsOut,

    #[error("Not enough valid signatures: have {have}, need {need}")]
    NotEnoughSignatures { have: usize, need: usize },

    #[error("Signature aggregation failed after invalid-signer retry")]
    AggregationFailed,

    #[error("No block proposed this round")]
    MissingProposal,

    #[error("State root mismatch after processing")]
    StateRootMismatch,

    #[error("Commit failed: {0}")]
    CommitFailed(String),

    // ── wrapped collaborator errors ────────────────────────────────────
    #[error(transparent)]
    Processing(#[from] crate::traits::BlockProcessingError),

    #[error(transparent)]
    Signer(#[from] rondel_crypto::MultiSignerError),

    #[error(transparent)]
    Header(#[from] rondel_types::HeaderError),

    #[error(transparent)]
    Group(#[from] rondel_types::GroupError),

    #[error(transparent)]
    Bitmap(#[from] rondel_types::BitmapError),

    #[error(transparent)]
    Codec(#[from] rondel_messages::CodecError),
}
