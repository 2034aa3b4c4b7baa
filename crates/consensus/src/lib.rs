//! Subround consensus state machine.
//!
//! This crate wires the round clock, the BLS signing engine and the wire
//! messages into the four-subround consensus protocol:
//!
//! - [`ConsensusState`]: the per-round mutable record, owned by the
//!   chronology task and reached by message callbacks through
//!   [`SharedConsensusState`]
//! - [`Worker`]: inbound message validation, buffering and dispatch
//! - [`subrounds`]: the StartRound / Block / Signature / EndRound handlers,
//!   with the legacy and equivalent-proofs behaviors selected per epoch
//! - [`ProofPool`]: dedup store of finalized header proofs
//! - collaborator traits for everything outside the core (block
//!   processing, broadcasting, validator selection, honesty scoring)

mod config;
mod errors;
mod fan_out;
mod honesty;
mod proof_pool;
mod state;
mod stats;
mod throttler;
mod traits;
mod worker;

pub mod subrounds;

pub use config::ConsensusConfig;
pub use errors::ConsensusError;
pub use fan_out::{run_throttled, FanOutError};
pub use honesty::HonestyTracker;
pub use proof_pool::ProofPool;
pub use state::{ConsensusState, RoundSnapshot, SharedConsensusState};
pub use stats::ConsensusStats;
pub use throttler::{Throttler, TokenThrottler};
pub use traits::{
    BlockProcessingError, BlockProcessor, BroadcastMessenger, ChainHandle, HeaderSigVerifier,
    NodesCoordinator, PeerHonesty, ProcessOutcome,
};
pub use subrounds::{
    build_subrounds, register_message_callbacks, ConsensusModel, SubroundContext,
    SubroundContextBuilder,
};
pub use worker::{attach_worker, Worker};
