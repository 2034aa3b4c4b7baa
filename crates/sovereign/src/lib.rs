//! Sovereign chain overlay for Rondel.
//!
//! A sovereign chain runs the same subround consensus as a shard but also
//! observes a main chain and notarizes its headers:
//!
//! - [`CrossChainTracker`]: ordered record of observed extended headers
//!   and the last cross-notarized nonce
//! - [`SovereignProcessor`]: the shard block processor extended with
//!   cross-chain inclusion, a separate validator-stats root and the
//!   leader-side bridge handoff
//! - [`OutgoingOperationsPool`]: batches destined for the external
//!   bridge, kept until the sink confirms them

pub mod memory;

mod outgoing;
mod processor;
mod tracker;

pub use outgoing::{BridgeError, BridgeOperationsHandler, OutgoingOperationsPool};
pub use processor::{
    CrossTxPool, ExtendedHeaderStore, SovereignProcessor, ValidatorStatsProvider,
};
pub use tracker::{genesis_placeholder, CrossChainTracker, HeaderRequester};
