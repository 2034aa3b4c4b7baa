//! The four subround handlers.
//!
//! One handler per subround, all sharing a [`SubroundContext`] of
//! collaborators. The Signature and EndRound subrounds carry two behaviors
//! (legacy and equivalent proofs) selected per round by the
//! `EquivalentMessages` epoch flag; see [`ConsensusModel`].

mod block;
mod end_round;
mod signature;
mod start_round;

pub use block::SubroundBlock;
pub use end_round::SubroundEndRound;
pub use signature::SubroundSignature;
pub use start_round::SubroundStartRound;

use crate::{
    BlockProcessor, BroadcastMessenger, ChainHandle, ConsensusConfig, ConsensusError,
    ConsensusStats, HeaderSigVerifier, NodesCoordinator, PeerHonesty, ProofPool,
    SharedConsensusState, Throttler, Worker,
};
use rondel_chronology::{standard_subrounds, Rounder, SubroundHandler, SubroundId, SubroundSpec};
use rondel_crypto::MultiSigner;
use rondel_types::{
    ConsensusGroup, EnableEpochsHandler, EpochFlag, EpochId, Header, HeaderAccessor, PubKeyBytes,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};

/// Which consensus behavior a round runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusModel {
    /// Leader aggregates and broadcasts FINAL_INFO.
    Legacy,
    /// Any participant may finalize a header proof; no leader signature
    /// on the wire.
    EquivalentProofs,
}

impl ConsensusModel {
    /// Select the model for an epoch from the `EquivalentMessages` flag.
    pub fn for_epoch(epochs: &dyn EnableEpochsHandler, epoch: EpochId) -> Self {
        if epochs.is_flag_enabled_in_epoch(EpochFlag::EquivalentMessages, epoch) {
            ConsensusModel::EquivalentProofs
        } else {
            ConsensusModel::Legacy
        }
    }
}

/// Everything a subround handler needs, bundled for cheap cloning.
#[derive(Clone)]
pub struct SubroundContext {
    pub config: ConsensusConfig,
    pub state: SharedConsensusState,
    pub rounder: Arc<dyn Rounder>,
    pub signer: Arc<MultiSigner>,
    pub coordinator: Arc<dyn NodesCoordinator>,
    pub processor: Arc<dyn BlockProcessor>,
    pub verifier: Arc<dyn HeaderSigVerifier>,
    pub messenger: Arc<dyn BroadcastMessenger>,
    pub honesty: Arc<dyn PeerHonesty>,
    pub chain: Arc<dyn ChainHandle>,
    pub epochs: Arc<dyn EnableEpochsHandler>,
    pub proof_pool: Arc<ProofPool>,
    pub stats: Arc<ConsensusStats>,
    pub throttler: Arc<dyn Throttler>,
    /// Consensus-state-changed latch shared with the worker and scheduler.
    pub wake: Arc<Notify>,
    /// Flips to true when the engine shuts down or the round is abandoned.
    pub cancel: watch::Receiver<bool>,
}

impl SubroundContext {
    /// The model for the round the given header belongs to.
    pub fn model_for(&self, header: &Header) -> ConsensusModel {
        ConsensusModel::for_epoch(self.epochs.as_ref(), header.epoch())
    }

    /// Managed keys sitting in the group, as (position, key) pairs sorted
    /// by position.
    pub fn managed_positions(&self, group: &ConsensusGroup) -> Vec<(usize, PubKeyBytes)> {
        let mut positions: Vec<(usize, PubKeyBytes)> = self
            .signer
            .managed_public_keys()
            .into_iter()
            .filter_map(|key| group.position_of(&key).map(|p| (p, key)))
            .collect();
        positions.sort_by_key(|(p, _)| *p);
        positions
    }

    /// Whether this node operates the round leader's key.
    pub fn is_self_leader(&self, group: &ConsensusGroup) -> bool {
        self.signer.is_managed(group.leader())
    }

    /// The signature quorum in force for this header: the relaxed quorum
    /// when fallback validation is both flag-enabled and permitted by the
    /// header's structure, the full quorum otherwise.
    pub fn effective_threshold(&self, group: &ConsensusGroup, header: &Header) -> usize {
        let fallback_enabled = self
            .epochs
            .is_flag_enabled_in_epoch(EpochFlag::FallbackValidation, header.epoch());
        if fallback_enabled && self.verifier.should_apply_fallback_validation(header) {
            group.fallback()
        } else {
            group.threshold()
        }
    }

    /// Time left in a subround's window of the current round.
    pub fn window_remaining(&self, subround: SubroundId) -> Duration {
        let spec = spec_of(subround);
        let duration = self.rounder.time_duration();
        let window_open = self
            .rounder
            .time_stamp()
            .checked_add(duration.mul_f64(spec.start_fraction));
        let window_len = duration.mul_f64(spec.end_fraction - spec.start_fraction);
        match window_open {
            Some(open) => self.rounder.remaining_time(open, window_len),
            None => Duration::ZERO,
        }
    }
}

/// Builder enforcing that every collaborator is supplied. Construction
/// fails fast on a missing one.
#[derive(Default)]
pub struct SubroundContextBuilder {
    config: Option<ConsensusConfig>,
    state: Option<SharedConsensusState>,
    rounder: Option<Arc<dyn Rounder>>,
    signer: Option<Arc<MultiSigner>>,
    coordinator: Option<Arc<dyn NodesCoordinator>>,
    processor: Option<Arc<dyn BlockProcessor>>,
    verifier: Option<Arc<dyn HeaderSigVerifier>>,
    messenger: Option<Arc<dyn BroadcastMessenger>>,
    honesty: Option<Arc<dyn PeerHonesty>>,
    chain: Option<Arc<dyn ChainHandle>>,
    epochs: Option<Arc<dyn EnableEpochsHandler>>,
    proof_pool: Option<Arc<ProofPool>>,
    stats: Option<Arc<ConsensusStats>>,
    throttler: Option<Arc<dyn Throttler>>,
    wake: Option<Arc<Notify>>,
    cancel: Option<watch::Receiver<bool>>,
}

macro_rules! builder_setter {
    ($name:ident, $ty:ty) => {
        pub fn $name(mut self, value: $ty) -> Self {
            self.$name = Some(value);
            self
        }
    };
}

impl SubroundContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    builder_setter!(config, ConsensusConfig);
    builder_setter!(state, SharedConsensusState);
    builder_setter!(rounder, Arc<dyn Rounder>);
    builder_setter!(signer, Arc<MultiSigner>);
    builder_setter!(coordinator, Arc<dyn NodesCoordinator>);
    builder_setter!(processor, Arc<dyn BlockProcessor>);
    builder_setter!(verifier, Arc<dyn HeaderSigVerifier>);
    builder_setter!(messenger, Arc<dyn BroadcastMessenger>);
    builder_setter!(honesty, Arc<dyn PeerHonesty>);
    builder_setter!(chain, Arc<dyn ChainHandle>);
    builder_setter!(epochs, Arc<dyn EnableEpochsHandler>);
    builder_setter!(proof_pool, Arc<ProofPool>);
    builder_setter!(stats, Arc<ConsensusStats>);
    builder_setter!(throttler, Arc<dyn Throttler>);
    builder_setter!(wake, Arc<Notify>);
    builder_setter!(cancel, watch::Receiver<bool>);

    pub fn build(self) -> Result<SubroundContext, ConsensusError> {
        let config = self
            .config
            .ok_or(ConsensusError::MissingCollaborator("config"))?;
        config.validate()?;
        Ok(SubroundContext {
            config,
            state: self
                .state
                .ok_or(ConsensusError::MissingCollaborator("state"))?,
            rounder: self
                .rounder
                .ok_or(ConsensusError::MissingCollaborator("rounder"))?,
            signer: self
                .signer
                .ok_or(ConsensusError::MissingCollaborator("signer"))?,
            coordinator: self
                .coordinator
                .ok_or(ConsensusError::MissingCollaborator("nodes coordinator"))?,
            processor: self
                .processor
                .ok_or(ConsensusError::MissingCollaborator("block processor"))?,
            verifier: self
                .verifier
                .ok_or(ConsensusError::MissingCollaborator("header sig verifier"))?,
            messenger: self
                .messenger
                .ok_or(ConsensusError::MissingCollaborator("broadcast messenger"))?,
            honesty: self
                .honesty
                .ok_or(ConsensusError::MissingCollaborator("peer honesty"))?,
            chain: self
                .chain
                .ok_or(ConsensusError::MissingCollaborator("chain handle"))?,
            epochs: self
                .epochs
                .ok_or(ConsensusError::MissingCollaborator("epochs handler"))?,
            proof_pool: self
                .proof_pool
                .ok_or(ConsensusError::MissingCollaborator("proof pool"))?,
            stats: self
                .stats
                .ok_or(ConsensusError::MissingCollaborator("stats"))?,
            throttler: self
                .throttler
                .ok_or(ConsensusError::MissingCollaborator("throttler"))?,
            wake: self
                .wake
                .ok_or(ConsensusError::MissingCollaborator("wake latch"))?,
            cancel: self
                .cancel
                .ok_or(ConsensusError::MissingCollaborator("cancel channel"))?,
        })
    }
}

/// The static spec of a subround.
pub(crate) fn spec_of(subround: SubroundId) -> SubroundSpec {
    let specs = standard_subrounds();
    match subround {
        SubroundId::StartRound => specs[0],
        SubroundId::Block => specs[1],
        SubroundId::Signature => specs[2],
        SubroundId::EndRound => specs[3],
    }
}

/// Build the four handlers in execution order, ready for registration
/// with the chronology.
pub fn build_subrounds(ctx: &SubroundContext) -> Vec<Box<dyn SubroundHandler>> {
    vec![
        Box::new(SubroundStartRound::new(ctx.clone())),
        Box::new(SubroundBlock::new(ctx.clone())),
        Box::new(SubroundSignature::new(ctx.clone())),
        Box::new(SubroundEndRound::new(ctx.clone())),
    ]
}

/// Register every subround's message callbacks with the worker.
pub fn register_message_callbacks(worker: &mut Worker, ctx: &SubroundContext) {
    block::register_callbacks(worker, ctx.clone());
    signature::register_callbacks(worker, ctx.clone());
    end_round::register_callbacks(worker, ctx.clone());
}
