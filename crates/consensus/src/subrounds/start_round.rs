//! StartRound: reset state and derive the round's consensus group.

use super::SubroundContext;
use async_trait::async_trait;
use rondel_chronology::{SubroundHandler, SubroundId, SubroundSpec, SubroundStatus};
use rondel_types::{ConsensusGroup, HeaderAccessor, RoundIndex};
use tracing::{debug, info, warn};

pub struct SubroundStartRound {
    spec: SubroundSpec,
    ctx: SubroundContext,
}

impl SubroundStartRound {
    pub fn new(ctx: SubroundContext) -> Self {
        Self {
            spec: super::spec_of(SubroundId::StartRound),
            ctx,
        }
    }

    fn try_job(&self, round: RoundIndex) -> Result<(), crate::ConsensusError> {
        self.ctx.state.archive_and_reset(round);

        let head = self.ctx.chain.current_header();
        let prev_randomness = self.ctx.chain.current_header_hash();
        let keys = self.ctx.coordinator.consensus_validators_public_keys(
            &prev_randomness,
            round,
            self.ctx.config.shard,
            head.epoch(),
        )?;
        let group = ConsensusGroup::new(keys)?;
        self.ctx.signer.reset(group.keys())?;

        let leading = self.ctx.is_self_leader(&group);
        if leading {
            info!(%round, group_size = group.len(), "entering round as leader");
        } else {
            debug!(%round, group_size = group.len(), "entering round as participant");
        }

        self.ctx.state.with(|state| {
            state.group = Some(group);
        });
        self.ctx.stats.round_started();
        Ok(())
    }
}

#[async_trait]
impl SubroundHandler for SubroundStartRound {
    fn id(&self) -> SubroundId {
        SubroundId::StartRound
    }

    fn spec(&self) -> SubroundSpec {
        self.spec
    }

    async fn do_job(&mut self, round: RoundIndex) -> bool {
        match self.try_job(round) {
            Ok(()) => true,
            Err(err) => {
                warn!(%round, %err, "start-round job failed");
                self.ctx
                    .state
                    .with(|state| state.cancel_round(SubroundId::StartRound));
                false
            }
        }
    }

    fn do_check(&self) -> SubroundStatus {
        self.ctx.state.with(|state| {
            if state.round_canceled {
                return SubroundStatus::Canceled;
            }
            if state.group.is_some() {
                state.set_status(SubroundId::StartRound, SubroundStatus::Finished);
                return SubroundStatus::Finished;
            }
            SubroundStatus::NotFinished
        })
    }

    fn extend(&mut self) {
        self.ctx.state.with(|state| {
            state.mark_extend_called(SubroundId::StartRound);
            if state.group.is_none() {
                state.cancel_round(SubroundId::StartRound);
            }
        });
    }

    fn cancel(&mut self) {
        self.ctx.state.with(|state| {
            state.set_status(SubroundId::StartRound, SubroundStatus::Canceled)
        });
    }
}
