//! Signature subround: create, broadcast and collect BLS shares.

use super::{ConsensusModel, SubroundContext};
use crate::{fan_out::run_throttled, ConsensusError, Worker};
use async_trait::async_trait;
use rondel_chronology::{SubroundHandler, SubroundId, SubroundSpec, SubroundStatus};
use rondel_crypto::MultiSignerError;
use rondel_messages::{ConsensusMessage, MessageType};
use rondel_types::{HeaderAccessor, PubKeyBytes, RoundIndex};
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub struct SubroundSignature {
    spec: SubroundSpec,
    ctx: SubroundContext,
}

impl SubroundSignature {
    pub fn new(ctx: SubroundContext) -> Self {
        Self {
            spec: super::spec_of(SubroundId::Signature),
            ctx,
        }
    }

    async fn try_job(&self, round: RoundIndex) -> Result<(), ConsensusError> {
        let (group, data_hash, epoch, model) = self.ctx.state.with(|state| {
            let group = state.group.clone();
            let data_hash = state.data_hash;
            let header = state.header.as_ref();
            let epoch = header.map(|h| h.epoch());
            let model = header.map(|h| self.ctx.model_for(h));
            (group, data_hash, epoch, model)
        });
        let group = group.ok_or(ConsensusError::MissingProposal)?;
        let data_hash = data_hash.ok_or(ConsensusError::MissingProposal)?;
        let epoch = epoch.ok_or(ConsensusError::MissingProposal)?;
        let model = model.ok_or(ConsensusError::MissingProposal)?;

        // Keys still owing a share this round. Under equivalent proofs the
        // leader already signed at the Block subround.
        let pending: Vec<(usize, PubKeyBytes)> = self
            .ctx
            .managed_positions(&group)
            .into_iter()
            .filter(|(position, _)| {
                !(model == ConsensusModel::EquivalentProofs && *position == 0)
            })
            .filter(|(position, _)| {
                !self
                    .ctx
                    .state
                    .with(|state| state.is_job_done(*position, SubroundId::Signature))
            })
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        let jobs: Vec<_> = pending
            .iter()
            .map(|(position, key)| {
                let signer = Arc::clone(&self.ctx.signer);
                let messenger = Arc::clone(&self.ctx.messenger);
                let chain_id = self.ctx.config.chain_id.clone();
                let position = *position;
                let key = key.clone();
                move || -> Result<(usize, ConsensusMessage), ConsensusError> {
                    let share = signer.create_share_for_public_key(
                        data_hash.as_bytes(),
                        position,
                        epoch,
                        &key,
                    )?;
                    let message = ConsensusMessage {
                        data_hash: data_hash.as_bytes().to_vec(),
                        signature_share: share,
                        pub_key: key,
                        message_type: MessageType::Signature.as_wire(),
                        round_index: round.0,
                        chain_id,
                        ..Default::default()
                    };
                    messenger.broadcast_consensus_message(&message)?;
                    Ok((position, message))
                }
            })
            .collect();

        let results = run_throttled(
            jobs,
            Arc::clone(&self.ctx.throttler),
            self.ctx.cancel.clone(),
        )
        .await
        .map_err(ConsensusError::from)?;

        for (_, outcome) in results {
            let (position, message) = outcome?;
            trace!(%round, position, "signature share broadcast");
            self.ctx.state.with(|state| {
                state.set_job_done(position, SubroundId::Signature);
                state.keep_signature_envelope(position, message);
            });
        }
        self.ctx.wake.notify_one();
        Ok(())
    }
}

#[async_trait]
impl SubroundHandler for SubroundSignature {
    fn id(&self) -> SubroundId {
        SubroundId::Signature
    }

    fn spec(&self) -> SubroundSpec {
        self.spec
    }

    async fn do_job(&mut self, round: RoundIndex) -> bool {
        let canceled = self.ctx.state.with(|state| state.round_canceled);
        if canceled {
            return false;
        }
        match self.try_job(round).await {
            Ok(()) => true,
            Err(err) => {
                warn!(%round, %err, "signature job failed");
                self.ctx
                    .state
                    .with(|state| state.cancel_round(SubroundId::Signature));
                false
            }
        }
    }

    fn do_check(&self) -> SubroundStatus {
        self.ctx.state.with(|state| {
            if state.round_canceled {
                return SubroundStatus::Canceled;
            }
            if state.status(SubroundId::Signature) == SubroundStatus::Finished {
                return SubroundStatus::Finished;
            }
            let (Some(group), Some(header)) = (&state.group, &state.header) else {
                return SubroundStatus::NotFinished;
            };

            // Equivalent proofs: collection continues into EndRound; the
            // window lapse moves things forward via extend.
            if self.ctx.model_for(header) == ConsensusModel::EquivalentProofs {
                return SubroundStatus::NotFinished;
            }

            let count = state.job_done_count(SubroundId::Signature);
            if count == group.len() {
                state.set_status(SubroundId::Signature, SubroundStatus::Finished);
                return SubroundStatus::Finished;
            }

            let threshold = self.ctx.effective_threshold(group, header);
            let own_done = self
                .ctx
                .signer
                .managed_public_keys()
                .iter()
                .filter_map(|key| group.position_of(key))
                .all(|position| state.is_job_done(position, SubroundId::Signature));
            if state.waiting_all_signatures_timeout && count >= threshold && own_done {
                state.set_status(SubroundId::Signature, SubroundStatus::Finished);
                return SubroundStatus::Finished;
            }
            if state.extend_called(SubroundId::Signature) {
                SubroundStatus::Extended
            } else {
                SubroundStatus::NotFinished
            }
        })
    }

    fn extend(&mut self) {
        self.ctx.state.with(|state| {
            state.mark_extend_called(SubroundId::Signature);
            let equivalent = state
                .header
                .as_ref()
                .is_some_and(|h| self.ctx.model_for(h) == ConsensusModel::EquivalentProofs);
            if equivalent {
                // Finalization happens in EndRound; the lapsed window just
                // hands over.
                state.set_status(SubroundId::Signature, SubroundStatus::Finished);
            } else {
                state.waiting_all_signatures_timeout = true;
            }
        });
        self.ctx.wake.notify_one();
    }

    fn cancel(&mut self) {
        self.ctx
            .state
            .with(|state| state.set_status(SubroundId::Signature, SubroundStatus::Canceled));
    }
}

/// Handle a SIGNATURE message from another validator.
fn on_signature_message(ctx: &SubroundContext, message: &ConsensusMessage) -> bool {
    let (group, data_hash) = ctx
        .state
        .with(|state| (state.group.clone(), state.data_hash));
    let Some(group) = group else {
        return false;
    };
    let Some(data_hash) = data_hash else {
        return false;
    };

    let Some(position) = group.position_of(&message.pub_key) else {
        debug!("signature share from a key outside the consensus group");
        return false;
    };
    if message.data_hash != data_hash.as_bytes() {
        debug!(position, "signature share over a different data hash");
        return false;
    }
    let already_done = ctx
        .state
        .with(|state| state.is_job_done(position, SubroundId::Signature));
    if already_done {
        // Duplicate; consumed without penalty.
        return true;
    }

    match ctx.signer.store_share(position, &message.signature_share) {
        Ok(()) => {}
        // Aggregation already started; the late share is irrelevant.
        Err(MultiSignerError::StoreSealed) => return true,
        Err(err) => {
            debug!(position, %err, "rejecting malformed signature share");
            return false;
        }
    }

    ctx.state.with(|state| {
        state.set_job_done(position, SubroundId::Signature);
        state.keep_signature_envelope(position, message.clone());
    });
    ctx.honesty
        .increase_score(&message.pub_key, "signature share received");
    true
}

pub(super) fn register_callbacks(worker: &mut Worker, ctx: SubroundContext) {
    worker.add_received_message_call(
        MessageType::Signature,
        Box::new(move |message| on_signature_message(&ctx, message)),
    );
}
