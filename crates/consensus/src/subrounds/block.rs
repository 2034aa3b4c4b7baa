//! Block subround: leader proposes, participants speculatively process.

use super::{ConsensusModel, SubroundContext};
use crate::{ConsensusError, Worker};
use async_trait::async_trait;
use rondel_chronology::{SubroundHandler, SubroundId, SubroundSpec, SubroundStatus};
use rondel_messages::{CodecError, ConsensusMessage, MessageType};
use rondel_types::{Body, Header, HeaderAccessor, Nonce, RoundIndex};
use tracing::{debug, info, warn};

pub struct SubroundBlock {
    spec: SubroundSpec,
    ctx: SubroundContext,
}

impl SubroundBlock {
    pub fn new(ctx: SubroundContext) -> Self {
        Self {
            spec: super::spec_of(SubroundId::Block),
            ctx,
        }
    }

    fn try_job(&self, round: RoundIndex) -> Result<(), ConsensusError> {
        let group = self
            .ctx
            .state
            .with(|state| state.group.clone())
            .ok_or(ConsensusError::MissingProposal)?;
        if !self.ctx.is_self_leader(&group) {
            // Participants have no job here; the proposal arrives as a
            // message.
            return Ok(());
        }

        let head = self.ctx.chain.current_header();
        let header = self
            .ctx
            .processor
            .create_new_header(round, Nonce(head.nonce().0 + 1))?;
        let have_time = self.ctx.window_remaining(SubroundId::Block);
        let (header, body) = self.ctx.processor.create_block(header, have_time)?;
        header.check_chain_id(&self.ctx.config.chain_id)?;

        let data_hash = header.hash_for_signing()?;
        let leader_key = group.leader().clone();
        let model = self.ctx.model_for(&header);

        let mut message = ConsensusMessage {
            data_hash: data_hash.as_bytes().to_vec(),
            header: sbor::basic_encode(&header)
                .map_err(|e| CodecError::SborEncode(format!("{e:?}")))?,
            body: sbor::basic_encode(&body)
                .map_err(|e| CodecError::SborEncode(format!("{e:?}")))?,
            pub_key: leader_key.clone(),
            message_type: MessageType::BlockBodyAndHeader.as_wire(),
            round_index: round.0,
            chain_id: self.ctx.config.chain_id.clone(),
            ..Default::default()
        };

        // Under equivalent proofs the leader's share rides along with the
        // proposal instead of a separate SIGNATURE broadcast.
        if model == ConsensusModel::EquivalentProofs {
            let share = self.ctx.signer.create_share_for_public_key(
                data_hash.as_bytes(),
                0,
                header.epoch(),
                &leader_key,
            )?;
            message.signature_share = share;
        }

        self.ctx
            .messenger
            .broadcast_block_data_leader(&header, &body, &leader_key)?;
        self.ctx.messenger.broadcast_consensus_message(&message)?;
        info!(%round, nonce = %header.nonce(), %data_hash, "proposed block");

        let managed = self.ctx.managed_positions(&group);
        self.ctx.state.with(|state| {
            state.data_hash = Some(data_hash);
            state.header = Some(header);
            state.body = Some(body);
            for (position, _) in &managed {
                state.set_job_done(*position, SubroundId::Block);
            }
            if model == ConsensusModel::EquivalentProofs {
                state.set_job_done(0, SubroundId::Signature);
                state.keep_signature_envelope(0, message.clone());
            }
        });
        Ok(())
    }
}

#[async_trait]
impl SubroundHandler for SubroundBlock {
    fn id(&self) -> SubroundId {
        SubroundId::Block
    }

    fn spec(&self) -> SubroundSpec {
        self.spec
    }

    async fn do_job(&mut self, round: RoundIndex) -> bool {
        let canceled = self.ctx.state.with(|state| state.round_canceled);
        if canceled {
            return false;
        }
        match self.try_job(round) {
            Ok(()) => true,
            Err(err) => {
                warn!(%round, %err, "block job failed");
                self.ctx
                    .state
                    .with(|state| state.cancel_round(SubroundId::Block));
                false
            }
        }
    }

    fn do_check(&self) -> SubroundStatus {
        self.ctx.state.with(|state| {
            if state.round_canceled {
                return SubroundStatus::Canceled;
            }
            let Some(group) = &state.group else {
                return SubroundStatus::NotFinished;
            };
            let proposal_known = state.header.is_some() && state.body.is_some();
            let own_done = self
                .ctx
                .signer
                .managed_public_keys()
                .iter()
                .filter_map(|key| group.position_of(key))
                .all(|position| state.is_job_done(position, SubroundId::Block));
            if proposal_known && own_done {
                state.set_status(SubroundId::Block, SubroundStatus::Finished);
                SubroundStatus::Finished
            } else {
                SubroundStatus::NotFinished
            }
        })
    }

    fn extend(&mut self) {
        self.ctx.state.with(|state| {
            state.mark_extend_called(SubroundId::Block);
            if state.header.is_none() || state.body.is_none() {
                state.cancel_round(SubroundId::Block);
            }
        });
    }

    fn cancel(&mut self) {
        self.ctx
            .state
            .with(|state| state.set_status(SubroundId::Block, SubroundStatus::Canceled));
    }
}

/// Handle a block proposal from the leader.
fn on_block_message(ctx: &SubroundContext, message: &ConsensusMessage) -> bool {
    let group = match ctx.state.with(|state| state.group.clone()) {
        Some(group) => group,
        None => return false,
    };
    if !group.is_leader(&message.pub_key) {
        debug!("block proposal from a non-leader, dropping");
        return false;
    }

    // Own proposal echoed back by the transport.
    if ctx.is_self_leader(&group) {
        return ctx.state.with(|state| state.header.is_some());
    }

    let Ok(header) = sbor::basic_decode::<Header>(&message.header) else {
        return false;
    };
    let Ok(body) = sbor::basic_decode::<Body>(&message.body) else {
        return false;
    };
    if header.check_chain_id(&ctx.config.chain_id).is_err() {
        return false;
    }
    let Ok(data_hash) = header.hash_for_signing() else {
        return false;
    };
    if message.data_hash != data_hash.as_bytes() {
        debug!("proposal data hash does not match the header");
        return false;
    }

    let have_time = ctx.window_remaining(SubroundId::Block);
    if let Err(err) = ctx.processor.process_block(&header, &body, have_time) {
        warn!(%err, "speculative processing of the proposal failed");
        ctx.state.with(|state| state.cancel_round(SubroundId::Block));
        return false;
    }

    let model = ctx.model_for(&header);
    let leader_share_ok = model == ConsensusModel::EquivalentProofs
        && !message.signature_share.is_empty()
        && ctx
            .signer
            .verify_single(
                &message.pub_key,
                data_hash.as_bytes(),
                &message.signature_share,
            )
            .is_ok()
        && ctx
            .signer
            .store_share(0, &message.signature_share)
            .is_ok();

    let managed = ctx.managed_positions(&group);
    ctx.state.with(|state| {
        state.data_hash = Some(data_hash);
        state.header = Some(header);
        state.body = Some(body);
        state.set_job_done(0, SubroundId::Block);
        for (position, _) in &managed {
            state.set_job_done(*position, SubroundId::Block);
        }
        if leader_share_ok {
            state.set_job_done(0, SubroundId::Signature);
            state.keep_signature_envelope(0, message.clone());
        }
    });
    ctx.honesty
        .increase_score(&message.pub_key, "valid block proposal");
    true
}

pub(super) fn register_callbacks(worker: &mut Worker, ctx: SubroundContext) {
    let for_combined = ctx.clone();
    worker.add_received_message_call(
        MessageType::BlockBodyAndHeader,
        Box::new(move |message| on_block_message(&for_combined, message)),
    );
    // Split header/body transport modes reuse the combined handler; a
    // header-only message simply fails body decoding and is dropped until
    // the combined form arrives.
    worker.add_received_message_call(
        MessageType::BlockHeader,
        Box::new(move |message| on_block_message(&ctx, message)),
    );
}
