//! EndRound: aggregate shares, handle invalid signers, commit and
//! broadcast finality.
//!
//! Two behaviors share one handler. Legacy: the leader aggregates,
//! commits and broadcasts FINAL_INFO; participants commit on receipt.
//! Equivalent proofs: any participant that accumulates a quorum builds a
//! header proof, commits and hands the proof to the delayed broadcaster.

use super::{ConsensusModel, SubroundContext};
use crate::{ConsensusError, Worker};
use async_trait::async_trait;
use rondel_chronology::{SubroundHandler, SubroundId, SubroundSpec, SubroundStatus};
use rondel_messages::{
    decode_invalid_signers_payload, encode_invalid_signers_payload, ConsensusMessage, MessageType,
};
use rondel_types::{
    Body, ConsensusGroup, Hash, Header, HeaderAccessor, HeaderProof, SignatureBytes, SignerBitmap,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Progress of the end-of-round work within one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndRoundPhase {
    Processing,
    HandlingInvalidSigners,
    Finished,
    Canceled,
}

pub struct SubroundEndRound {
    spec: SubroundSpec,
    ctx: SubroundContext,
    phase: EndRoundPhase,
}

/// What the round agreed on, pulled out of shared state in one lock.
struct RoundAgreement {
    group: ConsensusGroup,
    data_hash: Hash,
    header: Header,
    body: Body,
}

impl SubroundEndRound {
    pub fn new(ctx: SubroundContext) -> Self {
        Self {
            spec: super::spec_of(SubroundId::EndRound),
            ctx,
            phase: EndRoundPhase::Processing,
        }
    }

    fn agreement(&self) -> Result<RoundAgreement, ConsensusError> {
        self.ctx.state.with(|state| {
            Ok(RoundAgreement {
                group: state.group.clone().ok_or(ConsensusError::MissingProposal)?,
                data_hash: state.data_hash.ok_or(ConsensusError::MissingProposal)?,
                header: state
                    .header
                    .clone()
                    .ok_or(ConsensusError::MissingProposal)?,
                body: state.body.clone().ok_or(ConsensusError::MissingProposal)?,
            })
        })
    }

    fn signature_bitmap(&self, group: &ConsensusGroup) -> Result<SignerBitmap, ConsensusError> {
        let mut bitmap = SignerBitmap::new(group.len());
        let positions = self
            .ctx
            .state
            .with(|state| state.job_done_positions(SubroundId::Signature));
        for position in positions {
            bitmap.set(position)?;
        }
        Ok(bitmap)
    }

    /// Batch-verify every share under the bitmap, falling back to
    /// per-share checks to name the positions whose shares fail.
    fn find_invalid_signers(&self, bitmap: &SignerBitmap, data_hash: &Hash) -> Vec<usize> {
        let positions: Vec<usize> = bitmap.set_positions().collect();
        match self
            .ctx
            .signer
            .verify_shares_with_fallback(&positions, data_hash.as_bytes())
        {
            Ok(()) => Vec::new(),
            Err(invalid) => invalid,
        }
    }

    fn broadcast_invalid_signers(
        &self,
        agreement: &RoundAgreement,
        invalid: &[usize],
    ) -> Result<(), ConsensusError> {
        let envelopes: Vec<ConsensusMessage> = self.ctx.state.with(|state| {
            invalid
                .iter()
                .filter_map(|position| state.signature_envelope(*position).cloned())
                .collect()
        });
        let payload = encode_invalid_signers_payload(&envelopes)?;
        let sender = self
            .ctx
            .managed_positions(&agreement.group)
            .first()
            .map(|(_, key)| key.clone())
            .unwrap_or_default();
        let message = ConsensusMessage {
            data_hash: agreement.data_hash.as_bytes().to_vec(),
            pub_key: sender,
            message_type: MessageType::InvalidSigners.as_wire(),
            round_index: agreement.header.round().0,
            chain_id: self.ctx.config.chain_id.clone(),
            invalid_signers_payload: payload,
            ..Default::default()
        };
        self.ctx.messenger.broadcast_consensus_message(&message)
    }

    /// Aggregate over the bitmap, weeding out invalid signers on failure.
    /// Implements Processing -> HandlingInvalidSigners -> Processing with
    /// a single retry pass per invalid-signer discovery.
    fn aggregate_with_retry(
        &mut self,
        agreement: &RoundAgreement,
        mut bitmap: SignerBitmap,
    ) -> Result<(SignerBitmap, SignatureBytes), ConsensusError> {
        let epoch = agreement.header.epoch();
        let threshold = self
            .ctx
            .effective_threshold(&agreement.group, &agreement.header);
        loop {
            self.phase = EndRoundPhase::Processing;
            let aggregate = self.ctx.signer.aggregate(&bitmap, epoch)?;
            self.ctx.signer.set_aggregated(&aggregate)?;
            if self
                .ctx
                .signer
                .verify_aggregate_over(agreement.data_hash.as_bytes(), &bitmap)
                .is_ok()
            {
                return Ok((bitmap, aggregate));
            }

            self.phase = EndRoundPhase::HandlingInvalidSigners;
            warn!("aggregate failed verification, scanning for invalid signers");
            let invalid = self.find_invalid_signers(&bitmap, &agreement.data_hash);
            if invalid.is_empty() {
                self.phase = EndRoundPhase::Canceled;
                return Err(ConsensusError::AggregationFailed);
            }
            self.broadcast_invalid_signers(agreement, &invalid)?;
            for position in &invalid {
                bitmap.clear(*position)?;
                self.ctx.stats.invalid_signature_share();
                if let Some(key) = agreement.group.key_at(*position) {
                    self.ctx
                        .honesty
                        .decrease_score(key, "invalid signature share");
                }
                self.ctx.state.with(|state| {
                    state.clear_job_done(*position, SubroundId::Signature)
                });
            }
            if bitmap.count_set() < threshold {
                self.phase = EndRoundPhase::Canceled;
                return Err(ConsensusError::NotEnoughSignatures {
                    have: bitmap.count_set(),
                    need: threshold,
                });
            }
        }
    }

    fn commit(&mut self, header: &Header, body: &Body) -> Result<(), ConsensusError> {
        if let Err(err) = self.ctx.processor.commit_block(header, body) {
            self.ctx.processor.revert_current_block();
            self.phase = EndRoundPhase::Canceled;
            return Err(ConsensusError::CommitFailed(err.to_string()));
        }
        Ok(())
    }

    /// Legacy leader: aggregate, commit, broadcast FINAL_INFO.
    fn leader_finalize(&mut self, agreement: RoundAgreement) -> Result<(), ConsensusError> {
        let threshold = self
            .ctx
            .effective_threshold(&agreement.group, &agreement.header);
        let bitmap = self.signature_bitmap(&agreement.group)?;
        if bitmap.count_set() < threshold {
            return Err(ConsensusError::NotEnoughSignatures {
                have: bitmap.count_set(),
                need: threshold,
            });
        }

        let (bitmap, aggregate) = self.aggregate_with_retry(&agreement, bitmap)?;

        let mut header = agreement.header.clone();
        header.set_signature_data(bitmap.as_bytes().to_vec(), aggregate.clone());
        let leader_key = agreement.group.leader().clone();
        let signed_hash = header.hash()?;
        let leader_signature = self
            .ctx
            .signer
            .sign_with_key(&leader_key, signed_hash.as_bytes())?;
        header.set_leader_signature(leader_signature.clone());

        self.ctx.processor.leader_pre_commit(&header)?;
        self.commit(&header, &agreement.body)?;

        let message = ConsensusMessage {
            data_hash: agreement.data_hash.as_bytes().to_vec(),
            bitmap: bitmap.as_bytes().to_vec(),
            aggregate_signature: aggregate,
            leader_signature,
            pub_key: leader_key.clone(),
            message_type: MessageType::FinalInfo.as_wire(),
            round_index: header.round().0,
            chain_id: self.ctx.config.chain_id.clone(),
            ..Default::default()
        };
        self.ctx.messenger.broadcast_consensus_message(&message)?;
        self.ctx.messenger.broadcast_header(&header, &leader_key)?;

        info!(
            round = %header.round(),
            nonce = %header.nonce(),
            signers = bitmap.count_set(),
            "block committed and final info broadcast"
        );
        self.finish_round(header);
        Ok(())
    }

    /// Equivalent proofs: wait for a quorum, then any participant
    /// finalizes.
    async fn participant_finalize(
        &mut self,
        agreement: RoundAgreement,
    ) -> Result<(), ConsensusError> {
        if !self.wait_for_signal_sync(&agreement).await {
            return Err(ConsensusError::TimeIsOut);
        }

        let bitmap = self.signature_bitmap(&agreement.group)?;
        if !bitmap.proposer_included() {
            // Bit 0 is mandatory under equivalent proofs.
            return Err(ConsensusError::NotEnoughSignatures {
                have: bitmap.count_set(),
                need: self
                    .ctx
                    .effective_threshold(&agreement.group, &agreement.header),
            });
        }
        let (bitmap, aggregate) = self.aggregate_with_retry(&agreement, bitmap)?;

        let proof = HeaderProof {
            bitmap: bitmap.as_bytes().to_vec(),
            aggregated_signature: aggregate.clone(),
            header_hash: agreement.data_hash,
            header_epoch: agreement.header.epoch(),
            header_nonce: agreement.header.nonce(),
            header_shard: agreement.header.shard(),
        };
        let fresh = self.ctx.proof_pool.add_proof(proof.clone());
        if !fresh {
            debug!(header_hash = %proof.header_hash, "proof already pooled");
        }

        let mut header = agreement.header.clone();
        header.set_signature_data(bitmap.as_bytes().to_vec(), aggregate);
        if self.ctx.is_self_leader(&agreement.group) {
            self.ctx.processor.leader_pre_commit(&header)?;
        }
        // No leader signature travels in this mode.
        self.commit(&header, &agreement.body)?;

        if let Some((position, key)) = self.ctx.managed_positions(&agreement.group).first() {
            self.ctx
                .messenger
                .prepare_broadcast_equivalent_proof(&proof, *position, key)?;
        }
        self.ctx.stats.proof_finalized();

        info!(
            round = %header.round(),
            nonce = %header.nonce(),
            signers = bitmap.count_set(),
            "block committed via header proof"
        );
        self.finish_round(header);
        Ok(())
    }

    /// Poll for a signature quorum, giving up at the configured fraction
    /// of the subround window.
    async fn wait_for_signal_sync(&self, agreement: &RoundAgreement) -> bool {
        if self.quorum_reached(agreement) {
            return true;
        }

        let window = self
            .ctx
            .rounder
            .time_duration()
            .mul_f64(self.spec.end_fraction - self.spec.start_fraction);
        let patience = window.mul_f64(self.ctx.config.waiting_all_sigs_max_threshold);
        let waiter_state = self.ctx.state.clone();
        let waiter_wake = Arc::clone(&self.ctx.wake);
        let waiter = tokio::spawn(async move {
            tokio::time::sleep(patience).await;
            waiter_state.with(|state| state.waiting_all_signatures_timeout = true);
            waiter_wake.notify_one();
        });

        let tick = self
            .ctx
            .config
            .time_between_signatures_checks
            .max(Duration::from_millis(1));
        let outcome = loop {
            if self.quorum_reached(agreement) {
                break true;
            }
            let timed_out = self
                .ctx
                .state
                .with(|state| state.waiting_all_signatures_timeout);
            if timed_out {
                break false;
            }
            tokio::time::sleep(tick).await;
        };
        waiter.abort();
        outcome
    }

    fn quorum_reached(&self, agreement: &RoundAgreement) -> bool {
        let threshold = self
            .ctx
            .effective_threshold(&agreement.group, &agreement.header);
        self.ctx.state.with(|state| {
            state.job_done_count(SubroundId::Signature) >= threshold
                && state.is_job_done(0, SubroundId::Signature)
        })
    }

    fn finish_round(&mut self, header: Header) {
        self.phase = EndRoundPhase::Finished;
        self.ctx.state.with(|state| {
            state.header = Some(header);
            state.set_status(SubroundId::EndRound, SubroundStatus::Finished);
        });
        self.ctx.stats.round_committed();
        self.ctx.wake.notify_one();
    }
}

#[async_trait]
impl SubroundHandler for SubroundEndRound {
    fn id(&self) -> SubroundId {
        SubroundId::EndRound
    }

    fn spec(&self) -> SubroundSpec {
        self.spec
    }

    async fn do_job(&mut self, round: rondel_types::RoundIndex) -> bool {
        self.phase = EndRoundPhase::Processing;
        let canceled = self.ctx.state.with(|state| state.round_canceled);
        if canceled {
            self.phase = EndRoundPhase::Canceled;
            return false;
        }
        let agreement = match self.agreement() {
            Ok(agreement) => agreement,
            Err(err) => {
                warn!(%round, %err, "end-round without an agreed block");
                self.phase = EndRoundPhase::Canceled;
                self.ctx
                    .state
                    .with(|state| state.cancel_round(SubroundId::EndRound));
                return false;
            }
        };

        let model = self.ctx.model_for(&agreement.header);
        let outcome = match model {
            ConsensusModel::EquivalentProofs => self.participant_finalize(agreement).await,
            ConsensusModel::Legacy => {
                if self.ctx.is_self_leader(&agreement.group) {
                    self.leader_finalize(agreement)
                } else {
                    // Participants finish via the FINAL_INFO callback.
                    return true;
                }
            }
        };
        match outcome {
            Ok(()) => true,
            Err(err) => {
                warn!(%round, %err, "end-round job failed");
                self.phase = EndRoundPhase::Canceled;
                self.ctx
                    .state
                    .with(|state| state.cancel_round(SubroundId::EndRound));
                self.ctx.stats.round_canceled();
                false
            }
        }
    }

    fn do_check(&self) -> SubroundStatus {
        self.ctx.state.with(|state| {
            if state.round_canceled {
                return SubroundStatus::Canceled;
            }
            state.status(SubroundId::EndRound)
        })
    }

    fn extend(&mut self) {
        self.ctx.state.with(|state| {
            state.mark_extend_called(SubroundId::EndRound);
            if state.status(SubroundId::EndRound) != SubroundStatus::Finished {
                state.cancel_round(SubroundId::EndRound);
            }
        });
        if self.phase != EndRoundPhase::Finished {
            self.phase = EndRoundPhase::Canceled;
        }
    }

    fn cancel(&mut self) {
        self.phase = EndRoundPhase::Canceled;
        self.ctx
            .state
            .with(|state| state.set_status(SubroundId::EndRound, SubroundStatus::Canceled));
    }
}

/// Handle FINAL_INFO from the leader (legacy mode, participant side).
fn on_final_info(ctx: &SubroundContext, message: &ConsensusMessage) -> bool {
    let (group, data_hash, header, body) = ctx.state.with(|state| {
        (
            state.group.clone(),
            state.data_hash,
            state.header.clone(),
            state.body.clone(),
        )
    });
    let (Some(group), Some(data_hash), Some(header), Some(body)) =
        (group, data_hash, header, body)
    else {
        return false;
    };
    if !group.is_leader(&message.pub_key) {
        debug!("final info from a non-leader, dropping");
        return false;
    }
    if ctx.is_self_leader(&group) {
        // Own broadcast echoed back.
        return true;
    }
    if message.data_hash != data_hash.as_bytes() {
        return false;
    }

    let Ok(bitmap) = SignerBitmap::from_bytes(&message.bitmap, group.len()) else {
        return false;
    };
    let threshold = ctx.effective_threshold(&group, &header);
    if bitmap.count_set() < threshold {
        debug!(
            signers = bitmap.count_set(),
            threshold, "final info below quorum"
        );
        return false;
    }
    if ctx.signer.set_aggregated(&message.aggregate_signature).is_err() {
        return false;
    }
    if ctx
        .signer
        .verify_aggregate_over(data_hash.as_bytes(), &bitmap)
        .is_err()
    {
        debug!("final info aggregate failed verification");
        return false;
    }

    let mut final_header = header;
    final_header.set_signature_data(
        message.bitmap.clone(),
        message.aggregate_signature.clone(),
    );
    final_header.set_leader_signature(message.leader_signature.clone());
    if ctx.verifier.verify_leader_signature(&final_header).is_err() {
        debug!("final info leader signature failed verification");
        return false;
    }

    if let Err(err) = ctx.processor.commit_block(&final_header, &body) {
        warn!(%err, "commit on final info failed");
        ctx.processor.revert_current_block();
        ctx.state
            .with(|state| state.cancel_round(SubroundId::EndRound));
        return false;
    }

    ctx.state.with(|state| {
        state.header = Some(final_header);
        state.set_status(SubroundId::EndRound, SubroundStatus::Finished);
    });
    ctx.stats.round_committed();
    ctx.honesty
        .increase_score(&message.pub_key, "valid final info");
    true
}

/// Handle an INVALID_SIGNERS accusation: check the carried envelopes and
/// penalize whoever the evidence convicts.
fn on_invalid_signers(ctx: &SubroundContext, message: &ConsensusMessage) -> bool {
    let (group, data_hash) = ctx
        .state
        .with(|state| (state.group.clone(), state.data_hash));
    let (Some(group), Some(data_hash)) = (group, data_hash) else {
        return false;
    };

    let Ok(envelopes) = decode_invalid_signers_payload(&message.invalid_signers_payload) else {
        return false;
    };
    if envelopes.is_empty() {
        return false;
    }

    let mut confirmed = 0usize;
    for envelope in &envelopes {
        let Some(position) = group.position_of(&envelope.pub_key) else {
            continue;
        };
        let genuinely_invalid = ctx
            .signer
            .verify_single(
                &envelope.pub_key,
                data_hash.as_bytes(),
                &envelope.signature_share,
            )
            .is_err();
        if genuinely_invalid {
            confirmed += 1;
            ctx.stats.invalid_signature_share();
            ctx.honesty
                .decrease_score(&envelope.pub_key, "invalid signature share");
            ctx.state
                .with(|state| state.clear_job_done(position, SubroundId::Signature));
        }
    }

    if confirmed == 0 {
        // Every accused share verified; the accusation itself is the
        // misbehavior.
        ctx.honesty
            .decrease_score(&message.pub_key, "false invalid-signers accusation");
        return false;
    }
    true
}

pub(super) fn register_callbacks(worker: &mut Worker, ctx: SubroundContext) {
    let for_final = ctx.clone();
    worker.add_received_message_call(
        MessageType::FinalInfo,
        Box::new(move |message| on_final_info(&for_final, message)),
    );
    worker.add_received_message_call(
        MessageType::InvalidSigners,
        Box::new(move |message| on_invalid_signers(&ctx, message)),
    );
}
