//! Inbound consensus message handling.
//!
//! The worker validates envelopes, dispatches them to per-type callbacks
//! registered by the subround handlers, and buffers messages that arrive
//! before their subround is active. Callbacks run on the caller's task and
//! must not block.

use crate::{ConsensusConfig, ConsensusError, ConsensusStats, PeerHonesty, SharedConsensusState};
use rondel_chronology::{Chronology, SubroundId};
use rondel_messages::{decode_message, ConsensusMessage, MessageType};
use rondel_types::RoundIndex;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

/// A registered message callback. Returns true when the message was
/// consumed.
pub type MessageCallback = Box<dyn FnMut(&ConsensusMessage) -> bool + Send>;

/// The subround a message type belongs to, `None` for types no subround
/// handles.
fn subround_for(message_type: MessageType) -> Option<SubroundId> {
    match message_type {
        MessageType::BlockBodyAndHeader | MessageType::BlockBody | MessageType::BlockHeader => {
            Some(SubroundId::Block)
        }
        MessageType::Signature => Some(SubroundId::Signature),
        MessageType::FinalInfo | MessageType::InvalidSigners => Some(SubroundId::EndRound),
        MessageType::Unknown => None,
    }
}

/// Inbound message validator and dispatcher.
pub struct Worker {
    config: ConsensusConfig,
    state: SharedConsensusState,
    honesty: Arc<dyn PeerHonesty>,
    stats: Arc<ConsensusStats>,
    /// Wakes the chronology task when a callback consumed a message.
    wake: Arc<Notify>,
    callbacks: HashMap<MessageType, Vec<MessageCallback>>,
    /// Messages ahead of their subround, keyed by (round, type). Bounded
    /// per key; oldest dropped when full.
    buffered: HashMap<(RoundIndex, MessageType), VecDeque<ConsensusMessage>>,
    current_round: RoundIndex,
    active_subround: SubroundId,
}

impl Worker {
    pub fn new(
        config: ConsensusConfig,
        state: SharedConsensusState,
        honesty: Arc<dyn PeerHonesty>,
        stats: Arc<ConsensusStats>,
        wake: Arc<Notify>,
    ) -> Result<Self, ConsensusError> {
        config.validate()?;
        Ok(Self {
            config,
            state,
            honesty,
            stats,
            wake,
            callbacks: HashMap::new(),
            buffered: HashMap::new(),
            current_round: RoundIndex(0),
            active_subround: SubroundId::StartRound,
        })
    }

    /// Register a callback for a message type. Multiple callbacks per type
    /// are invoked in registration order until one consumes the message.
    pub fn add_received_message_call(
        &mut self,
        message_type: MessageType,
        callback: MessageCallback,
    ) {
        self.callbacks.entry(message_type).or_default().push(callback);
    }

    /// Advance to a new (round, subround) and replay any buffered messages
    /// that became deliverable.
    pub fn set_active_subround(&mut self, round: RoundIndex, subround: SubroundId) {
        if round != self.current_round {
            // Buffered traffic for past rounds is dead.
            self.buffered.retain(|(r, _), _| *r >= round);
            self.current_round = round;
        }
        self.active_subround = subround;
        self.replay_buffered();
    }

    /// Decode and handle raw bytes from the transport.
    pub fn receive_bytes(&mut self, bytes: &[u8]) -> Result<(), ConsensusError> {
        let message = match decode_message(bytes) {
            Ok(message) => message,
            Err(err) => {
                self.stats.message_rejected();
                warn!(%err, "dropping undecodable consensus message");
                return Err(err.into());
            }
        };
        self.receive_message(message)
    }

    /// Handle a decoded envelope: validate, then dispatch or buffer.
    pub fn receive_message(&mut self, message: ConsensusMessage) -> Result<(), ConsensusError> {
        if let Err(err) = self.validate_envelope(&message) {
            self.stats.message_rejected();
            if !message.pub_key.is_empty() {
                self.honesty
                    .decrease_score(&message.pub_key, "invalid consensus envelope");
            }
            debug!(
                %err,
                message_type = %message.message_type(),
                round = message.round_index,
                "rejected consensus message"
            );
            return Err(err);
        }

        let message_type = message.message_type();
        let round = message.round();

        if round < self.current_round {
            self.stats.message_rejected();
            trace!(
                message_type = %message_type,
                round = round.0,
                current = self.current_round.0,
                "dropping stale consensus message"
            );
            return Err(ConsensusError::StaleRound(round));
        }

        // Subround ordering: never run a callback before its subround is
        // active.
        let target = subround_for(message_type)
            .ok_or(ConsensusError::MalformedMessage(message_type))?;
        if round > self.current_round || target > self.active_subround {
            self.buffer(round, message_type, message);
            return Ok(());
        }

        self.dispatch(&message);
        Ok(())
    }

    fn validate_envelope(&self, message: &ConsensusMessage) -> Result<(), ConsensusError> {
        if message.message_type() == MessageType::Unknown {
            return Err(ConsensusError::MalformedMessage(MessageType::Unknown));
        }
        if message.chain_id != self.config.chain_id {
            return Err(ConsensusError::ChainIdMismatch);
        }
        if message.pub_key.is_empty() {
            return Err(ConsensusError::MalformedMessage(message.message_type()));
        }
        Ok(())
    }

    fn buffer(&mut self, round: RoundIndex, message_type: MessageType, message: ConsensusMessage) {
        let queue = self.buffered.entry((round, message_type)).or_default();
        if queue.len() >= self.config.message_buffer_capacity {
            queue.pop_front();
        }
        queue.push_back(message);
        trace!(
            message_type = %message_type,
            round = round.0,
            "buffered consensus message for a later subround"
        );
    }

    fn replay_buffered(&mut self) {
        let round = self.current_round;
        let active = self.active_subround;
        let deliverable: Vec<(RoundIndex, MessageType)> = self
            .buffered
            .keys()
            .filter(|(r, t)| *r == round && subround_for(*t).is_some_and(|s| s <= active))
            .copied()
            .collect();
        for key in deliverable {
            if let Some(queue) = self.buffered.remove(&key) {
                for message in queue {
                    self.dispatch(&message);
                }
            }
        }
    }

    fn dispatch(&mut self, message: &ConsensusMessage) {
        let message_type = message.message_type();
        let Some(callbacks) = self.callbacks.get_mut(&message_type) else {
            self.stats.message_rejected();
            debug!(
                message_type = %message_type,
                "no callback registered for message type"
            );
            return;
        };
        let consumed = callbacks.iter_mut().any(|callback| callback(message));
        if consumed {
            self.stats.message_accepted();
            // One-slot latch: coalesced wakeups are fine, the chronology
            // task re-checks status after every wake.
            self.wake.notify_one();
        } else {
            self.stats.message_rejected();
            if !message.pub_key.is_empty() {
                self.honesty
                    .decrease_score(&message.pub_key, "message failed subround validation");
            }
        }
    }

    /// Shared state handle, for tests and subround wiring.
    pub fn state(&self) -> &SharedConsensusState {
        &self.state
    }
}

/// Keep a shared worker's (round, subround) position in step with the
/// scheduler, so messages buffered ahead of their subround replay as soon
/// as it opens. The transport side locks the same worker to feed inbound
/// bytes.
pub fn attach_worker(chronology: &mut Chronology, worker: Arc<Mutex<Worker>>) {
    chronology.on_transition(Box::new(move |round, subround| {
        worker
            .lock()
            .expect("consensus worker lock poisoned")
            .set_active_subround(round, subround);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HonestyTracker;
    use rondel_messages::encode_message;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_worker() -> (Worker, Arc<ConsensusStats>, Arc<HonestyTracker>) {
        let stats = Arc::new(ConsensusStats::default());
        let honesty = Arc::new(HonestyTracker::default());
        let worker = Worker::new(
            ConsensusConfig::default(),
            SharedConsensusState::new(4),
            Arc::clone(&honesty) as Arc<dyn PeerHonesty>,
            Arc::clone(&stats),
            Arc::new(Notify::new()),
        )
        .unwrap_or_else(|e| panic!("worker construction failed: {e}"));
        (worker, stats, honesty)
    }

    fn signature_message(round: i64) -> ConsensusMessage {
        ConsensusMessage {
            message_type: MessageType::Signature.as_wire(),
            round_index: round,
            chain_id: b"rondel".to_vec(),
            pub_key: vec![7; 4],
            signature_share: vec![1; 8],
            ..Default::default()
        }
    }

    #[test]
    fn test_chain_id_mismatch_rejected_and_penalized() {
        let (mut worker, stats, honesty) = test_worker();
        let mut msg = signature_message(0);
        msg.chain_id = b"other-chain".to_vec();
        let err = worker.receive_message(msg.clone());
        assert!(matches!(err, Err(ConsensusError::ChainIdMismatch)));
        assert_eq!(stats.messages_rejected_count(), 1);
        assert_eq!(honesty.score(&msg.pub_key), -1);
    }

    #[test]
    fn test_stale_round_dropped() {
        let (mut worker, _stats, _honesty) = test_worker();
        worker.set_active_subround(RoundIndex(5), SubroundId::Signature);
        let err = worker.receive_message(signature_message(3));
        assert!(matches!(err, Err(ConsensusError::StaleRound(RoundIndex(3)))));
    }

    #[test]
    fn test_future_subround_message_buffered_then_replayed() {
        let (mut worker, stats, _honesty) = test_worker();
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);
        worker.add_received_message_call(
            MessageType::Signature,
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            }),
        );
        worker.set_active_subround(RoundIndex(1), SubroundId::Block);

        // Signature subround not yet active: message must be buffered.
        worker
            .receive_message(signature_message(1))
            .unwrap_or_else(|e| panic!("buffering failed: {e}"));
        assert_eq!(delivered.load(Ordering::SeqCst), 0);

        worker.set_active_subround(RoundIndex(1), SubroundId::Signature);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        assert_eq!(stats.messages_accepted_count(), 1);
    }

    #[test]
    fn test_future_round_message_survives_round_change() {
        let (mut worker, _stats, _honesty) = test_worker();
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);
        worker.add_received_message_call(
            MessageType::Signature,
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            }),
        );
        worker.set_active_subround(RoundIndex(1), SubroundId::Signature);
        worker
            .receive_message(signature_message(2))
            .unwrap_or_else(|e| panic!("buffering failed: {e}"));
        assert_eq!(delivered.load(Ordering::SeqCst), 0);

        worker.set_active_subround(RoundIndex(2), SubroundId::Signature);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_buffer_capacity_drops_oldest() {
        let (mut worker, _stats, _honesty) = test_worker();
        let seen: Arc<std::sync::Mutex<Vec<Vec<u8>>>> = Arc::default();
        let sink = Arc::clone(&seen);
        worker.add_received_message_call(
            MessageType::Signature,
            Box::new(move |msg| {
                sink.lock()
                    .unwrap_or_else(|e| panic!("lock: {e}"))
                    .push(msg.signature_share.clone());
                true
            }),
        );
        let mut config = ConsensusConfig::default();
        config.message_buffer_capacity = 2;
        worker.config = config;

        worker.set_active_subround(RoundIndex(1), SubroundId::Block);
        for i in 0..3u8 {
            let mut msg = signature_message(1);
            msg.signature_share = vec![i];
            worker
                .receive_message(msg)
                .unwrap_or_else(|e| panic!("buffering failed: {e}"));
        }
        worker.set_active_subround(RoundIndex(1), SubroundId::Signature);
        let seen = seen.lock().unwrap_or_else(|e| panic!("lock: {e}"));
        assert_eq!(seen.as_slice(), &[vec![1u8], vec![2u8]]);
    }

    #[test]
    fn test_receive_bytes_round_trips_the_codec() {
        let (mut worker, stats, _honesty) = test_worker();
        worker.add_received_message_call(MessageType::Signature, Box::new(|_| true));
        worker.set_active_subround(RoundIndex(0), SubroundId::Signature);
        let bytes = encode_message(&signature_message(0))
            .unwrap_or_else(|e| panic!("encode failed: {e}"));
        worker
            .receive_bytes(&bytes)
            .unwrap_or_else(|e| panic!("receive failed: {e}"));
        assert_eq!(stats.messages_accepted_count(), 1);
    }

    #[test]
    fn test_unconsumed_message_penalizes_sender() {
        let (mut worker, stats, honesty) = test_worker();
        worker.add_received_message_call(MessageType::Signature, Box::new(|_| false));
        worker.set_active_subround(RoundIndex(0), SubroundId::Signature);
        let msg = signature_message(0);
        let key = msg.pub_key.clone();
        worker
            .receive_message(msg)
            .unwrap_or_else(|e| panic!("receive failed: {e}"));
        assert_eq!(stats.messages_rejected_count(), 1);
        assert_eq!(honesty.score(&key), -1);
    }
}
