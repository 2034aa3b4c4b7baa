//! Per-round consensus state.
//!
//! One `ConsensusState` exists per node per round. The chronology task is
//! its only long-lived mutator; message callbacks reach it through
//! [`SharedConsensusState`], which serializes access and holds the lock
//! only for the duration of each mutation.

use rondel_chronology::{SubroundId, SubroundStatus};
use rondel_messages::ConsensusMessage;
use rondel_types::{Body, ConsensusGroup, Hash, Header, RoundIndex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// The per-round mutable record.
#[derive(Debug, Default)]
pub struct ConsensusState {
    /// Round this state belongs to.
    pub round: RoundIndex,
    /// Identifier of the block proposed this round.
    pub data_hash: Option<Hash>,
    /// The proposed header.
    pub header: Option<Header>,
    /// The proposed body.
    pub body: Option<Body>,
    /// The consensus group for this round.
    pub group: Option<ConsensusGroup>,
    /// Per-subround job completion, by consensus-group position.
    job_done: HashMap<SubroundId, HashSet<usize>>,
    /// Per-subround status.
    status: HashMap<SubroundId, SubroundStatus>,
    /// The round was given up.
    pub round_canceled: bool,
    /// Latched when the signature wait deadline fired.
    pub waiting_all_signatures_timeout: bool,
    /// Headers received out of band (participant-side finalization).
    pub received_headers: Vec<Header>,
    /// Subrounds whose `extend` already ran this round.
    extended_called: HashSet<SubroundId>,
    /// Original signature envelopes by position, kept for the
    /// invalid-signers broadcast.
    signature_envelopes: HashMap<usize, ConsensusMessage>,
}

impl ConsensusState {
    /// Fresh state for a round.
    pub fn new(round: RoundIndex) -> Self {
        Self {
            round,
            ..Default::default()
        }
    }

    /// Reset for a new round, discarding everything from the previous one.
    pub fn reset(&mut self, round: RoundIndex) {
        *self = Self::new(round);
    }

    /// Record a validator's job completion for a subround.
    pub fn set_job_done(&mut self, position: usize, subround: SubroundId) {
        self.job_done.entry(subround).or_default().insert(position);
    }

    /// Withdraw a validator's job completion, used when its signature
    /// share turns out to be invalid.
    pub fn clear_job_done(&mut self, position: usize, subround: SubroundId) {
        if let Some(set) = self.job_done.get_mut(&subround) {
            set.remove(&position);
        }
    }

    /// Whether a validator completed a subround.
    pub fn is_job_done(&self, position: usize, subround: SubroundId) -> bool {
        self.job_done
            .get(&subround)
            .is_some_and(|set| set.contains(&position))
    }

    /// Number of validators that completed a subround.
    pub fn job_done_count(&self, subround: SubroundId) -> usize {
        self.job_done.get(&subround).map_or(0, |set| set.len())
    }

    /// Positions that completed a subround, unordered.
    pub fn job_done_positions(&self, subround: SubroundId) -> Vec<usize> {
        self.job_done
            .get(&subround)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Current status of a subround.
    pub fn status(&self, subround: SubroundId) -> SubroundStatus {
        self.status
            .get(&subround)
            .copied()
            .unwrap_or(SubroundStatus::NotFinished)
    }

    /// Set a subround's status. Finishing a subround requires every
    /// earlier subround to be Finished already; violations are a
    /// programming error upstream.
    pub fn set_status(&mut self, subround: SubroundId, status: SubroundStatus) {
        if status == SubroundStatus::Finished {
            debug_assert!(
                subround
                    .prev()
                    .is_none_or(|prev| self.status(prev) == SubroundStatus::Finished),
                "subround {subround} finished before its predecessor"
            );
        }
        self.status.insert(subround, status);
    }

    /// Mark the round canceled and the given subround Canceled.
    pub fn cancel_round(&mut self, at: SubroundId) {
        self.round_canceled = true;
        self.status.insert(at, SubroundStatus::Canceled);
    }

    /// Record that `extend` ran for a subround.
    pub fn mark_extend_called(&mut self, subround: SubroundId) {
        self.extended_called.insert(subround);
    }

    /// Whether `extend` ran for a subround.
    pub fn extend_called(&self, subround: SubroundId) -> bool {
        self.extended_called.contains(&subround)
    }

    /// Keep a signature envelope for a potential invalid-signers
    /// broadcast.
    pub fn keep_signature_envelope(&mut self, position: usize, envelope: ConsensusMessage) {
        self.signature_envelopes.insert(position, envelope);
    }

    /// The kept envelope for a position.
    pub fn signature_envelope(&self, position: usize) -> Option<&ConsensusMessage> {
        self.signature_envelopes.get(&position)
    }

    /// Leader position 0 convenience: whether the leader completed a
    /// subround.
    pub fn leader_job_done(&self, subround: SubroundId) -> bool {
        self.is_job_done(0, subround)
    }

    /// Size of the consensus group, zero before StartRound derives it.
    pub fn group_size(&self) -> usize {
        self.group.as_ref().map_or(0, |g| g.len())
    }

    /// Snapshot for the debugging archive.
    pub fn snapshot(&self) -> RoundSnapshot {
        RoundSnapshot {
            round: self.round,
            data_hash: self.data_hash,
            canceled: self.round_canceled,
            signature_count: self.job_done_count(SubroundId::Signature),
            group_size: self.group_size(),
        }
    }
}

/// Compact record of a finished round, kept in a ring buffer for
/// debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundSnapshot {
    pub round: RoundIndex,
    pub data_hash: Option<Hash>,
    pub canceled: bool,
    pub signature_count: usize,
    pub group_size: usize,
}

/// Shared handle over the consensus state.
///
/// Clones are cheap; the mutex is held only for the duration of each
/// closure, never across I/O or awaits.
#[derive(Clone, Default)]
pub struct SharedConsensusState {
    inner: Arc<Mutex<ConsensusState>>,
    snapshots: Arc<Mutex<VecDeque<RoundSnapshot>>>,
    snapshot_capacity: usize,
}

impl SharedConsensusState {
    /// New shared state with a snapshot ring of the given capacity.
    pub fn new(snapshot_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ConsensusState::default())),
            snapshots: Arc::new(Mutex::new(VecDeque::new())),
            snapshot_capacity,
        }
    }

    /// Run a closure under the state lock.
    pub fn with<R>(&self, f: impl FnOnce(&mut ConsensusState) -> R) -> R {
        let mut guard = self.lock();
        f(&mut guard)
    }

    fn lock(&self) -> MutexGuard<'_, ConsensusState> {
        self.inner.lock().expect("consensus state mutex poisoned")
    }

    /// Archive the current round and reset for a new one.
    pub fn archive_and_reset(&self, round: RoundIndex) {
        let snapshot = self.with(|state| {
            let snapshot = state.snapshot();
            state.reset(round);
            snapshot
        });
        let mut ring = self.snapshots.lock().expect("snapshot mutex poisoned");
        if ring.len() == self.snapshot_capacity && self.snapshot_capacity > 0 {
            ring.pop_front();
        }
        if self.snapshot_capacity > 0 {
            ring.push_back(snapshot);
        }
    }

    /// The archived snapshots, oldest first.
    pub fn snapshots(&self) -> Vec<RoundSnapshot> {
        self.snapshots
            .lock()
            .expect("snapshot mutex poisoned")
            .iter()
            .cloned()
            .collect()
    }
}
