//! Consensus counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters over the life of the engine. Shared by reference
/// between the chronology task and the worker.
#[derive(Debug, Default)]
pub struct ConsensusStats {
    rounds_started: AtomicU64,
    rounds_committed: AtomicU64,
    rounds_canceled: AtomicU64,
    messages_accepted: AtomicU64,
    messages_rejected: AtomicU64,
    invalid_signature_shares: AtomicU64,
    proofs_finalized: AtomicU64,
}

impl ConsensusStats {
    pub fn round_started(&self) {
        self.rounds_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn round_committed(&self) {
        self.rounds_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn round_canceled(&self) {
        self.rounds_canceled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_accepted(&self) {
        self.messages_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_rejected(&self) {
        self.messages_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invalid_signature_share(&self) {
        self.invalid_signature_shares.fetch_add(1, Ordering::Relaxed);
    }

    pub fn proof_finalized(&self) {
        self.proofs_finalized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rounds_started_count(&self) -> u64 {
        self.rounds_started.load(Ordering::Relaxed)
    }

    pub fn rounds_committed_count(&self) -> u64 {
        self.rounds_committed.load(Ordering::Relaxed)
    }

    pub fn rounds_canceled_count(&self) -> u64 {
        self.rounds_canceled.load(Ordering::Relaxed)
    }

    pub fn messages_accepted_count(&self) -> u64 {
        self.messages_accepted.load(Ordering::Relaxed)
    }

    pub fn messages_rejected_count(&self) -> u64 {
        self.messages_rejected.load(Ordering::Relaxed)
    }

    pub fn invalid_signature_share_count(&self) -> u64 {
        self.invalid_signature_shares.load(Ordering::Relaxed)
    }

    pub fn proofs_finalized_count(&self) -> u64 {
        self.proofs_finalized.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = ConsensusStats::default();
        stats.round_started();
        stats.round_started();
        stats.round_committed();
        stats.round_canceled();
        assert_eq!(stats.rounds_started_count(), 2);
        assert_eq!(stats.rounds_committed_count(), 1);
        assert_eq!(stats.rounds_canceled_count(), 1);
        assert_eq!(stats.messages_accepted_count(), 0);
    }
}
