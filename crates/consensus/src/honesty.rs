//! Peer honesty scoring.

use crate::traits::PeerHonesty;
use rondel_types::PubKeyBytes;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// In-memory honesty ledger. Scores move by one per event and are clamped
/// so a single burst cannot push a peer beyond recovery.
#[derive(Debug)]
pub struct HonestyTracker {
    scores: Mutex<HashMap<PubKeyBytes, i64>>,
    min_score: i64,
    max_score: i64,
}

impl Default for HonestyTracker {
    fn default() -> Self {
        Self::new(-100, 100)
    }
}

impl HonestyTracker {
    pub fn new(min_score: i64, max_score: i64) -> Self {
        Self {
            scores: Mutex::new(HashMap::new()),
            min_score,
            max_score,
        }
    }

    /// Current score of a peer, zero if never seen.
    pub fn score(&self, pub_key: &[u8]) -> i64 {
        self.scores
            .lock()
            .expect("honesty mutex poisoned")
            .get(pub_key)
            .copied()
            .unwrap_or(0)
    }

    fn bump(&self, pub_key: &[u8], delta: i64, reason: &'static str) {
        let mut scores = self.scores.lock().expect("honesty mutex poisoned");
        let entry = scores.entry(pub_key.to_vec()).or_insert(0);
        *entry = (*entry + delta).clamp(self.min_score, self.max_score);
        debug!(
            peer = %hex::encode(&pub_key[..pub_key.len().min(8)]),
            score = *entry,
            reason,
            "honesty score updated"
        );
    }
}

impl PeerHonesty for HonestyTracker {
    fn increase_score(&self, pub_key: &[u8], reason: &'static str) {
        self.bump(pub_key, 1, reason);
    }

    fn decrease_score(&self, pub_key: &[u8], reason: &'static str) {
        self.bump(pub_key, -1, reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scores_move_and_clamp() {
        let tracker = HonestyTracker::new(-2, 2);
        let key = b"peer-a".to_vec();
        assert_eq!(tracker.score(&key), 0);
        tracker.increase_score(&key, "valid share");
        tracker.increase_score(&key, "valid share");
        tracker.increase_score(&key, "valid share");
        assert_eq!(tracker.score(&key), 2);
        for _ in 0..10 {
            tracker.decrease_score(&key, "malformed message");
        }
        assert_eq!(tracker.score(&key), -2);
    }

    #[test]
    fn test_peers_are_independent() {
        let tracker = HonestyTracker::default();
        tracker.decrease_score(b"peer-a", "stale round");
        assert_eq!(tracker.score(b"peer-a"), -1);
        assert_eq!(tracker.score(b"peer-b"), 0);
    }
}
