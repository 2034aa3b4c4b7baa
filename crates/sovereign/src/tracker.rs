//! Tracking of main-chain headers observed by a sovereign node.
//!
//! The tracker keeps the extended headers received from the main chain in
//! nonce order and knows the last cross-notarized one. The block processor
//! pulls the longest gap-free run above it for inclusion, and pushes the
//! notarization forward on commit. Missing nonces are requested from the
//! network through [`HeaderRequester`].

use rondel_types::{
    ExtendedShardHeader, Hash, Header, Nonce, ShardHeader, ShardId, EXTENDED_GENESIS_MARKER,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

/// Outbound requests for extended headers this node has not received.
pub trait HeaderRequester: Send + Sync {
    fn request_extended_header(&self, nonce: Nonce);
}

/// The reserved placeholder entry the tracker is seeded with: nonce 0 and
/// the genesis marker as chain id.
pub fn genesis_placeholder() -> ExtendedShardHeader {
    let mut base = ShardHeader::zeroed();
    base.chain_id = EXTENDED_GENESIS_MARKER.to_vec();
    ExtendedShardHeader {
        header: Header::Shard(base),
        incoming_mini_blocks: Vec::new(),
    }
}

struct TrackerState {
    /// Received extended headers above the last notarized nonce.
    tracked: BTreeMap<Nonce, (ExtendedShardHeader, Hash)>,
    last_notarized_nonce: Nonce,
    last_notarized_hash: Hash,
}

pub struct CrossChainTracker {
    requester: Arc<dyn HeaderRequester>,
    inner: Mutex<TrackerState>,
}

impl CrossChainTracker {
    pub fn new(requester: Arc<dyn HeaderRequester>) -> Self {
        let placeholder = genesis_placeholder();
        let hash = placeholder.hash();
        Self {
            requester,
            inner: Mutex::new(TrackerState {
                tracked: BTreeMap::new(),
                last_notarized_nonce: Nonce::GENESIS,
                last_notarized_hash: hash,
            }),
        }
    }

    /// Record an extended header received from the main chain. Entries at
    /// or below the last notarized nonce are already settled and dropped.
    pub fn add_tracked_header(&self, header: ExtendedShardHeader, hash: Hash) {
        let nonce = header.nonce();
        let mut state = self.inner.lock().expect("tracker lock poisoned");
        if nonce <= state.last_notarized_nonce {
            trace!(%nonce, "dropping extended header at or below notarization");
            return;
        }
        state.tracked.insert(nonce, (header, hash));
    }

    /// Advance the last cross-notarized marker. `shard` names the observed
    /// chain; the sovereign overlay tracks exactly one.
    pub fn add_cross_notarized_header(
        &self,
        shard: ShardId,
        header: &ExtendedShardHeader,
        hash: Hash,
    ) {
        let nonce = header.nonce();
        let mut state = self.inner.lock().expect("tracker lock poisoned");
        if nonce > state.last_notarized_nonce {
            debug!(%shard, %nonce, "cross-notarization advanced");
            state.last_notarized_nonce = nonce;
            state.last_notarized_hash = hash;
        }
    }

    /// The longest gap-free run of tracked headers starting right above
    /// the last notarized nonce, as (headers, hashes) in nonce order.
    /// When a gap blocks further progress and later headers exist, the
    /// missing nonce is requested.
    pub fn compute_longest_extended_chain_from_last_notarized(
        &self,
    ) -> (Vec<ExtendedShardHeader>, Vec<Hash>) {
        let state = self.inner.lock().expect("tracker lock poisoned");
        let mut headers = Vec::new();
        let mut hashes = Vec::new();
        let mut next = Nonce(state.last_notarized_nonce.0 + 1);
        while let Some((header, hash)) = state.tracked.get(&next) {
            headers.push(header.clone());
            hashes.push(*hash);
            next = Nonce(next.0 + 1);
        }
        let has_later = state
            .tracked
            .keys()
            .next_back()
            .is_some_and(|highest| *highest > next);
        drop(state);
        if has_later {
            debug!(missing = %next, "gap in tracked extended headers");
            self.requester.request_extended_header(next);
        }
        (headers, hashes)
    }

    /// Discard every tracked header at or below the last notarized nonce.
    pub fn remove_last_notarized_headers(&self) {
        let mut state = self.inner.lock().expect("tracker lock poisoned");
        let last = state.last_notarized_nonce;
        state.tracked.retain(|nonce, _| *nonce > last);
    }

    /// Look up a tracked header by its hash.
    pub fn header_by_hash(&self, hash: &Hash) -> Option<ExtendedShardHeader> {
        let state = self.inner.lock().expect("tracker lock poisoned");
        state
            .tracked
            .values()
            .find(|(_, h)| h == hash)
            .map(|(header, _)| header.clone())
    }

    pub fn last_notarized_nonce(&self) -> Nonce {
        self.inner
            .lock()
            .expect("tracker lock poisoned")
            .last_notarized_nonce
    }

    pub fn last_notarized_hash(&self) -> Hash {
        self.inner
            .lock()
            .expect("tracker lock poisoned")
            .last_notarized_hash
    }

    /// Transaction hashes across all tracked headers, for whitelisting
    /// cross-chain transactions in the local pools.
    pub fn tracked_tx_hashes(&self) -> Vec<Hash> {
        let state = self.inner.lock().expect("tracker lock poisoned");
        state
            .tracked
            .values()
            .flat_map(|(header, _)| header.tx_hashes().copied().collect::<Vec<_>>())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingRequester {
        requested: StdMutex<Vec<Nonce>>,
    }

    impl HeaderRequester for RecordingRequester {
        fn request_extended_header(&self, nonce: Nonce) {
            self.requested
                .lock()
                .expect("requester lock poisoned")
                .push(nonce);
        }
    }

    fn extended(nonce: u64) -> (ExtendedShardHeader, Hash) {
        let mut base = ShardHeader::zeroed();
        base.nonce = Nonce(nonce);
        base.chain_id = b"mainchain".to_vec();
        let header = ExtendedShardHeader {
            header: Header::Shard(base),
            incoming_mini_blocks: Vec::new(),
        };
        let hash = header.hash();
        (header, hash)
    }

    #[test]
    fn test_genesis_placeholder_is_reserved_and_nonce_zero() {
        let placeholder = genesis_placeholder();
        assert!(placeholder.is_genesis_placeholder());
        let tracker = CrossChainTracker::new(Arc::new(RecordingRequester::default()));
        assert_eq!(tracker.last_notarized_nonce(), Nonce::GENESIS);
        assert_eq!(tracker.last_notarized_hash(), placeholder.hash());
    }

    #[test]
    fn test_chain_walk_stops_at_gap_and_requests_missing() {
        let requester = Arc::new(RecordingRequester::default());
        let tracker = CrossChainTracker::new(Arc::clone(&requester) as Arc<dyn HeaderRequester>);
        for nonce in [1u64, 2, 4] {
            let (header, hash) = extended(nonce);
            tracker.add_tracked_header(header, hash);
        }

        let (headers, hashes) = tracker.compute_longest_extended_chain_from_last_notarized();
        assert_eq!(headers.len(), 2);
        assert_eq!(hashes.len(), 2);
        assert_eq!(headers[0].nonce(), Nonce(1));
        assert_eq!(headers[1].nonce(), Nonce(2));
        let requested = requester.requested.lock().expect("requester lock poisoned");
        assert_eq!(requested.as_slice(), &[Nonce(3)]);
    }

    #[test]
    fn test_notarization_discards_settled_headers() {
        let tracker = CrossChainTracker::new(Arc::new(RecordingRequester::default()));
        let (h1, hash1) = extended(1);
        let (h2, hash2) = extended(2);
        tracker.add_tracked_header(h1, hash1);
        tracker.add_tracked_header(h2.clone(), hash2);

        tracker.add_cross_notarized_header(ShardId(0), &h2, hash2);
        tracker.remove_last_notarized_headers();

        assert_eq!(tracker.last_notarized_nonce(), Nonce(2));
        assert!(tracker.header_by_hash(&hash1).is_none());
        assert!(tracker.header_by_hash(&hash2).is_none());

        // Anything at or below the notarization is refused on arrival too.
        let (stale, stale_hash) = extended(2);
        tracker.add_tracked_header(stale, stale_hash);
        assert!(tracker.header_by_hash(&stale_hash).is_none());
    }

    #[test]
    fn test_tracked_tx_hashes_flatten_for_whitelisting() {
        let tracker = CrossChainTracker::new(Arc::new(RecordingRequester::default()));
        let (mut header, _) = extended(1);
        header.incoming_mini_blocks = vec![rondel_types::MiniBlock {
            sender_shard: ShardId(1),
            receiver_shard: ShardId(0),
            tx_hashes: vec![Hash::from_bytes(b"t1"), Hash::from_bytes(b"t2")],
            mb_type: rondel_types::MiniBlockType::Incoming,
        }];
        let hash = header.hash();
        tracker.add_tracked_header(header, hash);
        assert_eq!(tracker.tracked_tx_hashes().len(), 2);
    }
}
