//! Finalized header proof store.

use rondel_types::{Hash, HeaderProof, ShardId};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// Dedup store of finalized header proofs, keyed by header hash.
///
/// `add_proof` is idempotent: replaying a proof for a known header hash is
/// a no-op and reports `false`. The pool retains at most one proof per
/// header.
#[derive(Debug, Default)]
pub struct ProofPool {
    proofs: Mutex<HashMap<Hash, HeaderProof>>,
}

impl ProofPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a proof. Returns true if the proof is new.
    pub fn add_proof(&self, proof: HeaderProof) -> bool {
        let mut proofs = self.proofs.lock().expect("proof pool mutex poisoned");
        if proofs.contains_key(&proof.header_hash) {
            return false;
        }
        debug!(
            header_hash = %proof.header_hash,
            nonce = %proof.header_nonce,
            "proof added to pool"
        );
        proofs.insert(proof.header_hash, proof);
        true
    }

    /// The proof for a header hash, if finalized.
    pub fn proof_for(&self, header_hash: &Hash) -> Option<HeaderProof> {
        self.proofs
            .lock()
            .expect("proof pool mutex poisoned")
            .get(header_hash)
            .cloned()
    }

    /// Whether a proof exists for the header hash on the given shard.
    pub fn has_proof(&self, shard: ShardId, header_hash: &Hash) -> bool {
        self.proofs
            .lock()
            .expect("proof pool mutex poisoned")
            .get(header_hash)
            .is_some_and(|proof| proof.header_shard == shard)
    }

    /// Number of stored proofs.
    pub fn len(&self) -> usize {
        self.proofs.lock().expect("proof pool mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop proofs for headers at or below the given nonce for a shard,
    /// called after those blocks are final beyond reorg depth.
    pub fn prune_below(&self, shard: ShardId, nonce: u64) {
        self.proofs
            .lock()
            .expect("proof pool mutex poisoned")
            .retain(|_, proof| proof.header_shard != shard || proof.header_nonce.0 > nonce);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rondel_types::Nonce;

    fn proof(hash_byte: u8, shard: u32, nonce: u64) -> HeaderProof {
        HeaderProof {
            bitmap: vec![0b0000_0111],
            aggregated_signature: vec![1, 2, 3],
            header_hash: Hash::from_raw([hash_byte; 32]),
            header_epoch: rondel_types::EpochId(0),
            header_nonce: Nonce(nonce),
            header_shard: ShardId(shard),
        }
    }

    #[test]
    fn test_add_is_idempotent() {
        let pool = ProofPool::new();
        assert!(pool.add_proof(proof(1, 0, 5)));
        assert!(!pool.add_proof(proof(1, 0, 5)));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_lookup_by_header_hash() {
        let pool = ProofPool::new();
        pool.add_proof(proof(7, 0, 9));
        let found = pool.proof_for(&Hash::from_raw([7; 32]));
        assert!(found.is_some_and(|p| p.header_nonce == Nonce(9)));
        assert!(pool.proof_for(&Hash::from_raw([8; 32])).is_none());
    }

    #[test]
    fn test_prune_below_respects_shard() {
        let pool = ProofPool::new();
        pool.add_proof(proof(1, 0, 5));
        pool.add_proof(proof(2, 0, 10));
        pool.add_proof(proof(3, 1, 5));
        pool.prune_below(ShardId(0), 5);
        assert!(!pool.has_proof(ShardId(0), &Hash::from_raw([1; 32])));
        assert!(pool.has_proof(ShardId(0), &Hash::from_raw([2; 32])));
        assert!(pool.has_proof(ShardId(1), &Hash::from_raw([3; 32])));
    }

    #[test]
    fn test_has_proof_checks_the_shard() {
        let pool = ProofPool::new();
        pool.add_proof(proof(4, 2, 7));
        assert!(pool.has_proof(ShardId(2), &Hash::from_raw([4; 32])));
        assert!(!pool.has_proof(ShardId(0), &Hash::from_raw([4; 32])));
    }
}
