//! In-memory sovereign collaborator backends, for tests and local runs.

use crate::outgoing::{BridgeError, BridgeOperationsHandler};
use crate::processor::{CrossTxPool, ExtendedHeaderStore, ValidatorStatsProvider};
use rondel_process::StoreError;
use rondel_types::{ExtendedShardHeader, Hash, Nonce, OutgoingOperation};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Extended-header store backed by two maps.
#[derive(Default)]
pub struct InMemoryExtendedStore {
    inner: Mutex<ExtendedState>,
}

#[derive(Default)]
struct ExtendedState {
    by_hash: HashMap<Hash, ExtendedShardHeader>,
    by_nonce: HashMap<Nonce, Hash>,
}

impl ExtendedHeaderStore for InMemoryExtendedStore {
    fn put_extended(&self, hash: Hash, header: &ExtendedShardHeader) -> Result<(), StoreError> {
        let mut state = self.inner.lock().expect("extended store lock poisoned");
        state.by_nonce.insert(header.nonce(), hash);
        state.by_hash.insert(hash, header.clone());
        Ok(())
    }

    fn by_hash(&self, hash: &Hash) -> Option<ExtendedShardHeader> {
        self.inner
            .lock()
            .expect("extended store lock poisoned")
            .by_hash
            .get(hash)
            .cloned()
    }

    fn by_nonce(&self, nonce: Nonce) -> Option<ExtendedShardHeader> {
        let state = self.inner.lock().expect("extended store lock poisoned");
        let hash = state.by_nonce.get(&nonce)?;
        state.by_hash.get(hash).cloned()
    }
}

/// Fixed validator-statistics root.
pub struct StaticValidatorStats {
    root: Hash,
}

impl StaticValidatorStats {
    pub fn new(root: Hash) -> Self {
        Self { root }
    }
}

impl ValidatorStatsProvider for StaticValidatorStats {
    fn root_hash(&self) -> Hash {
        self.root
    }
}

/// Cross-chain transaction pool that knows a whitelisted set of hashes
/// and records what gets requested.
#[derive(Default)]
pub struct InMemoryCrossTxPool {
    known: Mutex<HashSet<Hash>>,
    requested: Mutex<Vec<Hash>>,
}

impl InMemoryCrossTxPool {
    pub fn insert(&self, hash: Hash) {
        self.known
            .lock()
            .expect("cross tx pool lock poisoned")
            .insert(hash);
    }

    pub fn requested(&self) -> Vec<Hash> {
        self.requested
            .lock()
            .expect("cross tx pool lock poisoned")
            .clone()
    }
}

impl CrossTxPool for InMemoryCrossTxPool {
    fn has_transaction(&self, hash: &Hash) -> bool {
        self.known
            .lock()
            .expect("cross tx pool lock poisoned")
            .contains(hash)
    }

    fn request_transactions(&self, hashes: &[Hash]) {
        self.requested
            .lock()
            .expect("cross tx pool lock poisoned")
            .extend_from_slice(hashes);
    }
}

/// Bridge sink recording every delivered batch; can be switched to fail.
#[derive(Default)]
pub struct RecordingBridge {
    delivered: Mutex<Vec<Vec<OutgoingOperation>>>,
    fail: AtomicBool,
}

impl RecordingBridge {
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub fn delivered(&self) -> Vec<Vec<OutgoingOperation>> {
        self.delivered
            .lock()
            .expect("bridge lock poisoned")
            .clone()
    }
}

impl BridgeOperationsHandler for RecordingBridge {
    fn send(&self, operations: &[OutgoingOperation]) -> Result<(), BridgeError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BridgeError::Send("bridge unavailable".into()));
        }
        self.delivered
            .lock()
            .expect("bridge lock poisoned")
            .push(operations.to_vec());
        Ok(())
    }
}
