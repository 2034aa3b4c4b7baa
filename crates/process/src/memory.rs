//! In-memory adapter backends, for tests and single-node local runs.

use crate::adapters::{
    AccountsAdapter, AccountsError, BlockStore, ForkDetector, StoreError, TxSource,
};
use rondel_types::{Body, Hash, Header, HeaderAccessor, MiniBlock, Nonce};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

/// Journaled in-memory accounts state. The "state" is just a root hash
/// folded over committed bodies; enough to exercise the processor's
/// journal and revert contracts.
pub struct InMemoryAccounts {
    inner: Mutex<AccountsState>,
}

struct AccountsState {
    committed_root: Hash,
    /// Prospective root plus journal entry count, present while a body is
    /// applied but not committed.
    journal: Option<(Hash, usize)>,
    /// Every root this instance has committed, for `revert_to_root`.
    history: HashSet<Hash>,
}

impl InMemoryAccounts {
    pub fn new(genesis_root: Hash) -> Self {
        let mut history = HashSet::new();
        history.insert(genesis_root);
        Self {
            inner: Mutex::new(AccountsState {
                committed_root: genesis_root,
                journal: None,
                history,
            }),
        }
    }

    fn fold(root: Hash, body: &Body) -> Hash {
        let mut data = Vec::with_capacity(64);
        data.extend_from_slice(root.as_bytes());
        data.extend_from_slice(body.hash().as_bytes());
        Hash::from_bytes(&data)
    }
}

impl AccountsAdapter for InMemoryAccounts {
    fn root_hash(&self) -> Hash {
        self.inner.lock().expect("accounts lock poisoned").committed_root
    }

    fn journal_len(&self) -> usize {
        self.inner
            .lock()
            .expect("accounts lock poisoned")
            .journal
            .map_or(0, |(_, len)| len)
    }

    fn apply_body(&self, body: &Body) -> Result<Hash, AccountsError> {
        let mut state = self.inner.lock().expect("accounts lock poisoned");
        let root = Self::fold(state.committed_root, body);
        // An empty body still journals one entry (the header bookkeeping).
        let entries = body.mini_blocks.len().max(1);
        state.journal = Some((root, entries));
        Ok(root)
    }

    fn commit(&self) -> Result<Hash, AccountsError> {
        let mut state = self.inner.lock().expect("accounts lock poisoned");
        let (root, _) = state.journal.take().ok_or(AccountsError::NothingToCommit)?;
        state.committed_root = root;
        state.history.insert(root);
        Ok(root)
    }

    fn discard_journal(&self) {
        self.inner.lock().expect("accounts lock poisoned").journal = None;
    }

    fn revert_to_root(&self, root: Hash) -> Result<(), AccountsError> {
        let mut state = self.inner.lock().expect("accounts lock poisoned");
        if !state.history.contains(&root) {
            return Err(AccountsError::UnknownRoot(root));
        }
        state.committed_root = root;
        state.journal = None;
        Ok(())
    }
}

/// Hash- and nonce-indexed block storage in two maps.
#[derive(Default)]
pub struct InMemoryBlockStore {
    inner: Mutex<StoreState>,
}

#[derive(Default)]
struct StoreState {
    by_hash: HashMap<Hash, (Header, Body)>,
    by_nonce: HashMap<Nonce, Hash>,
}

impl BlockStore for InMemoryBlockStore {
    fn put_block(&self, hash: Hash, header: &Header, body: &Body) -> Result<(), StoreError> {
        let mut state = self.inner.lock().expect("store lock poisoned");
        if state.by_hash.contains_key(&hash) {
            return Err(StoreError::DuplicateBlock(hash));
        }
        state.by_nonce.insert(header.nonce(), hash);
        state.by_hash.insert(hash, (header.clone(), body.clone()));
        Ok(())
    }

    fn header_by_hash(&self, hash: &Hash) -> Option<Header> {
        let state = self.inner.lock().expect("store lock poisoned");
        state.by_hash.get(hash).map(|(header, _)| header.clone())
    }

    fn header_by_nonce(&self, nonce: Nonce) -> Option<Header> {
        let state = self.inner.lock().expect("store lock poisoned");
        let hash = state.by_nonce.get(&nonce)?;
        state.by_hash.get(hash).map(|(header, _)| header.clone())
    }

    fn body_by_hash(&self, hash: &Hash) -> Option<Body> {
        let state = self.inner.lock().expect("store lock poisoned");
        state.by_hash.get(hash).map(|(_, body)| body.clone())
    }
}

/// Fork detector that records committed (nonce, hash) pairs.
#[derive(Default)]
pub struct RecordingForkDetector {
    committed: Mutex<Vec<(Nonce, Hash)>>,
}

impl RecordingForkDetector {
    pub fn committed(&self) -> Vec<(Nonce, Hash)> {
        self.committed
            .lock()
            .expect("fork detector lock poisoned")
            .clone()
    }
}

impl ForkDetector for RecordingForkDetector {
    fn add_header(&self, header: &Header, hash: Hash) {
        self.committed
            .lock()
            .expect("fork detector lock poisoned")
            .push((header.nonce(), hash));
    }

    fn highest_nonce(&self) -> Nonce {
        self.committed
            .lock()
            .expect("fork detector lock poisoned")
            .iter()
            .map(|(nonce, _)| *nonce)
            .max()
            .unwrap_or(Nonce::GENESIS)
    }
}

/// Fixed queue of mini-blocks handed out one proposal at a time.
#[derive(Default)]
pub struct StaticTxSource {
    batches: Mutex<Vec<Vec<MiniBlock>>>,
}

impl StaticTxSource {
    pub fn push_batch(&self, mini_blocks: Vec<MiniBlock>) {
        self.batches
            .lock()
            .expect("tx source lock poisoned")
            .push(mini_blocks);
    }
}

impl TxSource for StaticTxSource {
    fn mini_blocks(&self, _have_time: Duration) -> Vec<MiniBlock> {
        let mut batches = self.batches.lock().expect("tx source lock poisoned");
        if batches.is_empty() {
            Vec::new()
        } else {
            batches.remove(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rondel_types::ShardHeader;

    #[test]
    fn test_accounts_journal_lifecycle() {
        let accounts = InMemoryAccounts::new(Hash::from_bytes(b"genesis"));
        assert_eq!(accounts.journal_len(), 0);

        let root = accounts.apply_body(&Body::empty()).unwrap();
        assert_eq!(accounts.journal_len(), 1);
        assert_ne!(accounts.root_hash(), root);

        let committed = accounts.commit().unwrap();
        assert_eq!(committed, root);
        assert_eq!(accounts.root_hash(), root);
        assert_eq!(accounts.journal_len(), 0);
    }

    #[test]
    fn test_accounts_revert_only_to_known_roots() {
        let genesis = Hash::from_bytes(b"genesis");
        let accounts = InMemoryAccounts::new(genesis);
        accounts.apply_body(&Body::empty()).unwrap();
        accounts.commit().unwrap();

        assert!(accounts.revert_to_root(genesis).is_ok());
        assert_eq!(accounts.root_hash(), genesis);
        let err = accounts.revert_to_root(Hash::from_bytes(b"never-seen"));
        assert!(matches!(err, Err(AccountsError::UnknownRoot(_))));
    }

    #[test]
    fn test_store_rejects_duplicate_hash() {
        let store = InMemoryBlockStore::default();
        let header = Header::Shard(ShardHeader::zeroed());
        let hash = Hash::from_bytes(b"block");
        store.put_block(hash, &header, &Body::empty()).unwrap();
        let err = store.put_block(hash, &header, &Body::empty());
        assert!(matches!(err, Err(StoreError::DuplicateBlock(_))));
        assert!(store.header_by_nonce(Nonce::GENESIS).is_some());
    }
}
