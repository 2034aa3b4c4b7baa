//! The shard block processor.
//!
//! Owns the chain head and drives the accounts journal, the block store
//! and the fork detector through one commit path. The sovereign overlay
//! reuses the exposed building blocks (`base_header_for`, `apply_body`,
//! `commit_core`) and layers cross-chain work on top.

use crate::adapters::{AccountsAdapter, BlockStore, ForkDetector, TxSource};
use rondel_consensus::{BlockProcessingError, BlockProcessor, ChainHandle, ProcessOutcome};
use rondel_types::{
    Body, Hash, Header, HeaderAccessor, MiniBlock, Nonce, RoundIndex, ShardHeader, ShardId,
};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// The committed chain head.
#[derive(Clone)]
struct ChainHead {
    header: Header,
    hash: Hash,
}

pub struct ShardProcessor {
    chain_id: Vec<u8>,
    shard: ShardId,
    accounts: Arc<dyn AccountsAdapter>,
    store: Arc<dyn BlockStore>,
    fork_detector: Arc<dyn ForkDetector>,
    txs: Arc<dyn TxSource>,
    head: Mutex<ChainHead>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl ShardProcessor {
    pub fn new(
        chain_id: Vec<u8>,
        shard: ShardId,
        genesis: Header,
        accounts: Arc<dyn AccountsAdapter>,
        store: Arc<dyn BlockStore>,
        fork_detector: Arc<dyn ForkDetector>,
        txs: Arc<dyn TxSource>,
    ) -> Result<Self, BlockProcessingError> {
        let hash = genesis
            .hash()
            .map_err(|e| BlockProcessingError::Other(e.to_string()))?;
        Ok(Self {
            chain_id,
            shard,
            accounts,
            store,
            fork_detector,
            txs,
            head: Mutex::new(ChainHead {
                header: genesis,
                hash,
            }),
        })
    }

    /// The base header fields for a block following the current head.
    pub fn base_header_for(&self, round: RoundIndex, nonce: Nonce) -> ShardHeader {
        let head = self.head.lock().expect("chain head lock poisoned").clone();
        let prev_randomness = match &head.header {
            Header::Shard(h) | Header::Meta(h) => h.randomness,
            Header::WithValidatorStats(h) => h.base.randomness,
            Header::Sovereign(h) => h.base.randomness,
        };
        let mut randomness_seed = Vec::with_capacity(40);
        randomness_seed.extend_from_slice(prev_randomness.as_bytes());
        randomness_seed.extend_from_slice(&round.0.to_le_bytes());

        let mut base = ShardHeader::zeroed();
        base.nonce = nonce;
        base.round = round;
        base.epoch = head.header.epoch();
        base.shard = self.shard;
        base.prev_hash = head.hash;
        base.prev_randomness = prev_randomness;
        base.randomness = Hash::from_bytes(&randomness_seed);
        base.chain_id = self.chain_id.clone();
        base.timestamp = unix_now();
        base.state_root = self.accounts.root_hash();
        base
    }

    /// Fail when uncommitted journal entries exist from an earlier block.
    pub fn guard_clean_journal(&self) -> Result<(), BlockProcessingError> {
        let journal_len = self.accounts.journal_len();
        if journal_len != 0 {
            return Err(BlockProcessingError::DirtyAccountsJournal { journal_len });
        }
        Ok(())
    }

    /// Apply a body on the accounts journal, returning the prospective
    /// root.
    pub fn apply_body(&self, body: &Body) -> Result<Hash, BlockProcessingError> {
        self.accounts
            .apply_body(body)
            .map_err(|e| BlockProcessingError::Other(e.to_string()))
    }

    /// Mini-blocks the tx source offers for a new proposal.
    pub fn proposal_mini_blocks(&self, have_time: Duration) -> Vec<MiniBlock> {
        self.txs.mini_blocks(have_time)
    }

    /// Assemble a proposal body from the tx source and stamp the header's
    /// body-derived fields.
    pub fn fill_proposal(
        &self,
        base: &mut ShardHeader,
        have_time: Duration,
    ) -> Result<Body, BlockProcessingError> {
        self.guard_clean_journal()?;
        let body = Body {
            mini_blocks: self.txs.mini_blocks(have_time),
        };
        let root = self.apply_body(&body)?;
        base.state_root = root;
        base.body_hash = body.hash();
        base.tx_count = body.tx_count() as u32;
        Ok(body)
    }

    /// Persist one block: store write, accounts commit, fork-detector
    /// notification, head advance. Any failure leaves the journal intact
    /// for `revert_current_block`.
    pub fn commit_core(&self, header: &Header, body: &Body) -> Result<(), BlockProcessingError> {
        let hash = header
            .hash()
            .map_err(|e| BlockProcessingError::Other(e.to_string()))?;
        self.store
            .put_block(hash, header, body)
            .map_err(|e| BlockProcessingError::Commit(e.to_string()))?;
        self.accounts
            .commit()
            .map_err(|e| BlockProcessingError::Commit(e.to_string()))?;
        self.fork_detector.add_header(header, hash);
        *self.head.lock().expect("chain head lock poisoned") = ChainHead {
            header: header.clone(),
            hash,
        };
        info!(
            nonce = %header.nonce(),
            round = %header.round(),
            %hash,
            "block committed"
        );
        Ok(())
    }
}

impl BlockProcessor for ShardProcessor {
    fn create_new_header(
        &self,
        round: RoundIndex,
        nonce: Nonce,
    ) -> Result<Header, BlockProcessingError> {
        Ok(Header::Shard(self.base_header_for(round, nonce)))
    }

    fn create_block(
        &self,
        header: Header,
        have_time: Duration,
    ) -> Result<(Header, Body), BlockProcessingError> {
        let mut base = match header {
            Header::Shard(base) => base,
            other => {
                return Err(BlockProcessingError::WrongHeaderVariant(
                    other.variant_name().to_string(),
                ))
            }
        };
        let body = self.fill_proposal(&mut base, have_time)?;
        debug!(
            nonce = %base.nonce,
            tx_count = base.tx_count,
            "proposal assembled"
        );
        Ok((Header::Shard(base), body))
    }

    fn process_block(
        &self,
        header: &Header,
        body: &Body,
        _have_time: Duration,
    ) -> Result<ProcessOutcome, BlockProcessingError> {
        self.guard_clean_journal()?;
        let computed_root = self.apply_body(body)?;
        if computed_root != header.state_root() {
            self.accounts.discard_journal();
            return Err(BlockProcessingError::StateRootMismatch {
                header_root: header.state_root(),
                computed_root,
            });
        }
        Ok(ProcessOutcome {
            header: header.clone(),
            body: body.clone(),
        })
    }

    fn commit_block(&self, header: &Header, body: &Body) -> Result<(), BlockProcessingError> {
        self.commit_core(header, body)
    }

    fn revert_current_block(&self) {
        self.accounts.discard_journal();
        debug!("journaled block changes discarded");
    }

    fn revert_state_to_block(
        &self,
        header: &Header,
        root_hash: Hash,
    ) -> Result<(), BlockProcessingError> {
        self.accounts
            .revert_to_root(root_hash)
            .map_err(|e| BlockProcessingError::Other(e.to_string()))?;
        let hash = header
            .hash()
            .map_err(|e| BlockProcessingError::Other(e.to_string()))?;
        *self.head.lock().expect("chain head lock poisoned") = ChainHead {
            header: header.clone(),
            hash,
        };
        info!(nonce = %header.nonce(), %root_hash, "state reverted to block");
        Ok(())
    }
}

impl ChainHandle for ShardProcessor {
    fn current_header(&self) -> Header {
        self.head
            .lock()
            .expect("chain head lock poisoned")
            .header
            .clone()
    }

    fn current_header_hash(&self) -> Hash {
        self.head.lock().expect("chain head lock poisoned").hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{
        InMemoryAccounts, InMemoryBlockStore, RecordingForkDetector, StaticTxSource,
    };
    use rondel_types::{MiniBlock, MiniBlockType};

    fn genesis() -> Header {
        let mut base = ShardHeader::zeroed();
        base.chain_id = b"rondel".to_vec();
        Header::Shard(base)
    }

    struct Fixture {
        processor: ShardProcessor,
        accounts: Arc<InMemoryAccounts>,
        store: Arc<InMemoryBlockStore>,
        fork_detector: Arc<RecordingForkDetector>,
        txs: Arc<StaticTxSource>,
    }

    fn fixture() -> Fixture {
        let accounts = Arc::new(InMemoryAccounts::new(Hash::from_bytes(b"genesis-root")));
        let store = Arc::new(InMemoryBlockStore::default());
        let fork_detector = Arc::new(RecordingForkDetector::default());
        let txs = Arc::new(StaticTxSource::default());
        let processor = ShardProcessor::new(
            b"rondel".to_vec(),
            ShardId(0),
            genesis(),
            Arc::clone(&accounts) as Arc<dyn AccountsAdapter>,
            Arc::clone(&store) as Arc<dyn BlockStore>,
            Arc::clone(&fork_detector) as Arc<dyn ForkDetector>,
            Arc::clone(&txs) as Arc<dyn TxSource>,
        )
        .unwrap_or_else(|e| panic!("processor construction failed: {e}"));
        Fixture {
            processor,
            accounts,
            store,
            fork_detector,
            txs,
        }
    }

    fn sample_mini_block() -> MiniBlock {
        MiniBlock {
            sender_shard: ShardId(0),
            receiver_shard: ShardId(0),
            tx_hashes: vec![Hash::from_bytes(b"tx")],
            mb_type: MiniBlockType::Tx,
        }
    }

    #[test]
    fn test_create_and_commit_advances_head() {
        let fx = fixture();
        fx.txs.push_batch(vec![sample_mini_block()]);

        let header = fx
            .processor
            .create_new_header(RoundIndex(1), Nonce(1))
            .unwrap();
        let (header, body) = fx
            .processor
            .create_block(header, Duration::from_millis(50))
            .unwrap();
        assert_eq!(body.tx_count(), 1);

        fx.processor.commit_block(&header, &body).unwrap();
        assert_eq!(fx.processor.current_header().nonce(), Nonce(1));
        assert_eq!(fx.accounts.journal_len(), 0);
        assert_eq!(fx.fork_detector.highest_nonce(), Nonce(1));
        let hash = header.hash().unwrap();
        assert!(fx.store.header_by_hash(&hash).is_some());
        assert!(fx.store.header_by_nonce(Nonce(1)).is_some());
    }

    #[test]
    fn test_create_block_fails_on_dirty_journal() {
        let fx = fixture();
        fx.accounts.apply_body(&Body::empty()).unwrap();

        let header = fx
            .processor
            .create_new_header(RoundIndex(1), Nonce(1))
            .unwrap();
        let err = fx
            .processor
            .create_block(header, Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(
            err,
            BlockProcessingError::DirtyAccountsJournal { journal_len: 1 }
        ));
    }

    #[test]
    fn test_process_block_rejects_state_root_mismatch() {
        let fx = fixture();
        let header = fx
            .processor
            .create_new_header(RoundIndex(1), Nonce(1))
            .unwrap();
        // Header root left at the pre-apply committed root.
        let err = fx
            .processor
            .process_block(&header, &Body::empty(), Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, BlockProcessingError::StateRootMismatch { .. }));
        // The mismatch path discards the journal so the next round starts
        // clean.
        assert_eq!(fx.accounts.journal_len(), 0);
    }

    #[test]
    fn test_process_block_accepts_matching_root() {
        let fx = fixture();
        fx.txs.push_batch(vec![sample_mini_block()]);
        let header = fx
            .processor
            .create_new_header(RoundIndex(1), Nonce(1))
            .unwrap();
        let (header, body) = fx
            .processor
            .create_block(header, Duration::from_millis(50))
            .unwrap();

        // A validator replays the proposal on its own journal.
        fx.accounts.discard_journal();
        let outcome = fx
            .processor
            .process_block(&header, &body, Duration::from_millis(50))
            .unwrap();
        assert_eq!(outcome.header, header);
    }

    #[test]
    fn test_revert_current_block_clears_journal() {
        let fx = fixture();
        fx.accounts.apply_body(&Body::empty()).unwrap();
        assert_eq!(fx.accounts.journal_len(), 1);
        fx.processor.revert_current_block();
        assert_eq!(fx.accounts.journal_len(), 0);
    }

    #[test]
    fn test_revert_state_to_block_rewinds_head_and_root() {
        let fx = fixture();
        let genesis_root = fx.accounts.root_hash();
        let genesis_header = fx.processor.current_header();

        fx.txs.push_batch(vec![sample_mini_block()]);
        let header = fx
            .processor
            .create_new_header(RoundIndex(1), Nonce(1))
            .unwrap();
        let (header, body) = fx
            .processor
            .create_block(header, Duration::from_millis(50))
            .unwrap();
        fx.processor.commit_block(&header, &body).unwrap();

        fx.processor
            .revert_state_to_block(&genesis_header, genesis_root)
            .unwrap();
        assert_eq!(fx.processor.current_header().nonce(), Nonce::GENESIS);
        assert_eq!(fx.accounts.root_hash(), genesis_root);
    }

    #[test]
    fn test_commit_failure_leaves_journal_for_revert() {
        let fx = fixture();
        fx.txs.push_batch(vec![]);
        let header = fx
            .processor
            .create_new_header(RoundIndex(1), Nonce(1))
            .unwrap();
        let (header, body) = fx
            .processor
            .create_block(header, Duration::from_millis(50))
            .unwrap();
        fx.processor.commit_block(&header, &body).unwrap();

        // Committing the same block hash again fails in the store before
        // the accounts commit runs.
        fx.accounts.apply_body(&body).unwrap();
        let err = fx.processor.commit_block(&header, &body).unwrap_err();
        assert!(matches!(err, BlockProcessingError::Commit(_)));
        assert_eq!(fx.accounts.journal_len(), 1);
        fx.processor.revert_current_block();
        assert_eq!(fx.accounts.journal_len(), 0);
    }
}
