//! Cross-chain notarization and bridge handoff, end to end over the
//! in-memory backends.

use rondel_consensus::{BlockProcessingError, BlockProcessor, ChainHandle};
use rondel_process::memory::{
    InMemoryAccounts, InMemoryBlockStore, RecordingForkDetector, StaticTxSource,
};
use rondel_process::{AccountsAdapter, BlockStore, ForkDetector, ShardProcessor, TxSource};
use rondel_sovereign::memory::{
    InMemoryCrossTxPool, InMemoryExtendedStore, RecordingBridge, StaticValidatorStats,
};
use rondel_sovereign::{
    BridgeOperationsHandler, CrossChainTracker, CrossTxPool, ExtendedHeaderStore,
    HeaderRequester, OutgoingOperationsPool, SovereignProcessor, ValidatorStatsProvider,
};
use rondel_types::{
    ExtendedShardHeader, Hash, Header, HeaderAccessor, MiniBlock, MiniBlockType, Nonce,
    OutgoingOperation, RoundIndex, ShardHeader, ShardId, SovereignHeader,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const CHAIN_ID: &[u8] = b"rondel-sovereign";
const STATS_ROOT_SEED: &[u8] = b"validator-stats-root";
const GENESIS_ROOT_SEED: &[u8] = b"sovereign-genesis-root";

#[derive(Default)]
struct RecordingRequester {
    requested: Mutex<Vec<Nonce>>,
}

impl HeaderRequester for RecordingRequester {
    fn request_extended_header(&self, nonce: Nonce) {
        self.requested
            .lock()
            .unwrap_or_else(|e| panic!("requester lock: {e}"))
            .push(nonce);
    }
}

struct Fixture {
    processor: SovereignProcessor,
    tracker: Arc<CrossChainTracker>,
    extended_store: Arc<InMemoryExtendedStore>,
    outgoing: Arc<OutgoingOperationsPool>,
    bridge: Arc<RecordingBridge>,
    cross_txs: Arc<InMemoryCrossTxPool>,
}

fn genesis_header() -> Header {
    let mut base = ShardHeader::zeroed();
    base.chain_id = CHAIN_ID.to_vec();
    Header::Sovereign(SovereignHeader {
        base,
        validator_stats_root: Hash::from_bytes(STATS_ROOT_SEED),
        outgoing_mini_block: None,
        extended_header_hashes: Vec::new(),
    })
}

fn fixture() -> Fixture {
    let accounts = Arc::new(InMemoryAccounts::new(Hash::from_bytes(GENESIS_ROOT_SEED)));
    let inner = ShardProcessor::new(
        CHAIN_ID.to_vec(),
        ShardId(0),
        genesis_header(),
        accounts as Arc<dyn AccountsAdapter>,
        Arc::new(InMemoryBlockStore::default()) as Arc<dyn BlockStore>,
        Arc::new(RecordingForkDetector::default()) as Arc<dyn ForkDetector>,
        Arc::new(StaticTxSource::default()) as Arc<dyn TxSource>,
    )
    .unwrap_or_else(|e| panic!("shard processor construction failed: {e}"));

    let tracker = Arc::new(CrossChainTracker::new(
        Arc::new(RecordingRequester::default()) as Arc<dyn HeaderRequester>,
    ));
    let extended_store = Arc::new(InMemoryExtendedStore::default());
    let outgoing = Arc::new(OutgoingOperationsPool::new());
    let bridge = Arc::new(RecordingBridge::default());
    let cross_txs = Arc::new(InMemoryCrossTxPool::default());

    let processor = SovereignProcessor::new(
        inner,
        Arc::clone(&tracker),
        Arc::clone(&extended_store) as Arc<dyn ExtendedHeaderStore>,
        Arc::clone(&outgoing),
        Arc::clone(&bridge) as Arc<dyn BridgeOperationsHandler>,
        Arc::new(StaticValidatorStats::new(Hash::from_bytes(STATS_ROOT_SEED)))
            as Arc<dyn ValidatorStatsProvider>,
        Arc::clone(&cross_txs) as Arc<dyn CrossTxPool>,
        16,
    )
    .unwrap_or_else(|e| panic!("sovereign processor construction failed: {e}"));

    Fixture {
        processor,
        tracker,
        extended_store,
        outgoing,
        bridge,
        cross_txs,
    }
}

/// An extended main-chain header at the given nonce carrying one incoming
/// mini-block with one transaction.
fn extended(nonce: u64) -> (ExtendedShardHeader, Hash, Hash) {
    let mut base = ShardHeader::zeroed();
    base.nonce = Nonce(nonce);
    base.chain_id = b"mainchain".to_vec();
    let tx_hash = Hash::from_bytes(format!("cross-tx-{nonce}").as_bytes());
    let header = ExtendedShardHeader {
        header: Header::Shard(base),
        incoming_mini_blocks: vec![MiniBlock {
            sender_shard: ShardId(1),
            receiver_shard: ShardId(0),
            tx_hashes: vec![tx_hash],
            mb_type: MiniBlockType::Incoming,
        }],
    };
    let hash = header.hash();
    (header, hash, tx_hash)
}

fn seed_tracked(fx: &Fixture, nonces: &[u64]) -> Vec<Hash> {
    let mut hashes = Vec::new();
    for nonce in nonces {
        let (header, hash, tx_hash) = extended(*nonce);
        fx.cross_txs.insert(tx_hash);
        fx.tracker.add_tracked_header(header, hash);
        hashes.push(hash);
    }
    hashes
}

fn outgoing_op(tag: &[u8]) -> OutgoingOperation {
    OutgoingOperation {
        hash: Hash::from_bytes(tag),
        payload: tag.to_vec(),
        confirmed: false,
    }
}

// ═══════════════════════════════════════════════════════════════════════
// S5: cross-chain inclusion and settlement
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_extended_headers_included_and_settled_on_commit() {
    let fx = fixture();
    let expected_hashes = seed_tracked(&fx, &[1, 2, 3]);

    let header = fx
        .processor
        .create_new_header(RoundIndex(1), Nonce(1))
        .unwrap();
    let (header, body) = fx
        .processor
        .create_block(header, Duration::from_millis(50))
        .unwrap();

    let sovereign = header.as_sovereign().unwrap();
    assert_eq!(sovereign.extended_header_hashes, expected_hashes);
    assert_eq!(
        body.mini_blocks
            .iter()
            .filter(|mb| mb.mb_type == MiniBlockType::Incoming)
            .count(),
        3,
        "each extended header's incoming mini-block is bound to the body"
    );

    fx.processor.commit_block(&header, &body).unwrap();

    for (index, hash) in expected_hashes.iter().enumerate() {
        let nonce = Nonce(index as u64 + 1);
        assert!(fx.extended_store.by_hash(hash).is_some());
        assert_eq!(
            fx.extended_store.by_nonce(nonce).map(|h| h.nonce()),
            Some(nonce)
        );
        assert!(
            fx.tracker.header_by_hash(hash).is_none(),
            "settled header removed from the tracker"
        );
    }
    assert_eq!(fx.tracker.last_notarized_nonce(), Nonce(3));
    assert_eq!(fx.processor.current_header().nonce(), Nonce(1));
}

#[test]
fn test_gap_limits_inclusion() {
    let fx = fixture();
    // Nonce 2 missing: only nonce 1 may be referenced.
    seed_tracked(&fx, &[1, 3]);

    let header = fx
        .processor
        .create_new_header(RoundIndex(1), Nonce(1))
        .unwrap();
    let (header, _body) = fx
        .processor
        .create_block(header, Duration::from_millis(50))
        .unwrap();
    assert_eq!(header.as_sovereign().unwrap().extended_header_hashes.len(), 1);
}

#[test]
fn test_missing_cross_transactions_cut_inclusion_and_are_requested() {
    let fx = fixture();
    // Nonce 1's transaction is known, nonce 2's is not.
    let (h1, hash1, tx1) = extended(1);
    fx.cross_txs.insert(tx1);
    fx.tracker.add_tracked_header(h1, hash1);
    let (h2, hash2, tx2) = extended(2);
    fx.tracker.add_tracked_header(h2, hash2);

    let header = fx
        .processor
        .create_new_header(RoundIndex(1), Nonce(1))
        .unwrap();
    let (header, _body) = fx
        .processor
        .create_block(header, Duration::from_millis(50))
        .unwrap();

    assert_eq!(
        header.as_sovereign().unwrap().extended_header_hashes,
        vec![hash1]
    );
    assert_eq!(fx.cross_txs.requested(), vec![tx2]);
}

#[test]
fn test_validator_replays_and_commits_the_proposal() {
    let leader = fixture();
    let validator = fixture();
    seed_tracked(&leader, &[1, 2]);
    seed_tracked(&validator, &[1, 2]);

    let header = leader
        .processor
        .create_new_header(RoundIndex(1), Nonce(1))
        .unwrap();
    let (header, body) = leader
        .processor
        .create_block(header, Duration::from_millis(50))
        .unwrap();

    let outcome = validator
        .processor
        .process_block(&header, &body, Duration::from_millis(50))
        .unwrap();
    assert_eq!(outcome.header, header);
    validator.processor.commit_block(&header, &body).unwrap();
    assert_eq!(validator.tracker.last_notarized_nonce(), Nonce(2));
}

#[test]
fn test_wrong_validator_stats_root_is_rejected() {
    let fx = fixture();
    let header = fx
        .processor
        .create_new_header(RoundIndex(1), Nonce(1))
        .unwrap();
    let (mut header, body) = fx
        .processor
        .create_block(header, Duration::from_millis(50))
        .unwrap();
    if let Ok(sovereign) = header.as_sovereign_mut() {
        sovereign.validator_stats_root = Hash::from_bytes(b"tampered");
    }

    // A fresh fixture plays the validator so its journal is clean.
    let validator = fixture();
    let err = validator
        .processor
        .process_block(&header, &body, Duration::from_millis(50))
        .unwrap_err();
    assert!(matches!(err, BlockProcessingError::Other(_)));
}

#[test]
fn test_unconfirmed_incoming_mini_block_is_rejected() {
    let leader = fixture();
    seed_tracked(&leader, &[1]);
    let header = leader
        .processor
        .create_new_header(RoundIndex(1), Nonce(1))
        .unwrap();
    let (header, mut body) = leader
        .processor
        .create_block(header, Duration::from_millis(50))
        .unwrap();

    // Smuggle in an incoming mini-block no referenced header confirms.
    body.mini_blocks.push(MiniBlock {
        sender_shard: ShardId(2),
        receiver_shard: ShardId(0),
        tx_hashes: vec![Hash::from_bytes(b"smuggled")],
        mb_type: MiniBlockType::Incoming,
    });

    let validator = fixture();
    seed_tracked(&validator, &[1]);
    let err = validator
        .processor
        .process_block(&header, &body, Duration::from_millis(50))
        .unwrap_err();
    assert!(matches!(err, BlockProcessingError::Other(_)));
}

// ═══════════════════════════════════════════════════════════════════════
// S6: outgoing bridge handoff
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_bridge_receives_unconfirmed_plus_current_batch() {
    let fx = fixture();
    let op_a = outgoing_op(b"op-a");
    let op_b = outgoing_op(b"op-b");
    let op_c = outgoing_op(b"op-c");

    // A and B went out in an earlier round and are still unconfirmed.
    let earlier = fx.outgoing.add_batch(vec![op_a.clone(), op_b.clone()]);
    fx.outgoing.mark_sent(&earlier);
    let current = fx.outgoing.add_batch(vec![op_c.clone()]);

    let header = fx
        .processor
        .create_new_header(RoundIndex(1), Nonce(1))
        .unwrap();
    let (header, _body) = fx
        .processor
        .create_block(header, Duration::from_millis(50))
        .unwrap();
    let mini_block = header
        .as_sovereign()
        .unwrap()
        .outgoing_mini_block
        .clone()
        .expect("proposal references the pending batch");
    assert_eq!(mini_block.operations_batch_hash, current);
    assert_eq!(mini_block.operation_hashes, vec![op_c.hash]);

    fx.processor.leader_pre_commit(&header).unwrap();

    let delivered = fx.bridge.delivered();
    assert_eq!(delivered.len(), 1);
    let hashes: Vec<Hash> = delivered[0].iter().map(|op| op.hash).collect();
    assert_eq!(hashes, vec![op_a.hash, op_b.hash, op_c.hash]);

    // Success does not clear the pool; confirmation is asynchronous.
    assert_eq!(fx.outgoing.len(), 2);
    assert_eq!(fx.outgoing.get_unconfirmed().len(), 3);
}

#[test]
fn test_bridge_failure_fails_the_leader_job() {
    let fx = fixture();
    fx.outgoing.add_batch(vec![outgoing_op(b"op")]);

    let header = fx
        .processor
        .create_new_header(RoundIndex(1), Nonce(1))
        .unwrap();
    let (header, _body) = fx
        .processor
        .create_block(header, Duration::from_millis(50))
        .unwrap();

    fx.bridge.set_failing(true);
    let err = fx.processor.leader_pre_commit(&header).unwrap_err();
    assert!(matches!(err, BlockProcessingError::Commit(_)));
    assert!(fx.bridge.delivered().is_empty());
    // The batch stays pending for the next attempt.
    assert_eq!(fx.outgoing.get_unconfirmed().len(), 0);
    assert!(fx.outgoing.current_batch_hash().is_some());
}

#[test]
fn test_no_outgoing_mini_block_skips_the_bridge() {
    let fx = fixture();
    let header = fx
        .processor
        .create_new_header(RoundIndex(1), Nonce(1))
        .unwrap();
    let (header, _body) = fx
        .processor
        .create_block(header, Duration::from_millis(50))
        .unwrap();
    assert!(header.as_sovereign().unwrap().outgoing_mini_block.is_none());
    fx.processor.leader_pre_commit(&header).unwrap();
    assert!(fx.bridge.delivered().is_empty());
}
