//! The sovereign block processor.
//!
//! Wraps the shard processor and layers the cross-chain duties on top:
//! gap-free inclusion of tracked extended headers, binding of their
//! incoming mini-blocks to the body, a separately verified
//! validator-statistics root, settlement of notarized headers into a
//! secondary store on commit, and the leader-side bridge handoff.

use crate::outgoing::{BridgeOperationsHandler, OutgoingOperationsPool};
use crate::tracker::CrossChainTracker;
use rondel_consensus::{BlockProcessingError, BlockProcessor, ChainHandle, ProcessOutcome};
use rondel_process::{ShardProcessor, StoreError};
use rondel_types::{
    Body, ExtendedShardHeader, Hash, Header, HeaderAccessor, MiniBlockType, Nonce,
    OutgoingMiniBlockHeader, RoundIndex, SovereignHeader,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Root hash of the validator-statistics trie, maintained outside the
/// user state.
pub trait ValidatorStatsProvider: Send + Sync {
    fn root_hash(&self) -> Hash;
}

/// Local availability of cross-chain transactions referenced by incoming
/// mini-blocks.
pub trait CrossTxPool: Send + Sync {
    fn has_transaction(&self, hash: &Hash) -> bool;

    /// Ask the network for transactions this node is missing.
    fn request_transactions(&self, hashes: &[Hash]);
}

/// Secondary store for settled extended headers, indexed by hash and by
/// nonce.
pub trait ExtendedHeaderStore: Send + Sync {
    fn put_extended(&self, hash: Hash, header: &ExtendedShardHeader) -> Result<(), StoreError>;

    fn by_hash(&self, hash: &Hash) -> Option<ExtendedShardHeader>;

    fn by_nonce(&self, nonce: Nonce) -> Option<ExtendedShardHeader>;
}

pub struct SovereignProcessor {
    inner: ShardProcessor,
    tracker: Arc<CrossChainTracker>,
    extended_store: Arc<dyn ExtendedHeaderStore>,
    outgoing: Arc<OutgoingOperationsPool>,
    bridge: Arc<dyn BridgeOperationsHandler>,
    validator_stats: Arc<dyn ValidatorStatsProvider>,
    cross_txs: Arc<dyn CrossTxPool>,
    /// Cap on extended headers referenced by one block.
    max_extended_per_block: usize,
}

impl SovereignProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        inner: ShardProcessor,
        tracker: Arc<CrossChainTracker>,
        extended_store: Arc<dyn ExtendedHeaderStore>,
        outgoing: Arc<OutgoingOperationsPool>,
        bridge: Arc<dyn BridgeOperationsHandler>,
        validator_stats: Arc<dyn ValidatorStatsProvider>,
        cross_txs: Arc<dyn CrossTxPool>,
        max_extended_per_block: usize,
    ) -> Result<Self, BlockProcessingError> {
        if max_extended_per_block == 0 {
            return Err(BlockProcessingError::Other(
                "max_extended_per_block must be positive".into(),
            ));
        }
        Ok(Self {
            inner,
            tracker,
            extended_store,
            outgoing,
            bridge,
            validator_stats,
            cross_txs,
            max_extended_per_block,
        })
    }

    /// Tracked extended headers ready for inclusion: the gap-free run
    /// above the notarization, capped, and cut at the first header whose
    /// cross-chain transactions are not all locally available (those are
    /// requested).
    fn includable_extended(&self) -> (Vec<ExtendedShardHeader>, Vec<Hash>) {
        let (mut headers, mut hashes) =
            self.tracker.compute_longest_extended_chain_from_last_notarized();
        headers.truncate(self.max_extended_per_block);
        hashes.truncate(self.max_extended_per_block);

        let mut usable = headers.len();
        for (index, header) in headers.iter().enumerate() {
            let missing: Vec<Hash> = header
                .tx_hashes()
                .filter(|hash| !self.cross_txs.has_transaction(hash))
                .copied()
                .collect();
            if !missing.is_empty() {
                debug!(
                    nonce = %header.nonce(),
                    missing = missing.len(),
                    "requesting missing cross-chain transactions"
                );
                self.cross_txs.request_transactions(&missing);
                usable = index;
                break;
            }
        }
        headers.truncate(usable);
        hashes.truncate(usable);
        (headers, hashes)
    }

    /// Check that every incoming mini-block in the body is confirmed by
    /// one of the referenced extended headers, and nothing is referenced
    /// that the tracker does not hold in gap-free nonce order.
    fn verify_cross_chain_references(
        &self,
        sovereign: &SovereignHeader,
        body: &Body,
    ) -> Result<Vec<ExtendedShardHeader>, BlockProcessingError> {
        let mut expected = Nonce(self.tracker.last_notarized_nonce().0 + 1);
        let mut referenced = Vec::with_capacity(sovereign.extended_header_hashes.len());
        for hash in &sovereign.extended_header_hashes {
            let header = self.tracker.header_by_hash(hash).ok_or_else(|| {
                BlockProcessingError::Other(format!("unknown extended header {hash}"))
            })?;
            if header.nonce() != expected {
                return Err(BlockProcessingError::Other(format!(
                    "extended header out of order: expected nonce {expected}, got {}",
                    header.nonce()
                )));
            }
            expected = Nonce(expected.0 + 1);
            referenced.push(header);
        }

        for mini_block in body
            .mini_blocks
            .iter()
            .filter(|mb| mb.mb_type == MiniBlockType::Incoming)
        {
            let confirmed = referenced
                .iter()
                .any(|header| header.incoming_mini_blocks.contains(mini_block));
            if !confirmed {
                return Err(BlockProcessingError::Other(
                    "incoming mini-block without a confirming extended header".into(),
                ));
            }
        }
        Ok(referenced)
    }

    fn sovereign_of(header: &Header) -> Result<&SovereignHeader, BlockProcessingError> {
        header
            .as_sovereign()
            .map_err(|e| BlockProcessingError::WrongHeaderVariant(e.to_string()))
    }
}

impl BlockProcessor for SovereignProcessor {
    fn create_new_header(
        &self,
        round: RoundIndex,
        nonce: Nonce,
    ) -> Result<Header, BlockProcessingError> {
        let base = self.inner.base_header_for(round, nonce);
        Ok(Header::Sovereign(SovereignHeader {
            base,
            validator_stats_root: self.validator_stats.root_hash(),
            outgoing_mini_block: None,
            extended_header_hashes: Vec::new(),
        }))
    }

    fn create_block(
        &self,
        header: Header,
        have_time: Duration,
    ) -> Result<(Header, Body), BlockProcessingError> {
        let mut sovereign = match header {
            Header::Sovereign(sovereign) => sovereign,
            other => {
                return Err(BlockProcessingError::WrongHeaderVariant(
                    other.variant_name().to_string(),
                ))
            }
        };
        self.inner.guard_clean_journal()?;

        let (extended, hashes) = self.includable_extended();
        let mut mini_blocks = self.inner.proposal_mini_blocks(have_time);
        for header in &extended {
            mini_blocks.extend(header.incoming_mini_blocks.iter().cloned());
        }
        let body = Body { mini_blocks };

        let root = self.inner.apply_body(&body)?;
        sovereign.base.state_root = root;
        sovereign.base.body_hash = body.hash();
        sovereign.base.tx_count = body.tx_count() as u32;
        // Chain-walk order is nonce order.
        sovereign.extended_header_hashes = hashes;

        if let Some(batch_hash) = self.outgoing.current_batch_hash() {
            let operations = self.outgoing.get(&batch_hash);
            sovereign.outgoing_mini_block = Some(OutgoingMiniBlockHeader {
                operations_batch_hash: batch_hash,
                operation_hashes: operations.iter().map(|op| op.hash).collect(),
            });
        }

        debug!(
            nonce = %sovereign.base.nonce,
            extended = sovereign.extended_header_hashes.len(),
            outgoing = sovereign.outgoing_mini_block.is_some(),
            "sovereign proposal assembled"
        );
        Ok((Header::Sovereign(sovereign), body))
    }

    fn process_block(
        &self,
        header: &Header,
        body: &Body,
        _have_time: Duration,
    ) -> Result<ProcessOutcome, BlockProcessingError> {
        let sovereign = Self::sovereign_of(header)?;

        // The validator-stats root is maintained outside the user state
        // and checked on its own.
        let stats_root = self.validator_stats.root_hash();
        if sovereign.validator_stats_root != stats_root {
            return Err(BlockProcessingError::Other(format!(
                "validator stats root mismatch: header {}, local {stats_root}",
                sovereign.validator_stats_root
            )));
        }
        self.verify_cross_chain_references(sovereign, body)?;

        self.inner.guard_clean_journal()?;
        let computed_root = self.inner.apply_body(body)?;
        if computed_root != header.state_root() {
            self.revert_current_block();
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

    fn leader_pre_commit(&self, header: &Header) -> Result<(), BlockProcessingError> {
        let sovereign = Self::sovereign_of(header)?;
        let Some(outgoing) = &sovereign.outgoing_mini_block else {
            return Ok(());
        };

        // Everything sent-but-unconfirmed rides along with the current
        // batch; the pool keeps all of it until the sink confirms.
        let mut batch = self.outgoing.get_unconfirmed();
        batch.extend(self.outgoing.get(&outgoing.operations_batch_hash));
        if let Err(err) = self.bridge.send(&batch) {
            warn!(%err, "bridge handoff failed");
            return Err(BlockProcessingError::Commit(err.to_string()));
        }
        self.outgoing.mark_sent(&outgoing.operations_batch_hash);
        info!(
            operations = batch.len(),
            batch = %outgoing.operations_batch_hash,
            "outgoing operations handed to bridge"
        );
        Ok(())
    }

    fn commit_block(&self, header: &Header, body: &Body) -> Result<(), BlockProcessingError> {
        let sovereign = Self::sovereign_of(header)?;
        let mut settled = Vec::with_capacity(sovereign.extended_header_hashes.len());
        for hash in &sovereign.extended_header_hashes {
            let extended = self.tracker.header_by_hash(hash).ok_or_else(|| {
                BlockProcessingError::Commit(format!("extended header {hash} no longer tracked"))
            })?;
            settled.push((*hash, extended));
        }
        // Secondary-store writes happen before the core commit so a store
        // failure surfaces while revert_current_block can still restore
        // everything.
        for (hash, extended) in &settled {
            self.extended_store
                .put_extended(*hash, extended)
                .map_err(|e| BlockProcessingError::Commit(e.to_string()))?;
        }

        self.inner.commit_core(header, body)?;

        if let Some((hash, extended)) = settled.last() {
            self.tracker
                .add_cross_notarized_header(header.shard(), extended, *hash);
            self.tracker.remove_last_notarized_headers();
        }
        Ok(())
    }

    fn revert_current_block(&self) {
        self.inner.revert_current_block();
    }

    fn revert_state_to_block(
        &self,
        header: &Header,
        root_hash: Hash,
    ) -> Result<(), BlockProcessingError> {
        self.inner.revert_state_to_block(header, root_hash)
    }
}

impl ChainHandle for SovereignProcessor {
    fn current_header(&self) -> Header {
        self.inner.current_header()
    }

    fn current_header_hash(&self) -> Hash {
        self.inner.current_header_hash()
    }
}
