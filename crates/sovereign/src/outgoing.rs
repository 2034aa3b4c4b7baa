//! Outgoing bridge operations: pooling, handoff and confirmation.
//!
//! Operations destined for the external bridge are grouped into batches.
//! A batch moves through three stages: pending (assembled, not yet
//! referenced by a committed block), sent (handed to the bridge), and
//! confirmed (acknowledged by the bridge sink, at which point it leaves
//! the pool). The round leader re-sends everything sent-but-unconfirmed
//! together with the current batch; the pool is never cleared by a send.

use rondel_types::{Hash, OutgoingOperation};
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

/// Errors from the bridge sink.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bridge send failed: {0}")]
    Send(String),
}

/// Delivery of operation batches to the external bridge.
pub trait BridgeOperationsHandler: Send + Sync {
    fn send(&self, operations: &[OutgoingOperation]) -> Result<(), BridgeError>;
}

#[derive(PartialEq, Eq)]
enum BatchStage {
    Pending,
    Sent,
}

struct Batch {
    hash: Hash,
    operations: Vec<OutgoingOperation>,
    stage: BatchStage,
}

/// Pool of outgoing operation batches, in creation order.
#[derive(Default)]
pub struct OutgoingOperationsPool {
    batches: Mutex<Vec<Batch>>,
}

impl OutgoingOperationsPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a batch of operations and return its identifying hash (the
    /// hash over the operation hashes in order).
    pub fn add_batch(&self, operations: Vec<OutgoingOperation>) -> Hash {
        let mut data = Vec::with_capacity(operations.len() * 32);
        for op in &operations {
            data.extend_from_slice(op.hash.as_bytes());
        }
        let hash = Hash::from_bytes(&data);
        self.batches
            .lock()
            .expect("outgoing pool lock poisoned")
            .push(Batch {
                hash,
                operations,
                stage: BatchStage::Pending,
            });
        hash
    }

    /// Operations of the batch with the given hash.
    pub fn get(&self, hash: &Hash) -> Vec<OutgoingOperation> {
        self.batches
            .lock()
            .expect("outgoing pool lock poisoned")
            .iter()
            .find(|batch| batch.hash == *hash)
            .map(|batch| batch.operations.clone())
            .unwrap_or_default()
    }

    /// Every operation handed to the bridge but not yet confirmed, across
    /// all sent batches, in batch order.
    pub fn get_unconfirmed(&self) -> Vec<OutgoingOperation> {
        self.batches
            .lock()
            .expect("outgoing pool lock poisoned")
            .iter()
            .filter(|batch| batch.stage == BatchStage::Sent)
            .flat_map(|batch| {
                batch
                    .operations
                    .iter()
                    .filter(|op| !op.confirmed)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Oldest batch not yet handed to the bridge, if any.
    pub fn current_batch_hash(&self) -> Option<Hash> {
        self.batches
            .lock()
            .expect("outgoing pool lock poisoned")
            .iter()
            .find(|batch| batch.stage == BatchStage::Pending)
            .map(|batch| batch.hash)
    }

    /// Mark a batch as handed to the bridge. Its operations join the
    /// unconfirmed set until the sink confirms them.
    pub fn mark_sent(&self, hash: &Hash) {
        let mut batches = self.batches.lock().expect("outgoing pool lock poisoned");
        if let Some(batch) = batches.iter_mut().find(|batch| batch.hash == *hash) {
            batch.stage = BatchStage::Sent;
        }
    }

    /// Bridge-sink acknowledgment: mark the named operations confirmed and
    /// drop batches whose operations are all confirmed.
    pub fn confirm_operations(&self, confirmed: &[Hash]) {
        let mut batches = self.batches.lock().expect("outgoing pool lock poisoned");
        for batch in batches.iter_mut() {
            for op in batch.operations.iter_mut() {
                if confirmed.contains(&op.hash) {
                    op.confirmed = true;
                }
            }
        }
        let before = batches.len();
        batches.retain(|batch| {
            batch.stage != BatchStage::Sent || batch.operations.iter().any(|op| !op.confirmed)
        });
        if batches.len() != before {
            debug!(dropped = before - batches.len(), "confirmed batches removed");
        }
    }

    pub fn len(&self) -> usize {
        self.batches
            .lock()
            .expect("outgoing pool lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
