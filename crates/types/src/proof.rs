//! Header proofs: the output of a finalized round.

use crate::{EpochId, Hash, Nonce, ShardId, SignatureBytes};
use sbor::prelude::*;

/// Proof that a quorum of the consensus group signed a header.
///
/// Under equivalent proofs any participant may build one; this form
/// carries no leader signature.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct HeaderProof {
    /// Participation bitmap (bit i = consensus-group position i signed).
    pub bitmap: Vec<u8>,
    /// BLS aggregate over the shares indicated by the bitmap.
    pub aggregated_signature: SignatureBytes,
    /// Hash of the proven header.
    pub header_hash: Hash,
    /// Epoch of the proven header.
    pub header_epoch: EpochId,
    /// Nonce of the proven header.
    pub header_nonce: Nonce,
    /// Shard of the proven header.
    pub header_shard: ShardId,
}

impl HeaderProof {
    /// Whether the proposer's bit (position 0) is set.
    ///
    /// Must hold for every proof accepted while equivalent proofs are
    /// active.
    pub fn proposer_signed(&self) -> bool {
        self.bitmap.first().is_some_and(|b| b & 1 != 0)
    }
}
