//! Position-keyed signature share store and aggregation driver.
//!
//! One `MultiSigner` serves a node for the lifetime of the process. It is
//! reset with the consensus group at the start of every round; shares are
//! stored by consensus-group position and become read-only once aggregation
//! begins. A node may manage several keys (multi-key operation), any subset
//! of which can sit in the current group.

use crate::{
    aggregate_signatures, batch_verify_with_fallback, verify_aggregate, BlsError, BlsPublicKey,
    BlsSecretKey, BlsSignature,
};
use rondel_types::{EpochId, PubKeyBytes, SignatureBytes, SignerBitmap};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tracing::trace;

/// Errors from the multi-signer.
#[derive(Debug, Error)]
pub enum MultiSignerError {
    #[error("Key is not managed by this node")]
    NotManagedKey,

    #[error("Position {position} out of range for group of {group_size}")]
    PositionOutOfRange { position: usize, group_size: usize },

    #[error("Share store is sealed (aggregation already started)")]
    StoreSealed,

    #[error("No share stored at position {0}")]
    MissingShare(usize),

    #[error("No aggregated signature set")]
    MissingAggregate,

    #[error("Bitmap covers {bitmap} keys but group has {group_size}")]
    BitmapMismatch { bitmap: usize, group_size: usize },

    #[error(transparent)]
    Bls(#[from] BlsError),
}

struct RoundShares {
    group_keys: Vec<BlsPublicKey>,
    shares: Vec<Option<BlsSignature>>,
    aggregated: Option<BlsSignature>,
    sealed: bool,
}

impl RoundShares {
    fn empty() -> Self {
        Self {
            group_keys: Vec::new(),
            shares: Vec::new(),
            aggregated: None,
            sealed: false,
        }
    }

    fn check_position(&self, position: usize) -> Result<(), MultiSignerError> {
        if position >= self.shares.len() {
            return Err(MultiSignerError::PositionOutOfRange {
                position,
                group_size: self.shares.len(),
            });
        }
        Ok(())
    }
}

/// BLS share creation, storage and aggregation for one node.
///
/// All mutation goes through an internal mutex held only for the duration
/// of the slot write, never across signing or verification.
pub struct MultiSigner {
    managed: HashMap<PubKeyBytes, BlsSecretKey>,
    round: Mutex<RoundShares>,
}

impl MultiSigner {
    /// Create a signer over the keys this node operates.
    pub fn new(keys: Vec<BlsSecretKey>) -> Self {
        let managed = keys
            .into_iter()
            .map(|sk| (sk.public_key().to_bytes().to_vec(), sk))
            .collect();
        Self {
            managed,
            round: Mutex::new(RoundShares::empty()),
        }
    }

    /// Public keys of every managed key.
    pub fn managed_public_keys(&self) -> Vec<PubKeyBytes> {
        self.managed.keys().cloned().collect()
    }

    /// Whether this node manages the given key.
    pub fn is_managed(&self, pub_key: &[u8]) -> bool {
        self.managed.contains_key(pub_key)
    }

    /// Reset the share store for a new round's consensus group.
    pub fn reset(&self, group_keys: &[PubKeyBytes]) -> Result<(), MultiSignerError> {
        let parsed = group_keys
            .iter()
            .map(|k| BlsPublicKey::from_bytes(k))
            .collect::<Result<Vec<_>, _>>()?;
        let mut round = self.round.lock().expect("multi-signer mutex poisoned");
        round.shares = vec![None; parsed.len()];
        round.group_keys = parsed;
        round.aggregated = None;
        round.sealed = false;
        Ok(())
    }

    /// Create a share over `data` with the managed key `pub_key`, storing
    /// it at `position` on the way out.
    pub fn create_share_for_public_key(
        &self,
        data: &[u8],
        position: usize,
        epoch: EpochId,
        pub_key: &[u8],
    ) -> Result<SignatureBytes, MultiSignerError> {
        let sk = self
            .managed
            .get(pub_key)
            .ok_or(MultiSignerError::NotManagedKey)?;
        let share = sk.sign(data);
        trace!(position, %epoch, "created signature share");
        self.store_parsed_share(position, share.clone())?;
        Ok(share.to_bytes().to_vec())
    }

    /// Sign arbitrary data with a managed key without touching the share
    /// store. Used for leader signatures over finalized headers.
    pub fn sign_with_key(
        &self,
        pub_key: &[u8],
        data: &[u8],
    ) -> Result<SignatureBytes, MultiSignerError> {
        let sk = self
            .managed
            .get(pub_key)
            .ok_or(MultiSignerError::NotManagedKey)?;
        Ok(sk.sign(data).to_bytes().to_vec())
    }

    /// Store another validator's share at its consensus-group position.
    pub fn store_share(&self, position: usize, share: &[u8]) -> Result<(), MultiSignerError> {
        let parsed = BlsSignature::from_bytes(share)?;
        self.store_parsed_share(position, parsed)
    }

    fn store_parsed_share(
        &self,
        position: usize,
        share: BlsSignature,
    ) -> Result<(), MultiSignerError> {
        let mut round = self.round.lock().expect("multi-signer mutex poisoned");
        if round.sealed {
            return Err(MultiSignerError::StoreSealed);
        }
        round.check_position(position)?;
        round.shares[position] = Some(share);
        Ok(())
    }

    /// The share stored at a position, if any.
    pub fn share_at(&self, position: usize) -> Option<SignatureBytes> {
        let round = self.round.lock().expect("multi-signer mutex poisoned");
        round
            .shares
            .get(position)
            .and_then(|s| s.as_ref())
            .map(|s| s.to_bytes().to_vec())
    }

    /// Number of shares currently stored.
    pub fn stored_share_count(&self) -> usize {
        let round = self.round.lock().expect("multi-signer mutex poisoned");
        round.shares.iter().filter(|s| s.is_some()).count()
    }

    /// Aggregate the shares at the bitmap's set positions. Seals the store:
    /// no share may be stored afterwards until the next reset.
    pub fn aggregate(
        &self,
        bitmap: &SignerBitmap,
        epoch: EpochId,
    ) -> Result<SignatureBytes, MultiSignerError> {
        let mut round = self.round.lock().expect("multi-signer mutex poisoned");
        if bitmap.group_size() != round.shares.len() {
            return Err(MultiSignerError::BitmapMismatch {
                bitmap: bitmap.group_size(),
                group_size: round.shares.len(),
            });
        }
        round.sealed = true;

        let mut selected = Vec::with_capacity(bitmap.count_set());
        for position in bitmap.set_positions() {
            match &round.shares[position] {
                Some(share) => selected.push(share.clone()),
                None => return Err(MultiSignerError::MissingShare(position)),
            }
        }
        let refs: Vec<&BlsSignature> = selected.iter().collect();
        let aggregated = aggregate_signatures(&refs)?;
        trace!(signers = refs.len(), %epoch, "aggregated signature shares");
        round.aggregated = Some(aggregated.clone());
        Ok(aggregated.to_bytes().to_vec())
    }

    /// Install an externally received aggregate (participant side).
    pub fn set_aggregated(&self, signature: &[u8]) -> Result<(), MultiSignerError> {
        let parsed = BlsSignature::from_bytes(signature)?;
        let mut round = self.round.lock().expect("multi-signer mutex poisoned");
        round.aggregated = Some(parsed);
        Ok(())
    }

    /// Verify the stored aggregate over `data` against the bitmap's key set.
    pub fn verify_aggregate_over(
        &self,
        data: &[u8],
        bitmap: &SignerBitmap,
    ) -> Result<(), MultiSignerError> {
        let round = self.round.lock().expect("multi-signer mutex poisoned");
        let aggregated = round
            .aggregated
            .as_ref()
            .ok_or(MultiSignerError::MissingAggregate)?;
        if bitmap.group_size() != round.group_keys.len() {
            return Err(MultiSignerError::BitmapMismatch {
                bitmap: bitmap.group_size(),
                group_size: round.group_keys.len(),
            });
        }
        let keys: Vec<&BlsPublicKey> = bitmap
            .set_positions()
            .map(|p| &round.group_keys[p])
            .collect();
        verify_aggregate(data, aggregated, &keys)?;
        Ok(())
    }

    /// Verify a single share against an arbitrary public key.
    pub fn verify_single(
        &self,
        pub_key: &[u8],
        data: &[u8],
        share: &[u8],
    ) -> Result<(), MultiSignerError> {
        let pk = BlsPublicKey::from_bytes(pub_key)?;
        let sig = BlsSignature::from_bytes(share)?;
        pk.verify(data, &sig)?;
        Ok(())
    }

    /// Batch-verify the stored shares at `positions` over `data`, naming
    /// the failing positions. A position with no stored share fails.
    ///
    /// One multi-pairing covers the whole set; only when it fails are the
    /// shares checked one by one to identify the culprits.
    pub fn verify_shares_with_fallback(
        &self,
        positions: &[usize],
        data: &[u8],
    ) -> Result<(), Vec<usize>> {
        let round = self.round.lock().expect("multi-signer mutex poisoned");
        let mut invalid = Vec::new();
        let mut present: Vec<(usize, &BlsSignature)> = Vec::with_capacity(positions.len());
        for &position in positions {
            match round.shares.get(position).and_then(|share| share.as_ref()) {
                Some(share) => present.push((position, share)),
                None => invalid.push(position),
            }
        }

        let messages: Vec<&[u8]> = vec![data; present.len()];
        let shares: Vec<&BlsSignature> = present.iter().map(|(_, share)| *share).collect();
        let keys: Vec<&BlsPublicKey> = present
            .iter()
            .map(|(position, _)| &round.group_keys[*position])
            .collect();
        if let Err(bad) = batch_verify_with_fallback(&messages, &shares, &keys) {
            invalid.extend(bad.into_iter().map(|index| present[index].0));
        }

        if invalid.is_empty() {
            return Ok(());
        }
        invalid.sort_unstable();
        Err(invalid)
    }

}
