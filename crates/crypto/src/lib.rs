//! BLS multi-signature engine for Rondel consensus.
//!
//! Thin wrappers over `blst` (min_pk: 48-byte public keys on G1, 96-byte
//! signatures on G2) plus the position-keyed share store the consensus
//! subrounds drive:
//!
//! - [`BlsSecretKey`] / [`BlsPublicKey`] / [`BlsSignature`]: key material
//! - [`aggregate_signatures`] / [`verify_aggregate`]: quorum aggregation
//! - [`batch_verify_with_fallback`]: batch verification that identifies
//!   the invalid indices on failure
//! - [`MultiSigner`]: share creation, storage by consensus-group position,
//!   aggregation over a bitmap

mod aggregate;
mod keys;
mod multi_signer;
mod verify;

pub use aggregate::{aggregate_signatures, verify_aggregate};
pub use keys::{BlsError, BlsPublicKey, BlsSecretKey, BlsSignature};
pub use multi_signer::{MultiSigner, MultiSignerError};
pub use verify::{batch_verify, batch_verify_with_fallback};

/// Domain separation tag for the standard BLS12-381 G2 ciphersuite.
pub(crate) const DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_NUL_";
