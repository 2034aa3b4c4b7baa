//! Batch verification with invalid-index fallback.
//!
//! The end-of-round subround uses the fallback path to identify which
//! consensus-group positions contributed bad shares after an aggregate
//! failed to verify.

use super::keys::{BlsError, BlsPublicKey, BlsSignature};
use super::DST;
use blst::blst_scalar;
use blst::min_pk::Signature;
use blst::BLST_ERROR;

/// Creates a blst_scalar from a 64-bit little-endian value. The scalar is
/// stored in a 256-bit field with the upper bytes zeroed.
fn scalar_from_u64(val: u64) -> blst_scalar {
    let mut s = blst_scalar { b: [0u8; 32] };
    s.b[..8].copy_from_slice(&val.to_le_bytes());
    s
}

/// Batch-verify multiple (message, signature, public_key) tuples.
///
/// Uses blst's multi-pairing with random 64-bit scalars for rogue-key
/// protection. Significantly faster than verifying individually.
pub fn batch_verify(
    messages: &[&[u8]],
    signatures: &[&BlsSignature],
    public_keys: &[&BlsPublicKey],
) -> Result<(), BlsError> {
    if messages.len() != signatures.len() || signatures.len() != public_keys.len() {
        return Err(BlsError::VerificationFailed(BLST_ERROR::BLST_BAD_ENCODING));
    }

    if messages.is_empty() {
        return Ok(());
    }

    // Single signature: direct verification, no scalar overhead.
    if messages.len() == 1 {
        return public_keys[0].verify(messages[0], signatures[0]);
    }

    let mut rands: Vec<blst_scalar> = Vec::with_capacity(messages.len());
    rands.push(scalar_from_u64(1));

    for _ in 1..messages.len() {
        let mut rand_bytes = [0u8; 8];
        getrandom::fill(&mut rand_bytes).map_err(|_| BlsError::SigningFailed)?;
        let mut val = u64::from_le_bytes(rand_bytes);
        if val == 0 {
            val = 1;
        }
        rands.push(scalar_from_u64(val));
    }

    let sigs: Vec<&Signature> = signatures.iter().map(|s| s.inner()).collect();
    let pks: Vec<&blst::min_pk::PublicKey> = public_keys.iter().map(|pk| pk.inner()).collect();

    let result = Signature::verify_multiple_aggregate_signatures(
        messages, DST, &pks, false, &sigs, true, &rands, 64,
    );

    if result != BLST_ERROR::BLST_SUCCESS {
        return Err(BlsError::VerificationFailed(result));
    }

    Ok(())
}

/// Batch-verify with fallback: if the batch fails, fall back to individual
/// verification to identify which signatures are invalid.
///
/// Returns `Ok(())` if all signatures are valid, or `Err` with the indices
/// of the invalid signatures.
pub fn batch_verify_with_fallback(
    messages: &[&[u8]],
    signatures: &[&BlsSignature],
    public_keys: &[&BlsPublicKey],
) -> Result<(), Vec<usize>> {
    if messages.len() != signatures.len() || signatures.len() != public_keys.len() {
        return Err((0..messages.len()).collect());
    }

    if messages.is_empty() {
        return Ok(());
    }

    if batch_verify(messages, signatures, public_keys).is_ok() {
        return Ok(());
    }

    let invalid: Vec<usize> = (0..messages.len())
        .filter(|&i| public_keys[i].verify(messages[i], signatures[i]).is_err())
        .collect();

    if invalid.is_empty() {
        // Batch path failed but every individual check passed; treat the
        // set as valid (the batch path can fail on malformed scalar input).
        return Ok(());
    }

    Err(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BlsSecretKey;

    #[test]
    fn test_batch_verify_all_valid() {
        let message: &[u8] = b"shared";
        let sks: Vec<BlsSecretKey> = (0..5)
            .map(|i| BlsSecretKey::key_gen(&[i + 1; 32]).unwrap())
            .collect();
        let sigs: Vec<_> = sks.iter().map(|sk| sk.sign(message)).collect();
        let pks: Vec<_> = sks.iter().map(|sk| sk.public_key()).collect();

        let messages: Vec<&[u8]> = vec![message; 5];
        let sig_refs: Vec<_> = sigs.iter().collect();
        let pk_refs: Vec<_> = pks.iter().collect();
        assert!(batch_verify(&messages, &sig_refs, &pk_refs).is_ok());
    }

    #[test]
    fn test_fallback_identifies_invalid_index() {
        let message: &[u8] = b"shared";
        let sks: Vec<BlsSecretKey> = (0..4)
            .map(|i| BlsSecretKey::key_gen(&[i + 1; 32]).unwrap())
            .collect();
        let mut sigs: Vec<_> = sks.iter().map(|sk| sk.sign(message)).collect();
        // Position 2 signs the wrong message.
        sigs[2] = sks[2].sign(b"tampered");
        let pks: Vec<_> = sks.iter().map(|sk| sk.public_key()).collect();

        let messages: Vec<&[u8]> = vec![message; 4];
        let sig_refs: Vec<_> = sigs.iter().collect();
        let pk_refs: Vec<_> = pks.iter().collect();
        let invalid = batch_verify_with_fallback(&messages, &sig_refs, &pk_refs).unwrap_err();
        assert_eq!(invalid, vec![2]);
    }

    #[test]
    fn test_length_mismatch_marks_everything_invalid() {
        let sk = BlsSecretKey::key_gen(&[9; 32]).unwrap();
        let sig = sk.sign(b"m");
        let pk = sk.public_key();
        let messages: Vec<&[u8]> = vec![b"m", b"m"];
        let result = batch_verify_with_fallback(&messages, &[&sig], &[&pk]);
        assert_eq!(result.unwrap_err(), vec![0, 1]);
    }
}
