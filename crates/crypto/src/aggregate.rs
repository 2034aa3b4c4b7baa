//! Signature aggregation for quorum voting.

use super::keys::{BlsError, BlsPublicKey, BlsSignature};
use super::DST;
use blst::min_pk::AggregateSignature as BlstAggSig;
use blst::BLST_ERROR;

/// Aggregate multiple BLS signatures into one.
pub fn aggregate_signatures(signatures: &[&BlsSignature]) -> Result<BlsSignature, BlsError> {
    if signatures.is_empty() {
        return Err(BlsError::SigningFailed);
    }

    let sigs: Vec<&blst::min_pk::Signature> = signatures.iter().map(|s| s.inner()).collect();

    let agg = BlstAggSig::aggregate(&sigs, true).map_err(|_| BlsError::SigningFailed)?;

    Ok(BlsSignature(agg.to_signature()))
}

/// Verify an aggregated signature over a single shared message against the
/// set of contributing public keys (quorum voting: all signers sign the
/// same data hash).
pub fn verify_aggregate(
    message: &[u8],
    signature: &BlsSignature,
    public_keys: &[&BlsPublicKey],
) -> Result<(), BlsError> {
    if public_keys.is_empty() {
        return Err(BlsError::VerificationFailed(BLST_ERROR::BLST_AGGR_TYPE_MISMATCH));
    }

    let pks: Vec<&blst::min_pk::PublicKey> = public_keys.iter().map(|pk| pk.inner()).collect();

    let result = signature
        .inner()
        .fast_aggregate_verify(true, message, DST, &pks);

    if result != BLST_ERROR::BLST_SUCCESS {
        return Err(BlsError::VerificationFailed(result));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BlsSecretKey;

    fn keys(n: u8) -> Vec<BlsSecretKey> {
        (0..n)
            .map(|i| BlsSecretKey::key_gen(&[i + 1; 32]).unwrap())
            .collect()
    }

    #[test]
    fn test_aggregate_verifies_over_signers() {
        let sks = keys(4);
        let message = b"data hash";
        let sigs: Vec<BlsSignature> = sks.iter().map(|sk| sk.sign(message)).collect();
        let sig_refs: Vec<&BlsSignature> = sigs.iter().collect();
        let agg = aggregate_signatures(&sig_refs).unwrap();

        let pks: Vec<BlsPublicKey> = sks.iter().map(|sk| sk.public_key()).collect();
        let pk_refs: Vec<&BlsPublicKey> = pks.iter().collect();
        assert!(verify_aggregate(message, &agg, &pk_refs).is_ok());
    }

    #[test]
    fn test_aggregate_fails_with_wrong_key_set() {
        let sks = keys(3);
        let message = b"data hash";
        let sigs: Vec<BlsSignature> = sks.iter().map(|sk| sk.sign(message)).collect();
        let sig_refs: Vec<&BlsSignature> = sigs.iter().collect();
        let agg = aggregate_signatures(&sig_refs).unwrap();

        // Drop one contributor from the verification set.
        let pks: Vec<BlsPublicKey> = sks[..2].iter().map(|sk| sk.public_key()).collect();
        let pk_refs: Vec<&BlsPublicKey> = pks.iter().collect();
        assert!(verify_aggregate(message, &agg, &pk_refs).is_err());
    }

    #[test]
    fn test_empty_aggregate_rejected() {
        assert!(aggregate_signatures(&[]).is_err());
    }
}
