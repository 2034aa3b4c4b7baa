//! Consensus group: the ordered validator selection for one round.

use crate::PubKeyBytes;
use std::collections::HashMap;
use thiserror::Error;

/// Errors from consensus-group construction and lookups.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GroupError {
    #[error("Consensus group is empty")]
    EmptyGroup,

    #[error("Duplicate public key at positions {first} and {second}")]
    DuplicateKey { first: usize, second: usize },
}

/// Signature quorum for a group of `group_size` validators.
///
/// Strictly more than two thirds must sign.
pub fn quorum_threshold(group_size: usize) -> usize {
    group_size * 2 / 3 + 1
}

/// Relaxed quorum used only when the header validator says fallback
/// validation applies. Always below [`quorum_threshold`].
pub fn fallback_threshold(group_size: usize) -> usize {
    group_size / 2 + 1
}

/// Ordered list of validator public keys for one round.
///
/// Position 0 is the leader. Positions are unique and stable within the
/// round; signature shares are stored and aggregated by position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusGroup {
    keys: Vec<PubKeyBytes>,
    positions: HashMap<PubKeyBytes, usize>,
}

impl ConsensusGroup {
    /// Build a group from an ordered key list.
    pub fn new(keys: Vec<PubKeyBytes>) -> Result<Self, GroupError> {
        if keys.is_empty() {
            return Err(GroupError::EmptyGroup);
        }
        let mut positions = HashMap::with_capacity(keys.len());
        for (position, key) in keys.iter().enumerate() {
            if let Some(first) = positions.insert(key.clone(), position) {
                return Err(GroupError::DuplicateKey {
                    first,
                    second: position,
                });
            }
        }
        Ok(Self { keys, positions })
    }

    /// Number of validators in the group.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True when the group holds no validators. Construction forbids this;
    /// kept for the `len`/`is_empty` pairing.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The leader's public key (position 0).
    pub fn leader(&self) -> &PubKeyBytes {
        &self.keys[0]
    }

    /// Whether the given key is the leader.
    pub fn is_leader(&self, key: &[u8]) -> bool {
        self.keys[0].as_slice() == key
    }

    /// Position of a key, if it is in the group.
    pub fn position_of(&self, key: &[u8]) -> Option<usize> {
        self.positions.get(key).copied()
    }

    /// Whether a key belongs to the group.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.positions.contains_key(key)
    }

    /// Key at a position.
    pub fn key_at(&self, position: usize) -> Option<&PubKeyBytes> {
        self.keys.get(position)
    }

    /// All keys in position order.
    pub fn keys(&self) -> &[PubKeyBytes] {
        &self.keys
    }

    /// Signature quorum for this group.
    pub fn threshold(&self) -> usize {
        quorum_threshold(self.keys.len())
    }

    /// Fallback quorum for this group.
    pub fn fallback(&self) -> usize {
        fallback_threshold(self.keys.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_of(n: usize) -> ConsensusGroup {
        ConsensusGroup::new((0..n).map(|i| vec![i as u8; 4]).collect()).unwrap()
    }

    #[test]
    fn test_thresholds() {
        assert_eq!(quorum_threshold(4), 3);
        assert_eq!(quorum_threshold(7), 5);
        assert_eq!(fallback_threshold(4), 3);
        assert_eq!(fallback_threshold(7), 4);
        assert!(fallback_threshold(10) < quorum_threshold(10));
    }

    #[test]
    fn test_leader_is_position_zero() {
        let group = group_of(4);
        assert!(group.is_leader(&[0, 0, 0, 0]));
        assert_eq!(group.position_of(&[2, 2, 2, 2]), Some(2));
        assert!(!group.contains(&[9, 9, 9, 9]));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let err = ConsensusGroup::new(vec![vec![1], vec![1]]).unwrap_err();
        assert_eq!(err, GroupError::DuplicateKey { first: 0, second: 1 });
    }

    #[test]
    fn test_empty_group_rejected() {
        assert_eq!(ConsensusGroup::new(vec![]).unwrap_err(), GroupError::EmptyGroup);
    }
}
