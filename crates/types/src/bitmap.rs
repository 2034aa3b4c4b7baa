//! Signer bitmap for signature aggregation.
//!
//! Bit i of the bitmap is set iff consensus-group member i contributed a
//! signature share. The bitmap travels inside headers, FINAL_INFO messages
//! and header proofs.

use sbor::prelude::*;
use std::fmt;
use thiserror::Error;

/// Errors from bitmap operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BitmapError {
    #[error("Position {position} out of range for group of {group_size}")]
    PositionOutOfRange { position: usize, group_size: usize },

    #[error("Bitmap length {got} does not cover group of {group_size}")]
    WrongLength { got: usize, group_size: usize },
}

/// Compact per-position participation bitmap.
///
/// Stored little-endian by position: position p lives at byte `p / 8`,
/// bit `p % 8`.
#[derive(Clone, PartialEq, Eq, Hash, BasicSbor)]
pub struct SignerBitmap {
    bits: Vec<u8>,
    group_size: usize,
}

impl SignerBitmap {
    /// Create an empty bitmap sized for a consensus group.
    pub fn new(group_size: usize) -> Self {
        Self {
            bits: vec![0u8; group_size.div_ceil(8)],
            group_size,
        }
    }

    /// Rebuild a bitmap from wire bytes.
    pub fn from_bytes(bytes: &[u8], group_size: usize) -> Result<Self, BitmapError> {
        if bytes.len() != group_size.div_ceil(8) {
            return Err(BitmapError::WrongLength {
                got: bytes.len(),
                group_size,
            });
        }
        Ok(Self {
            bits: bytes.to_vec(),
            group_size,
        })
    }

    /// Raw bytes for the wire.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// Group size this bitmap covers.
    pub fn group_size(&self) -> usize {
        self.group_size
    }

    /// Set the bit for a position.
    pub fn set(&mut self, position: usize) -> Result<(), BitmapError> {
        if position >= self.group_size {
            return Err(BitmapError::PositionOutOfRange {
                position,
                group_size: self.group_size,
            });
        }
        self.bits[position / 8] |= 1 << (position % 8);
        Ok(())
    }

    /// Clear the bit for a position.
    pub fn clear(&mut self, position: usize) -> Result<(), BitmapError> {
        if position >= self.group_size {
            return Err(BitmapError::PositionOutOfRange {
                position,
                group_size: self.group_size,
            });
        }
        self.bits[position / 8] &= !(1 << (position % 8));
        Ok(())
    }

    /// Check whether a position's bit is set.
    pub fn is_set(&self, position: usize) -> bool {
        if position >= self.group_size {
            return false;
        }
        self.bits[position / 8] & (1 << (position % 8)) != 0
    }

    /// Number of set bits.
    pub fn count_set(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Iterate the set positions in ascending order.
    pub fn set_positions(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.group_size).filter(move |p| self.is_set(*p))
    }

    /// Whether the proposer bit (position 0) is set.
    pub fn proposer_included(&self) -> bool {
        self.is_set(0)
    }
}

impl fmt::Debug for SignerBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: String = (0..self.group_size)
            .map(|p| if self.is_set(p) { '1' } else { '0' })
            .collect();
        write!(f, "SignerBitmap({rendered})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_count() {
        let mut bitmap = SignerBitmap::new(7);
        bitmap.set(0).unwrap();
        bitmap.set(3).unwrap();
        bitmap.set(6).unwrap();
        assert_eq!(bitmap.count_set(), 3);
        assert!(bitmap.is_set(0));
        assert!(!bitmap.is_set(1));
        assert!(bitmap.proposer_included());
        assert_eq!(bitmap.set_positions().collect::<Vec<_>>(), vec![0, 3, 6]);
    }

    #[test]
    fn test_clear_removes_position() {
        let mut bitmap = SignerBitmap::new(4);
        bitmap.set(2).unwrap();
        bitmap.clear(2).unwrap();
        assert!(!bitmap.is_set(2));
        assert_eq!(bitmap.count_set(), 0);
    }

    #[test]
    fn test_out_of_range_position_rejected() {
        let mut bitmap = SignerBitmap::new(4);
        let err = bitmap.set(4).unwrap_err();
        assert_eq!(
            err,
            BitmapError::PositionOutOfRange {
                position: 4,
                group_size: 4
            }
        );
    }

    #[test]
    fn test_wire_round_trip() {
        let mut bitmap = SignerBitmap::new(10);
        bitmap.set(1).unwrap();
        bitmap.set(9).unwrap();
        let rebuilt = SignerBitmap::from_bytes(bitmap.as_bytes(), 10).unwrap();
        assert_eq!(bitmap, rebuilt);
    }

    #[test]
    fn test_wrong_length_rejected() {
        let err = SignerBitmap::from_bytes(&[0u8; 3], 10).unwrap_err();
        assert_eq!(
            err,
            BitmapError::WrongLength {
                got: 3,
                group_size: 10
            }
        );
    }
}
