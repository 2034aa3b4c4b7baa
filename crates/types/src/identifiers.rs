//! Newtype identifiers used throughout the consensus core.

use sbor::prelude::*;
use std::fmt;

/// Round index, derived from wall-clock time minus genesis time.
///
/// Signed so that "before genesis" is representable as a negative index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, BasicSbor)]
#[sbor(transparent)]
pub struct RoundIndex(pub i64);

impl RoundIndex {
    /// The first round after genesis.
    pub const GENESIS: Self = RoundIndex(0);

    /// Get the next round.
    pub fn next(self) -> Self {
        RoundIndex(self.0 + 1)
    }

    /// Get the previous round.
    pub fn prev(self) -> Self {
        RoundIndex(self.0 - 1)
    }
}

impl fmt::Display for RoundIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Round({})", self.0)
    }
}

/// Block nonce (strictly sequential chain position).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, BasicSbor)]
#[sbor(transparent)]
pub struct Nonce(pub u64);

impl Nonce {
    /// Genesis nonce.
    pub const GENESIS: Self = Nonce(0);

    /// Get the next nonce.
    pub fn next(self) -> Self {
        Nonce(self.0 + 1)
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({})", self.0)
    }
}

/// Shard identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, BasicSbor)]
#[sbor(transparent)]
pub struct ShardId(pub u32);

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shard({})", self.0)
    }
}

/// The single shard identifier a sovereign chain runs under.
pub const SOVEREIGN_SHARD_ID: ShardId = ShardId(0);

/// Epoch identifier (monotonically increasing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, BasicSbor)]
#[sbor(transparent)]
pub struct EpochId(pub u32);

impl EpochId {
    /// Genesis epoch.
    pub const GENESIS: Self = EpochId(0);

    /// Get the next epoch.
    pub fn next(self) -> Self {
        EpochId(self.0 + 1)
    }
}

impl fmt::Display for EpochId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Epoch({})", self.0)
    }
}
