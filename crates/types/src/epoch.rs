//! Epoch feature flags.
//!
//! Behavior changes are gated by activation epochs: a flag is enabled from
//! its activation epoch onward. The consensus core consults flags through
//! the [`EnableEpochsHandler`] trait so runners can supply their own source.

use crate::EpochId;
use std::fmt;

/// Feature flags the consensus core consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EpochFlag {
    /// The "equivalent proofs" consensus model: any participant may
    /// finalize a header proof; the leader signature leaves the wire.
    EquivalentMessages,
    /// Relaxed signature quorum when the header validator permits
    /// fallback validation.
    FallbackValidation,
}

impl fmt::Display for EpochFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EpochFlag::EquivalentMessages => write!(f, "EquivalentMessages"),
            EpochFlag::FallbackValidation => write!(f, "FallbackValidation"),
        }
    }
}

/// Source of truth for epoch-gated feature flags.
pub trait EnableEpochsHandler: Send + Sync {
    /// Whether `flag` is active in `epoch`.
    fn is_flag_enabled_in_epoch(&self, flag: EpochFlag, epoch: EpochId) -> bool;
}

/// Static activation table, the common implementation.
#[derive(Debug, Clone)]
pub struct ActivationEpochs {
    /// Epoch from which equivalent proofs are active. `None` disables the
    /// feature entirely.
    pub equivalent_messages: Option<EpochId>,
    /// Epoch from which fallback validation is permitted.
    pub fallback_validation: Option<EpochId>,
}

impl ActivationEpochs {
    /// Everything disabled (legacy consensus only).
    pub fn all_disabled() -> Self {
        Self {
            equivalent_messages: None,
            fallback_validation: None,
        }
    }

    /// Everything active from genesis.
    pub fn all_from_genesis() -> Self {
        Self {
            equivalent_messages: Some(EpochId::GENESIS),
            fallback_validation: Some(EpochId::GENESIS),
        }
    }
}

impl EnableEpochsHandler for ActivationEpochs {
    fn is_flag_enabled_in_epoch(&self, flag: EpochFlag, epoch: EpochId) -> bool {
        let activation = match flag {
            EpochFlag::EquivalentMessages => self.equivalent_messages,
            EpochFlag::FallbackValidation => self.fallback_validation,
        };
        matches!(activation, Some(at) if epoch >= at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_activates_at_epoch() {
        let epochs = ActivationEpochs {
            equivalent_messages: Some(EpochId(3)),
            fallback_validation: None,
        };
        assert!(!epochs.is_flag_enabled_in_epoch(EpochFlag::EquivalentMessages, EpochId(2)));
        assert!(epochs.is_flag_enabled_in_epoch(EpochFlag::EquivalentMessages, EpochId(3)));
        assert!(epochs.is_flag_enabled_in_epoch(EpochFlag::EquivalentMessages, EpochId(9)));
        assert!(!epochs.is_flag_enabled_in_epoch(EpochFlag::FallbackValidation, EpochId(9)));
    }
}
