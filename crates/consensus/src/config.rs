//! Consensus configuration.

use crate::ConsensusError;
use std::time::Duration;

/// Tuning knobs and identity for one consensus participant.
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// Chain identifier; messages with any other value are dropped.
    pub chain_id: Vec<u8>,
    /// Shard this node participates in.
    pub shard: rondel_types::ShardId,
    /// Fraction of the end-round window to wait for all signatures before
    /// latching `waiting_all_signatures_timeout`.
    pub waiting_all_sigs_max_threshold: f64,
    /// Poll interval of the signature-wait loop.
    pub time_between_signatures_checks: Duration,
    /// Cap on concurrent workers in the signing / verification fan-outs.
    pub max_concurrent_workers: usize,
    /// Maximum buffered future-round messages per (round, type) key.
    pub message_buffer_capacity: usize,
    /// Number of round snapshots retained for debugging.
    pub snapshot_capacity: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            chain_id: b"rondel".to_vec(),
            shard: rondel_types::ShardId(0),
            waiting_all_sigs_max_threshold: 0.5,
            time_between_signatures_checks: Duration::from_millis(5),
            max_concurrent_workers: 8,
            message_buffer_capacity: 64,
            snapshot_capacity: 16,
        }
    }
}

impl ConsensusConfig {
    /// Validate the configuration at construction time.
    pub fn validate(&self) -> Result<(), ConsensusError> {
        if self.chain_id.is_empty() {
            return Err(ConsensusError::InvalidConfig("empty chain id".into()));
        }
        if !(0.0..=1.0).contains(&self.waiting_all_sigs_max_threshold) {
            return Err(ConsensusError::InvalidConfig(format!(
                "waiting_all_sigs_max_threshold {} outside [0, 1]",
                self.waiting_all_sigs_max_threshold
            )));
        }
        if self.max_concurrent_workers == 0 {
            return Err(ConsensusError::InvalidConfig(
                "max_concurrent_workers must be positive".into(),
            ));
        }
        if self.message_buffer_capacity == 0 {
            return Err(ConsensusError::InvalidConfig(
                "message_buffer_capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ConsensusConfig::default().validate().is_ok());
    }

    #[test]
    fn test_bad_threshold_rejected() {
        let config = ConsensusConfig {
            waiting_all_sigs_max_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = ConsensusConfig {
            max_concurrent_workers: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
