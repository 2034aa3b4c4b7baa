//! Round clock: the single source of round truth.

use rondel_types::RoundIndex;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

/// Monotone mapping from wall-clock time to round coordinates.
///
/// Read-only to every consensus component; only the chronology task calls
/// the clock, and the round index never decreases for non-decreasing time.
pub trait Rounder: Send + Sync {
    /// Current round index. Negative before genesis.
    fn index(&self) -> RoundIndex;

    /// Wall-clock start time of the current round.
    fn time_stamp(&self) -> SystemTime;

    /// Duration of one round.
    fn time_duration(&self) -> Duration;

    /// Time left inside a window of `max` length that opened at `start`.
    /// Zero when the window has already closed.
    fn remaining_time(&self, start: SystemTime, max: Duration) -> Duration {
        let elapsed = SystemTime::now()
            .duration_since(start)
            .unwrap_or(Duration::ZERO);
        max.saturating_sub(elapsed)
    }
}

/// Wall-clock rounder anchored to a genesis instant.
pub struct WallClockRounder {
    genesis: SystemTime,
    round_duration: Duration,
}

impl WallClockRounder {
    /// Create a rounder for a chain with the given genesis time and round
    /// duration.
    pub fn new(genesis: SystemTime, round_duration: Duration) -> Self {
        Self {
            genesis,
            round_duration,
        }
    }
}

impl Rounder for WallClockRounder {
    fn index(&self) -> RoundIndex {
        match SystemTime::now().duration_since(self.genesis) {
            Ok(since) => {
                RoundIndex((since.as_nanos() / self.round_duration.as_nanos()) as i64)
            }
            // Before genesis.
            Err(e) => {
                let behind = e.duration();
                let rounds = behind.as_nanos().div_ceil(self.round_duration.as_nanos());
                RoundIndex(-(rounds as i64))
            }
        }
    }

    fn time_stamp(&self) -> SystemTime {
        let index = self.index().0;
        if index >= 0 {
            self.genesis + self.round_duration * index as u32
        } else {
            self.genesis - self.round_duration * (-index) as u32
        }
    }

    fn time_duration(&self) -> Duration {
        self.round_duration
    }
}

/// Manually advanced rounder for tests: the index moves only when told to.
pub struct ManualRounder {
    index: Mutex<i64>,
    anchored: SystemTime,
    round_duration: Duration,
}

impl ManualRounder {
    /// Start at a given index.
    pub fn new(index: i64, round_duration: Duration) -> Self {
        Self {
            index: Mutex::new(index),
            anchored: SystemTime::now(),
            round_duration,
        }
    }

    /// Advance to the next round.
    pub fn advance(&self) {
        *self.index.lock().expect("rounder mutex poisoned") += 1;
    }

    /// Jump to a specific index.
    pub fn set_index(&self, index: i64) {
        *self.index.lock().expect("rounder mutex poisoned") = index;
    }
}

impl Rounder for ManualRounder {
    fn index(&self) -> RoundIndex {
        RoundIndex(*self.index.lock().expect("rounder mutex poisoned"))
    }

    fn time_stamp(&self) -> SystemTime {
        self.anchored
    }

    fn time_duration(&self) -> Duration {
        self.round_duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wall_clock_index_advances_with_time() {
        let genesis = SystemTime::now() - Duration::from_secs(10);
        let rounder = WallClockRounder::new(genesis, Duration::from_secs(2));
        let index = rounder.index();
        assert!(index.0 >= 4 && index.0 <= 5, "unexpected index {index}");
    }

    #[test]
    fn test_before_genesis_is_negative() {
        let genesis = SystemTime::now() + Duration::from_secs(60);
        let rounder = WallClockRounder::new(genesis, Duration::from_secs(2));
        assert!(rounder.index().0 < 0);
    }

    #[test]
    fn test_remaining_time_saturates() {
        let rounder = ManualRounder::new(0, Duration::from_secs(1));
        let past = SystemTime::now() - Duration::from_secs(5);
        assert_eq!(
            rounder.remaining_time(past, Duration::from_secs(1)),
            Duration::ZERO
        );
        let now = SystemTime::now();
        assert!(rounder.remaining_time(now, Duration::from_secs(60)) > Duration::from_secs(59));
    }

    #[test]
    fn test_manual_rounder_advances() {
        let rounder = ManualRounder::new(3, Duration::from_millis(100));
        rounder.advance();
        assert_eq!(rounder.index(), RoundIndex(4));
        rounder.set_index(10);
        assert_eq!(rounder.index(), RoundIndex(10));
    }
}
