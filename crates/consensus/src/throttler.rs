//! Concurrency throttling for CPU-bound fan-outs.

use std::sync::{Arc, Condvar, Mutex};

/// Gate on concurrent CPU-bound jobs (signing, share verification).
pub trait Throttler: Send + Sync {
    /// Whether a job may start right now.
    fn can_process(&self) -> bool;

    /// Account for a started job.
    fn start_processing(&self);

    /// Account for a finished job.
    fn end_processing(&self);
}

/// Token-counting throttler. `start_processing` blocks until a slot frees
/// up, so callers can pair `can_process` polling with blocking acquisition
/// as the workload needs.
#[derive(Debug)]
pub struct TokenThrottler {
    max: usize,
    in_flight: Mutex<usize>,
    freed: Condvar,
}

impl TokenThrottler {
    pub fn new(max: usize) -> Arc<Self> {
        Arc::new(Self {
            max: max.max(1),
            in_flight: Mutex::new(0),
            freed: Condvar::new(),
        })
    }

    fn count(&self) -> usize {
        *self.in_flight.lock().expect("throttler mutex poisoned")
    }
}

impl Throttler for TokenThrottler {
    fn can_process(&self) -> bool {
        self.count() < self.max
    }

    fn start_processing(&self) {
        let mut guard = self.in_flight.lock().expect("throttler mutex poisoned");
        while *guard >= self.max {
            guard = self.freed.wait(guard).expect("throttler mutex poisoned");
        }
        *guard += 1;
    }

    fn end_processing(&self) {
        let mut guard = self.in_flight.lock().expect("throttler mutex poisoned");
        *guard = guard.saturating_sub(1);
        drop(guard);
        self.freed.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_exhaust_and_free() {
        let throttler = TokenThrottler::new(2);
        assert!(throttler.can_process());
        throttler.start_processing();
        throttler.start_processing();
        assert!(!throttler.can_process());
        throttler.end_processing();
        assert!(throttler.can_process());
    }

    #[test]
    fn test_end_without_start_does_not_underflow() {
        let throttler = TokenThrottler::new(1);
        throttler.end_processing();
        assert!(throttler.can_process());
    }
}
