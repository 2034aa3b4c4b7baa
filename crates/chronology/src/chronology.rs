//! The cooperative subround scheduler.
//!
//! A single task owns the registered handlers and walks them through their
//! windows in order. Nothing else mutates consensus state; message
//! callbacks hand their effects to the handlers through shared state and
//! wake this task via the consensus-state-changed [`Notify`].

use crate::{Rounder, SubroundHandler, SubroundId, SubroundStatus};
use rondel_types::RoundIndex;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

/// Errors from chronology construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChronologyError {
    #[error("Subround {0} registered twice")]
    DuplicateSubround(SubroundId),

    #[error("No subround handlers registered")]
    NoHandlers,
}

/// Scheduler tuning knobs.
#[derive(Debug, Clone)]
pub struct ChronologyConfig {
    /// Polling interval inside a subround window while waiting for the
    /// completion criterion.
    pub check_interval: Duration,
}

impl Default for ChronologyConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_millis(5),
        }
    }
}

/// How a round ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Every subround reported Finished.
    Finished,
    /// A subround gave up; the remaining handlers were marked Canceled.
    Canceled,
}

/// Observer invoked as each subround window opens, before its job runs.
/// Message dispatchers use it to learn which subround is current.
pub type TransitionHook = Box<dyn FnMut(RoundIndex, SubroundId) + Send>;

/// The subround scheduler.
pub struct Chronology {
    rounder: Arc<dyn Rounder>,
    handlers: Vec<Box<dyn SubroundHandler>>,
    transition_hooks: Vec<TransitionHook>,
    wake: Arc<Notify>,
    config: ChronologyConfig,
}

/// Sleep until a wall-clock instant, returning immediately when it passed.
async fn sleep_until_system(deadline: SystemTime) {
    if let Ok(remaining) = deadline.duration_since(SystemTime::now()) {
        tokio::time::sleep(remaining).await;
    }
}

impl Chronology {
    /// Create a scheduler over a round clock and a wake latch.
    pub fn new(
        rounder: Arc<dyn Rounder>,
        wake: Arc<Notify>,
        config: ChronologyConfig,
    ) -> Self {
        Self {
            rounder,
            handlers: Vec::new(),
            transition_hooks: Vec::new(),
            wake,
            config,
        }
    }

    /// Register a hook called on every subround transition.
    pub fn on_transition(&mut self, hook: TransitionHook) {
        self.transition_hooks.push(hook);
    }

    /// Register a handler, keeping the list sorted by
    /// (start_fraction, subround id).
    pub fn register(&mut self, handler: Box<dyn SubroundHandler>) -> Result<(), ChronologyError> {
        if self.handlers.iter().any(|h| h.id() == handler.id()) {
            return Err(ChronologyError::DuplicateSubround(handler.id()));
        }
        self.handlers.push(handler);
        self.handlers.sort_by(|a, b| {
            a.spec()
                .start_fraction
                .partial_cmp(&b.spec().start_fraction)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id().cmp(&b.id()))
        });
        Ok(())
    }

    /// Drive the current round through every subround.
    pub async fn run_round(&mut self) -> Result<RoundOutcome, ChronologyError> {
        if self.handlers.is_empty() {
            return Err(ChronologyError::NoHandlers);
        }
        let round = self.rounder.index();
        let round_start = self.rounder.time_stamp();
        let duration = self.rounder.time_duration();
        debug!(%round, "round opened");

        for i in 0..self.handlers.len() {
            let spec = self.handlers[i].spec();
            let window_open = round_start + duration.mul_f64(spec.start_fraction);
            let window_close = round_start + duration.mul_f64(spec.end_fraction);
            sleep_until_system(window_open).await;

            for hook in &mut self.transition_hooks {
                hook(round, spec.id);
            }
            let job_ok = self.handlers[i].do_job(round).await;
            if !job_ok {
                debug!(%round, subround = %spec.id, "subround job reported failure");
            }

            match self.drive_subround(i, round, window_close).await {
                SubroundStatus::Finished => continue,
                _ => {
                    for later in self.handlers[i + 1..].iter_mut() {
                        later.cancel();
                    }
                    warn!(%round, subround = %spec.id, "round canceled");
                    return Ok(RoundOutcome::Canceled);
                }
            }
        }

        info!(%round, "round finished");
        Ok(RoundOutcome::Finished)
    }

    /// Poll one subround until it finishes, lapses or cancels.
    async fn drive_subround(
        &mut self,
        index: usize,
        round: RoundIndex,
        window_close: SystemTime,
    ) -> SubroundStatus {
        let mut extended = false;
        loop {
            match self.handlers[index].do_check() {
                SubroundStatus::Finished => return SubroundStatus::Finished,
                SubroundStatus::Canceled => return SubroundStatus::Canceled,
                SubroundStatus::NotFinished | SubroundStatus::Extended => {}
            }

            let remaining = window_close
                .duration_since(SystemTime::now())
                .unwrap_or(Duration::ZERO);

            if remaining.is_zero() {
                if !extended {
                    extended = true;
                    debug!(%round, subround = %self.handlers[index].id(), "window lapsed, extending");
                    self.handlers[index].extend();
                    // One more check after the extension before giving up.
                    continue;
                }
                return self.handlers[index].do_check();
            }

            let tick = remaining.min(self.config.check_interval);
            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(tick) => {}
            }
        }
    }

    /// Run rounds until shutdown. Waits out each round boundary; a round's
    /// EndRound always completes before the next round's StartRound runs.
    pub async fn start_rounds(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ChronologyError> {
        let mut last_run: Option<RoundIndex> = None;
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            let current = self.rounder.index();
            if current.0 < 0 || last_run == Some(current) {
                let tick = self.config.check_interval;
                tokio::select! {
                    _ = shutdown.changed() => {}
                    _ = tokio::time::sleep(tick) => {}
                }
                continue;
            }
            last_run = Some(current);
            self.run_round().await?;
        }
    }
}
