//! Throttled fan-out of CPU-bound jobs with cancellation.
//!
//! The signing and share-verification paths both spread work across
//! blocking tasks, bounded by a [`Throttler`], and give up as one unit
//! when the round is canceled.

use crate::{ConsensusError, Throttler};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Errors from a fan-out batch.
#[derive(Debug, Error)]
pub enum FanOutError {
    #[error("time is out")]
    TimeIsOut,

    #[error("Fan-out job panicked")]
    JobPanicked,
}

impl From<FanOutError> for ConsensusError {
    fn from(err: FanOutError) -> Self {
        match err {
            FanOutError::TimeIsOut => ConsensusError::TimeIsOut,
            FanOutError::JobPanicked => {
                ConsensusError::CommitFailed("fan-out job panicked".into())
            }
        }
    }
}

/// Run `jobs` on blocking threads, at most `throttler`-many at a time.
///
/// Results come back in completion order, paired with the job's index in
/// the input. When `cancel` flips to true the batch stops launching new
/// jobs and returns [`FanOutError::TimeIsOut`]; already-launched jobs run
/// to completion but their results are dropped. A closed cancel channel
/// means cancellation can no longer arrive and the batch runs to the end.
pub async fn run_throttled<T, F>(
    jobs: Vec<F>,
    throttler: Arc<dyn Throttler>,
    mut cancel: watch::Receiver<bool>,
) -> Result<Vec<(usize, T)>, FanOutError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let mut set = JoinSet::new();
    let mut results = Vec::with_capacity(jobs.len());
    let mut cancel_open = true;

    for (index, job) in jobs.into_iter().enumerate() {
        if *cancel.borrow() {
            return Err(FanOutError::TimeIsOut);
        }
        // Wait for a slot off the async thread.
        let gate = Arc::clone(&throttler);
        let mut acquired = tokio::task::spawn_blocking(move || {
            gate.start_processing();
        });
        loop {
            tokio::select! {
                joined = &mut acquired => {
                    if joined.is_err() {
                        return Err(FanOutError::JobPanicked);
                    }
                    break;
                }
                changed = cancel.changed(), if cancel_open => {
                    match changed {
                        Ok(()) if *cancel.borrow() => return Err(FanOutError::TimeIsOut),
                        Ok(()) => {}
                        Err(_) => cancel_open = false,
                    }
                }
            }
        }

        let gate = Arc::clone(&throttler);
        set.spawn_blocking(move || {
            let out = job();
            gate.end_processing();
            (index, out)
        });
    }

    loop {
        tokio::select! {
            joined = set.join_next() => {
                match joined {
                    Some(Ok(pair)) => results.push(pair),
                    Some(Err(_)) => return Err(FanOutError::JobPanicked),
                    None => break,
                }
            }
            changed = cancel.changed(), if cancel_open => {
                match changed {
                    Ok(()) if *cancel.borrow() => return Err(FanOutError::TimeIsOut),
                    Ok(()) => {}
                    Err(_) => cancel_open = false,
                }
            }
        }
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TokenThrottler;

    #[tokio::test]
    async fn test_all_jobs_complete() {
        let throttler = TokenThrottler::new(2);
        let (_tx, rx) = watch::channel(false);
        let jobs: Vec<Box<dyn FnOnce() -> usize + Send>> =
            (0..5usize).map(|i| Box::new(move || i * 10) as _).collect();
        let mut results = run_throttled(jobs, throttler, rx)
            .await
            .unwrap_or_else(|e| panic!("fan-out failed: {e}"));
        results.sort_by_key(|(index, _)| *index);
        let values: Vec<usize> = results.into_iter().map(|(_, v)| v).collect();
        assert_eq!(values, vec![0, 10, 20, 30, 40]);
    }

    #[tokio::test]
    async fn test_pre_canceled_batch_times_out() {
        let throttler = TokenThrottler::new(2);
        let (tx, rx) = watch::channel(false);
        tx.send(true).ok();
        let jobs: Vec<Box<dyn FnOnce() -> usize + Send>> =
            vec![Box::new(|| 1), Box::new(|| 2)];
        let err = run_throttled(jobs, throttler, rx)
            .await
            .expect_err("canceled batch must not succeed");
        assert!(matches!(err, FanOutError::TimeIsOut));
    }

    #[tokio::test]
    async fn test_closed_cancel_channel_still_completes() {
        let throttler = TokenThrottler::new(1);
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let jobs: Vec<Box<dyn FnOnce() -> usize + Send>> =
            vec![Box::new(|| 7), Box::new(|| 8)];
        let results = run_throttled(jobs, throttler, rx)
            .await
            .unwrap_or_else(|e| panic!("fan-out failed: {e}"));
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_batch_is_ok() {
        let throttler = TokenThrottler::new(1);
        let (_tx, rx) = watch::channel(false);
        let jobs: Vec<Box<dyn FnOnce() -> usize + Send>> = Vec::new();
        let results = run_throttled(jobs, throttler, rx)
            .await
            .unwrap_or_else(|e| panic!("fan-out failed: {e}"));
        assert!(results.is_empty());
    }
}
