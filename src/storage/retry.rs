//! Bounded retry with a fixed delay schedule
//!
//! The policy knows nothing about backends: the caller supplies the
//! retriable-error predicate. With the default schedule an operation is
//! attempted at most four times, sleeping 1s, 3s and 5s in between.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Delays between attempts of the default policy
pub const DEFAULT_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(3),
    Duration::from_secs(5),
];

/// Fixed-schedule retry policy
///
/// One initial attempt plus one retry per configured delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays: DEFAULT_RETRY_DELAYS.to_vec(),
        }
    }
}

impl RetryPolicy {
    pub fn new(delays: impl Into<Vec<Duration>>) -> Self {
        Self {
            delays: delays.into(),
        }
    }

    /// A policy that never retries
    pub fn none() -> Self {
        Self { delays: Vec::new() }
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Maximum number of times an operation is attempted
    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }

    /// Run `operation` until it succeeds, fails with a non-retriable error,
    /// or the schedule is exhausted
    ///
    /// Returns the last observed error when every attempt failed. The sleeps
    /// suspend only the calling task.
    pub async fn run<T, E, F, Fut, P>(&self, mut operation: F, is_retriable: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !is_retriable(&err) {
                return Err(err);
            }

            let Some(delay) = self.delays.get(attempt) else {
                warn!(
                    "giving up after {} attempts: {}",
                    self.max_attempts(),
                    err
                );
                return Err(err);
            };

            attempt += 1;
            debug!("attempt {attempt} failed ({err}), retrying in {delay:?}");
            tokio::time::sleep(*delay).await;
        }
    }
}

/// Run `operation` with the default 1s/3s/5s schedule
pub async fn with_retry<T, E, F, Fut, P>(operation: F, is_retriable: P) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    RetryPolicy::default().run(operation, is_retriable).await
}
