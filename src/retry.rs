//! Opt-in retries for transient failures.
//!
//! [`Client::call`](crate::Client::call) never retries on its own beyond the
//! single refresh after a 401. Callers that want to ride out network blips,
//! 429s or Xero outages wrap the call in [`with_backoff`].

use std::future::Future;
use std::time::Duration;

use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};

use crate::error::{Error, Result};

/// How many times and how patiently to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    fn delays(self) -> impl Iterator<Item = Duration> {
        // from_millis(2) doubles each step; factor scales the first step to
        // initial_delay.
        let factor = u64::try_from(self.initial_delay.as_millis() / 2).unwrap_or(u64::MAX).max(1);
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.max_delay)
            .map(jitter)
            .take(self.max_retries)
    }
}

/// Runs `action` until it succeeds, fails with a non-retryable error, or the
/// policy is exhausted. Only errors with [`Error::is_retryable`] are retried.
pub async fn with_backoff<T, A, Fut>(policy: RetryPolicy, mut action: A) -> Result<T>
where
    A: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0usize;
    RetryIf::spawn(
        policy.delays(),
        || {
            attempt += 1;
            if attempt > 1 {
                debug!(attempt, "retrying xero call");
            }
            action()
        },
        |err: &Error| {
            let retry = err.is_retryable();
            if retry {
                warn!(error = %err, "transient xero failure");
            }
            retry
        },
    )
    .await
}
