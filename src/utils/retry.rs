// Retry utilities - Exponential backoff and retry logic for remote calls
//
// Transient failures (network errors, timeouts, rate limiting, 5xx) are
// retried with exponential backoff up to a fixed budget. Anything else is
// returned immediately. Every wait is raced against the cancellation token so
// a shutdown never sits behind a backoff sleep.

use crate::error::SyncError;
use crate::Result;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Configuration for retry behavior with exponential backoff.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use ctmirror::utils::retry::RetryConfig;
///
/// let config = RetryConfig {
///     max_retries: 3,
///     initial_backoff: Duration::from_millis(100),
///     max_backoff: Duration::from_secs(5),
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts before giving up.
    /// Default: 5
    pub max_retries: usize,

    /// Initial backoff duration for the first retry, doubled for each
    /// subsequent attempt.
    /// Default: 250ms
    pub initial_backoff: Duration,

    /// Maximum backoff duration.
    /// Default: 30 seconds
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with custom values.
    pub fn new(max_retries: usize, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
            max_backoff,
        }
    }

    /// Create a configuration with no retries (fail immediately on error).
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::from_millis(0),
            max_backoff: Duration::from_millis(0),
        }
    }

    /// Backoff to wait before retry number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: usize) -> Duration {
        let shift = attempt.saturating_sub(1).min(31) as u32;
        let backoff = self.initial_backoff.saturating_mul(1u32 << shift);
        std::cmp::min(backoff, self.max_backoff)
    }
}

/// Retry an async operation with exponential backoff.
///
/// The operation is attempted once, then retried up to `max_retries` times
/// while it fails with a transient error (see [`SyncError::is_transient`]).
/// Returns the last error once the budget is exhausted, and
/// [`SyncError::Cancelled`] if the token fires while waiting.
///
/// `on_retry` is invoked before every retry with the attempt number, which
/// the fetcher uses to feed the retry counter.
pub async fn retry_with_backoff<F, Fut, T, R>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut on_retry: R,
    operation: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: FnMut(usize, &SyncError),
{
    let mut retries = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        match operation().await {
            Ok(result) => {
                if retries > 0 {
                    tracing::debug!("Operation succeeded after {} retry(ies)", retries);
                }
                return Ok(result);
            }
            Err(e) => {
                if !e.is_transient() {
                    tracing::debug!("Non-retriable error encountered: {}", e);
                    return Err(e);
                }

                if retries >= config.max_retries {
                    tracing::warn!(
                        "Max retries ({}) exhausted, giving up: {}",
                        config.max_retries,
                        e
                    );
                    return Err(e);
                }

                retries += 1;
                let backoff = config.backoff_for(retries);
                tracing::warn!(
                    "Attempt {}/{} failed: {}, retrying in {:?}",
                    retries,
                    config.max_retries,
                    e,
                    backoff
                );
                on_retry(retries, &e);

                tokio::select! {
                    _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }
}
