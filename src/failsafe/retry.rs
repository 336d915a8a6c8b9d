//! Exponential-backoff retry for provider cold start.

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::debug;

use crate::Error;
use crate::error::ErrorKind;

/// Retry policy for a single cold-start attempt chain.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Ceiling on any single retry delay.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// A conservative default: 3 attempts, 200ms initial, 5s ceiling.
    #[must_use]
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
        }
    }

    fn builder(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_backoff)
            .with_max_delay(self.max_backoff)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
            .with_jitter()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(200), Duration::from_secs(5))
    }
}

/// Run `f` under `policy`, retrying only errors that
/// [`ErrorKind::counts_against_health`] classifies as transient.
///
/// # Errors
///
/// Returns the last error once attempts are exhausted or the error is not
/// retryable.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, name: &str, f: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let attempt = std::sync::atomic::AtomicU32::new(0);
    let op = name.to_string();
    f.retry(policy.builder())
        .when(is_retryable)
        .notify(move |err, dur| {
            let n = attempt.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
            debug!(operation = %op, attempt = n, delay_ms = dur.as_millis(), error = %err, "retrying after backoff");
        })
        .await
}

fn is_retryable(error: &Error) -> bool {
    error
        .kind()
        .is_some_and(ErrorKind::counts_against_health)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5));
        let result: Result<u32, Error> = with_retry(&policy, "t", || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_transient_errors_then_succeeds() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1), Duration::from_millis(5));
        let calls = AtomicU32::new(0);
        let result: Result<u32, Error> = with_retry(&policy, "t", || {
            let n = calls.fetch_add(1, Ordering::Relaxed);
            async move {
                if n < 2 {
                    Err(Error::TransportError("boom".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_fails_fast() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1), Duration::from_millis(5));
        let calls = AtomicU32::new(0);
        let result: Result<u32, Error> = with_retry(&policy, "t", || {
            calls.fetch_add(1, Ordering::Relaxed);
            async { Err(Error::InvalidArgument("bad".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn exhausts_max_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5));
        let calls = AtomicU32::new(0);
        let result: Result<u32, Error> = with_retry(&policy, "t", || {
            calls.fetch_add(1, Ordering::Relaxed);
            async { Err(Error::TransportError("down".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }
}
