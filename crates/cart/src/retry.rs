//! Timeouts and retries for remote cart calls.
//!
//! Every call is bounded by [`RetryPolicy::timeout`]. Only idempotent calls
//! (fetch, quantity update, delete, delete-all) are retried; an insert that
//! timed out may still have landed, so it is attempted exactly once.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::config::SyncConfig;
use crate::remote::RemoteError;

/// Timeout and backoff settings for remote calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Upper bound for a single attempt.
    pub timeout: Duration,
    /// Total attempts for idempotent calls.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for RetryPolicy {
    fn from(config: &SyncConfig) -> Self {
        Self {
            timeout: config.remote_timeout,
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay,
            max_delay: config.max_delay,
        }
    }
}

impl RetryPolicy {
    /// Run a non-idempotent call once, bounded by the timeout.
    ///
    /// # Errors
    ///
    /// Returns the call's error, or `RemoteError::Timeout`.
    pub async fn once<T, Fut>(&self, call: Fut) -> Result<T, RemoteError>
    where
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or(Err(RemoteError::Timeout(self.timeout)))
    }

    /// Run an idempotent call, retrying transient failures with backoff.
    ///
    /// `call` is invoked once per attempt.
    ///
    /// # Errors
    ///
    /// Returns the first non-transient error, or the last error once all
    /// attempts are used.
    pub async fn idempotent<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut attempt = 1;
        loop {
            match self.once(call()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt, &e);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Transient cart service failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Exponential backoff ceiling for the given retry (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before the next attempt: half the backoff plus random jitter,
    /// or the server's `Retry-After` when it asks for longer.
    fn delay_for(&self, attempt: u32, error: &RemoteError) -> Duration {
        let ceiling = self.backoff(attempt);
        let half = ceiling / 2;
        let jitter_ms = u64::try_from(half.as_millis()).unwrap_or(u64::MAX);
        let delay = half + Duration::from_millis(rand::rng().random_range(0..=jitter_ms));

        match error {
            RemoteError::RateLimited(secs) => delay
                .max(Duration::from_secs(*secs))
                .min(self.max_delay),
            _ => delay,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(50),
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    fn unavailable() -> RemoteError {
        RemoteError::Status {
            status: 503,
            body: String::new(),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        assert_eq!(policy.backoff(10), Duration::from_secs(5));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_delay_stays_within_backoff() {
        let policy = RetryPolicy::default();
        for attempt in 1..5 {
            let delay = policy.delay_for(attempt, &unavailable());
            assert!(delay >= policy.backoff(attempt) / 2);
            assert!(delay <= policy.backoff(attempt));
        }
    }

    #[test]
    fn test_rate_limit_delay_is_capped() {
        let policy = RetryPolicy::default();
        let delay = policy.delay_for(1, &RemoteError::RateLimited(60));
        assert_eq!(delay, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_once_times_out() {
        let policy = fast();
        let result: Result<(), _> = policy.once(std::future::pending()).await;
        assert!(matches!(result, Err(RemoteError::Timeout(d)) if d == policy.timeout));
    }

    #[tokio::test]
    async fn test_idempotent_retries_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let result = fast()
            .idempotent("update", || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(unavailable())
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_idempotent_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let result: Result<(), _> = fast()
            .idempotent("delete", || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(unavailable()) }
            })
            .await;

        assert!(matches!(result, Err(RemoteError::Status { status: 503, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let result: Result<(), _> = fast()
            .idempotent("update", || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(RemoteError::NotFound("row".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(RemoteError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
