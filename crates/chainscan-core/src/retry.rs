//! Fetch-with-retry: a bounded number of attempts, each under its own
//! timeout, with exponential backoff in between.

use std::future::Future;
use std::time::Duration;

use crate::config::FetchConfig;
use crate::error::ScanError;
use crate::types::RetryableFetch;

/// Upper bound on the sleep between two attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Stateless retry policy — computes the next delay given the attempt number.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    attempts: u32,
    timeout: Duration,
    initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, timeout: Duration, initial_backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            timeout,
            initial_backoff,
        }
    }

    /// Returns the delay before the attempt following failed attempt `attempt`
    /// (1-based), or `None` if no attempts remain.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.attempts {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        Some(self.initial_backoff.saturating_mul(factor).min(MAX_BACKOFF))
    }

    /// Run `call` until it succeeds, fails with a non-retryable error, or
    /// attempts are exhausted. A timed-out attempt is abandoned and its late
    /// result discarded.
    pub async fn run<T, F, Fut>(&self, what: &str, mut call: F) -> RetryableFetch<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ScanError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let err = match tokio::time::timeout(self.timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => ScanError::FetchTimeout {
                    what: what.to_string(),
                    ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                },
            };
            if !err.is_retryable() {
                return Err(err);
            }
            match self.next_delay(attempt) {
                Some(delay) => {
                    tracing::debug!(
                        what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying fetch"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => return Err(err),
            }
        }
    }
}

impl From<&FetchConfig> for RetryPolicy {
    fn from(cfg: &FetchConfig) -> Self {
        Self::new(cfg.attempts, cfg.timeout(), Duration::from_millis(cfg.backoff_ms))
    }
}
