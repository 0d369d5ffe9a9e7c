use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Exponential backoff for an async operation
///
/// One initial attempt plus up to `retries` more. The wait before retry `k`
/// (1-based) is `backoff * 2^(k-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            retries: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(retries: u32, backoff: Duration) -> Self {
        RetryPolicy { retries, backoff }
    }

    /// Single attempt, never retries
    pub fn none() -> Self {
        RetryPolicy::new(0, Duration::ZERO)
    }

    /// Wait before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.backoff.saturating_mul(factor)
    }

    /// Run `op` until it succeeds, the error is not retryable, or retries run out.
    ///
    /// Errors for which `retry_if` returns false are returned immediately.
    /// After exhaustion the last error is returned.
    pub async fn run<T, E, F, Fut, P>(&self, mut op: F, retry_if: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut retry = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if retry < self.retries && retry_if(&e) => {
                    retry += 1;
                    let delay = self.delay_for(retry);
                    debug!(retry, delay_ms = delay.as_millis() as u64, error = %e, "Retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
