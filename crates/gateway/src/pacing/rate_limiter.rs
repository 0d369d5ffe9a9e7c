use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{Instant, sleep_until};

/// Burst + minimum interval request gate
///
/// Two independent limits, both awaited by [`RateLimiter::acquire`]:
/// - at most `burst` holders of a [`RatePermit`] at once
/// - consecutive acquisitions at least `1 / rate_per_sec` apart
///
/// Instances are injected wherever requests are paced; there is no global
/// limiter.
#[derive(Debug)]
pub struct RateLimiter {
    permits: Arc<Semaphore>,
    burst: usize,
    min_interval: Duration,
    last_acquire: Mutex<Option<Instant>>,
}

/// Longest supported gap between requests; slower rates are clamped to it
pub const MAX_MIN_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Held while the paced request is in flight; dropping it frees a burst slot
#[derive(Debug)]
pub struct RatePermit {
    _permit: Option<OwnedSemaphorePermit>,
}

impl RateLimiter {
    /// `rate_per_sec <= 0` disables the interval limit, `burst` is at least 1
    pub fn new(rate_per_sec: f64, burst: usize) -> Self {
        let min_interval = if rate_per_sec.is_finite() && rate_per_sec > 0.0 {
            Self::interval_for(rate_per_sec).unwrap_or(MAX_MIN_INTERVAL)
        } else {
            Duration::ZERO
        };
        let burst = burst.max(1);
        RateLimiter {
            permits: Arc::new(Semaphore::new(burst)),
            burst,
            min_interval,
            last_acquire: Mutex::new(None),
        }
    }

    /// Gap between requests at `rate_per_sec`, or `None` when it is longer
    /// than [`MAX_MIN_INTERVAL`] or not representable
    pub fn interval_for(rate_per_sec: f64) -> Option<Duration> {
        Duration::try_from_secs_f64(1.0 / rate_per_sec)
            .ok()
            .filter(|interval| *interval <= MAX_MIN_INTERVAL)
    }

    /// Market data subscriptions: 2 per second, 5 in flight
    pub fn market_data() -> Self {
        Self::new(2.0, 5)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn burst(&self) -> usize {
        self.burst
    }

    /// Burst slots not currently held
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a burst slot, then for the minimum interval since the last grant
    pub async fn acquire(&self) -> RatePermit {
        // The semaphore is never closed
        let permit = self.permits.clone().acquire_owned().await.ok();

        let mut last = self.last_acquire.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.min_interval;
            if ready_at > Instant::now() {
                sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());

        RatePermit { _permit: permit }
    }
}
