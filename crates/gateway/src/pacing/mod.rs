//! Outbound request pacing
//!
//! The gateway disconnects clients that flood it with requests, so every
//! subscription goes through a [`RateLimiter`] and transient send failures
//! through a [`RetryPolicy`].

mod rate_limiter;
mod retry;

pub use rate_limiter::{RateLimiter, RatePermit};
pub use retry::RetryPolicy;
