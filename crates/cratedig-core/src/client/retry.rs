//! Retry policy and the per-attempt outcome the call loop branches on.

use crate::errors::ApiError;
use serde_json::Value;
use std::time::Duration;

/// Wait policy for retryable failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts = max_retries + 1.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random jitter, as a fraction of the exponential
    /// delay. Drawn freshly for every attempt.
    pub jitter_fraction: f64,
    /// Wait for a rate-limit response that carries no advised interval.
    pub rate_limit_fallback: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_fraction: 0.25,
            rate_limit_fallback: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// `min(max_delay, base * 2^attempt * (1 + jitter))`, fresh jitter each call.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponential = self.base_delay.as_secs_f64() * 2f64.powi(attempt.min(16) as i32);
        let jitter = exponential * self.jitter_fraction * rand::random::<f64>();
        Duration::from_secs_f64((exponential + jitter).min(self.max_delay.as_secs_f64()))
    }
}

/// Result of one attempt. The retry loop is ordinary control flow over this
/// value: `Retry` carries both the wait and the error to surface if the
/// attempt budget runs out before the next try.
#[derive(Debug)]
pub(crate) enum AttemptOutcome {
    Validated(Value),
    Retry {
        wait: Duration,
        on_exhaustion: ApiError,
    },
    Terminal(ApiError),
}
