//! Retry policy and backoff calculation for the request pipeline.

use std::time::Duration;

use crate::error::ConnectorError;

/// Default maximum number of retries after the first attempt.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay (1 second).
const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Default ceiling for any single delay (60 seconds).
const DEFAULT_MAX_DELAY_MS: u64 = 60_000;

/// Policy for retrying transient failures with exponential backoff.
///
/// The delay before retry `n` (zero-based) is `base_delay * 2^n`, capped at
/// `max_delay`. With jitter enabled the delay is drawn uniformly from
/// `[delay / 2, delay]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            jitter: false,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new().with_max_retries(0)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Backoff before retry number `attempt` (zero-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay to sleep before retry number `attempt`, honoring a server-supplied
    /// `Retry-After` when the error carries one.
    pub fn delay_for(&self, attempt: u32, error: &ConnectorError) -> Duration {
        if let Some(requested) = error.retry_after() {
            return requested.min(self.max_delay);
        }
        let delay = self.backoff(attempt);
        if self.jitter {
            apply_jitter(delay)
        } else {
            delay
        }
    }

    /// Whether another attempt is allowed after `retries_so_far` retries.
    pub fn should_retry(&self, error: &ConnectorError, retries_so_far: u32) -> bool {
        error.is_retryable() && retries_so_far < self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_jitter(delay: Duration) -> Duration {
    let mut buf = [0u8; 8];
    rand::Rng::fill_bytes(&mut rand::rng(), &mut buf);
    let unit = (u64::from_le_bytes(buf) >> 11) as f64 / (1u64 << 53) as f64;
    delay.mul_f64(0.5 + unit / 2.0)
}
