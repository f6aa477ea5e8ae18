use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

pub const PUBLISH_MAX_ATTEMPTS: u32 = 5;
pub const PUBLISH_BACKOFF_MS: u64 = 20;
pub const PUBLISH_BACKOFF_JITTER_MS: u64 = 10;

/// What to do with a publish response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// 2xx: the update was delivered.
    Delivered,
    /// 5xx with attempts left: send again as retry number `attempt`.
    Retry { attempt: u32 },
    /// 5xx with no attempts left.
    Exhausted,
    /// Any other status; not retryable.
    Rejected,
}

/// Jittered exponential backoff for best-effort publishing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay_ms: u64,
    jitter_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64, jitter_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            jitter_ms,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay_ms(&self) -> u64 {
        self.base_delay_ms
    }

    pub fn jitter_ms(&self) -> u64 {
        self.jitter_ms
    }

    /// Classify a response status given how many retries were already made.
    pub fn decide(&self, status_code: u16, attempts: u32) -> RetryDecision {
        match status_code / 100 {
            2 => RetryDecision::Delivered,
            5 if attempts < self.max_attempts => RetryDecision::Retry {
                attempt: attempts + 1,
            },
            5 => RetryDecision::Exhausted,
            _ => RetryDecision::Rejected,
        }
    }

    /// Un-jittered delay: zero for the first send, then `2^(attempt-1) * base`.
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let shift = (attempt - 1).min(20);
        Duration::from_millis(self.base_delay_ms.saturating_mul(1_u64 << shift))
    }

    /// Delay before retry number `attempt`, jittered by up to `±jitter_ms`.
    pub fn delay_for_attempt<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let base = self.base_delay_for_attempt(attempt).as_millis() as u64;
        Duration::from_millis(with_jitter(base, self.jitter_ms, rng.r#gen::<f64>()))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            PUBLISH_MAX_ATTEMPTS,
            PUBLISH_BACKOFF_MS,
            PUBLISH_BACKOFF_JITTER_MS,
        )
    }
}

/// `value - jitter + floor(2 * jitter * sample + 0.5)`, clamped at zero.
///
/// `sample` is a uniform draw from `[0, 1)`.
pub fn with_jitter(value: u64, jitter: u64, sample: f64) -> u64 {
    let offset = (2.0 * jitter as f64 * sample + 0.5).floor() as i128;
    let jittered = i128::from(value) - i128::from(jitter) + offset;
    jittered.max(0) as u64
}
