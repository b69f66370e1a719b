//! Retry delay policy

use std::time::Duration;

use rand::Rng;

use crate::config::SyncSettings;

/// Largest exponent applied to the base delay; beyond it the cap always wins.
const MAX_EXPONENT: u32 = 20;

/// Capped exponential backoff with additive random jitter.
///
/// `delay(n) = min(max, base * 2^n) + uniform(0..=jitter)`, where `n` is the
/// number of retries already spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub jitter: Duration,
}

impl BackoffPolicy {
    pub const fn new(base: Duration, max: Duration, jitter: Duration) -> Self {
        Self { base, max, jitter }
    }

    /// No waiting at all; retries become eligible immediately
    pub const fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, Duration::ZERO)
    }

    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self::new(
            Duration::from_millis(settings.base_retry_delay_ms),
            Duration::from_millis(settings.max_retry_delay_ms),
            Duration::from_millis(settings.retry_jitter_ms),
        )
    }

    /// Deterministic part of the delay
    pub fn exponential(&self, retry_count: u32) -> Duration {
        let factor = 1_u32 << retry_count.min(MAX_EXPONENT);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Delay before the next attempt after `retry_count` spent retries
    pub fn delay(&self, retry_count: u32) -> Duration {
        self.exponential(retry_count) + random_jitter(self.jitter)
    }
}

/// Uniform random duration in `0..=max`
pub(crate) fn random_jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}
