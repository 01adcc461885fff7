//! Exponential backoff for rate-limited catalog calls.

use favcache_core::HydrationConfig;
use std::time::Duration;

/// Backoff schedule: `base`, `2 * base`, `4 * base`, ... capped at `cap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base: Duration,
    cap: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base: Duration, cap: Duration) -> Self {
        Self {
            max_retries,
            base,
            cap: cap.max(base),
        }
    }

    pub fn from_config(config: &HydrationConfig) -> Self {
        Self::new(config.max_retries, config.backoff_unit, config.max_backoff)
    }

    /// Total attempts made before giving up. A budget of zero still makes
    /// one attempt.
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Sleep before retry number `retry` (zero-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map(|d| d.min(self.cap))
            .unwrap_or(self.cap)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&HydrationConfig::default())
    }
}
