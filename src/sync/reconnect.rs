// Reconnect - Backoff policy for connect_with_retry

use crate::config::duration_millis;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff with equal jitter. Disabled unless `max_retries > 0`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Retries after the first failed attempt
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl ReconnectPolicy {
    /// No automatic reconnection
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }

    /// Retry up to `max_retries` times with the default delays
    pub fn exponential(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::disabled()
        }
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = duration_millis(delay);
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = duration_millis(delay);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.max_retries > 0
    }

    /// Check if another attempt is allowed after `failures` failed ones
    pub fn should_retry(&self, failures: u32) -> bool {
        failures <= self.max_retries
    }

    /// Upper bound of the delay after the n-th failure (1-based).
    ///
    /// Doubles from the base delay and is capped at the max delay, which
    /// never drops below the base.
    pub fn ceiling_for(&self, failures: u32) -> Duration {
        let base = self.base_delay_ms.max(1);
        let exponent = failures.saturating_sub(1).min(10);
        let scaled = base.saturating_mul(1u64 << exponent);
        Duration::from_millis(scaled.min(self.max_delay_ms.max(base)))
    }

    /// Jittered delay in `[ceiling / 2, ceiling]`
    pub fn delay_for(&self, failures: u32) -> Duration {
        let ceiling = duration_millis(self.ceiling_for(failures));
        let floor = ceiling / 2;
        if ceiling == floor {
            return Duration::from_millis(ceiling);
        }
        Duration::from_millis(rand::thread_rng().gen_range(floor..=ceiling))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}
