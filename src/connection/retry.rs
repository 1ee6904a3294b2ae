//! Reconnect backoff policy.
//!
//! Transient disconnects re-enter the flow under exponential backoff with
//! jitter. Retries are bounded: the single-flight slot is held for the whole
//! flow, so an unbounded tight loop would starve every queued request.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff configuration for transient reconnects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Maximum reconnect attempts per flow.
    pub max_attempts: u32,
    /// Base delay for exponential backoff (milliseconds).
    pub base_delay_ms: u64,
    /// Delay cap (milliseconds).
    pub max_delay_ms: u64,
    /// Jitter factor (0.0 to 1.0) added on top of the computed delay.
    pub jitter_factor: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter_factor: 0.25,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        let jitter = (base as f64 * self.jitter_factor * rand::thread_rng().gen_range(0.0..=1.0))
            as u64;
        Duration::from_millis(base.saturating_add(jitter))
    }

    /// Policy with no delay at all, for tests.
    #[cfg(test)]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter_factor: 0.0,
        }
    }
}
