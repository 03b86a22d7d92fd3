//! Exponential backoff with a ceiling.

use std::time::Duration;

pub const BASE_DELAY: Duration = Duration::from_millis(3000);
pub const MAX_DELAY: Duration = Duration::from_millis(30000);
pub const BACKOFF_FACTOR: f64 = 1.5;

/// Computes reconnect delays from a failure streak.
///
/// Stateless: the client owns the streak counter, starting at 1 on the first
/// failure and resetting to 0 on any successful connection or poll.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base_delay: Duration,
    max_delay: Duration,
    factor: f64,
}

impl ReconnectPolicy {
    pub fn new() -> Self {
        Self {
            base_delay: BASE_DELAY,
            max_delay: MAX_DELAY,
            factor: BACKOFF_FACTOR,
        }
    }

    /// `min(base * factor^(attempt - 1), max)`; attempt 0 is treated as 1.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_ms = self.base_delay.as_millis() as f64 * self.factor.powi(exponent);
        let capped = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.round() as u64)
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new()
    }
}
