//! Sleep schedule for consecutive token failures.

use std::time::Duration;

/// Doubling delay: `base_delay * 2^(n-1)` after `n` consecutive failures,
/// capped at `max_delay`. The loop keeps retrying at the cap indefinitely.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    pub fn exponential(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// Delay after `failures` consecutive failures. Zero failures, zero delay.
    pub fn delay_for_attempt(&self, failures: u32) -> Duration {
        let Some(doublings) = failures.checked_sub(1) else {
            return Duration::ZERO;
        };
        let factor = 1u32.checked_shl(doublings).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}
