use std::time::Duration;

/// Exponential reconnect schedule: after `k` consecutive failures the next
/// attempt waits `base * 2^k`, and once `k` exceeds `max_attempts` the
/// subscription is given up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
        }
    }

    /// Delay before the next attempt, or `None` to give up
    pub fn delay_for(&self, failures: u32) -> Option<Duration> {
        if failures > self.max_attempts {
            return None;
        }
        let factor = 2u32.saturating_pow(failures.min(20));
        Some(self.base_delay.saturating_mul(factor))
    }
}
