// Reconnection policy for the live channel: bounded exponential backoff with jitter

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Number of reconnect attempts after a drop; zero disables reconnection
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// No automatic reconnect; a new connection only comes with a new session
    pub fn disabled() -> Self {
        ReconnectPolicy {
            max_attempts: 0,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }

    pub fn exponential(max_attempts: u32) -> Self {
        ReconnectPolicy {
            max_attempts,
            ..ReconnectPolicy::disabled()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 0
    }

    /// Upper bound of the delay before reconnect attempt `attempt` (zero based)
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Delay before attempt `attempt`, or `None` once attempts are exhausted.
    ///
    /// The result lies in `[base/2, base]` so clients dropped together do not
    /// reconnect in lockstep.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let base = self.base_delay(attempt);
        let half = base / 2;
        let jitter_ms = half.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        Some(half + jitter)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::disabled()
    }
}
