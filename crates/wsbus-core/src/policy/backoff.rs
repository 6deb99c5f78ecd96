//! Exponential reconnect backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the reconnect backoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,
    /// Cap on the exponential growth, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Give up after this many consecutive failed cycles (`None` = never).
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

fn default_base_ms() -> u64 { 1_000 }
fn default_max_delay_ms() -> u64 { 8_000 }

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: default_base_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: None,
        }
    }
}

impl BackoffConfig {
    pub fn base(&self) -> Duration {
        Duration::from_millis(self.base_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Backoff state: the attempt counter plus the delay schedule.
///
/// `attempt` counts consecutive failed/closed cycles since the last
/// successful open.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Delay for the given 1-based attempt: `min(max, base * 2^(attempt-1))`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let delay_ms = self.config.base_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(delay_ms.min(self.config.max_delay_ms))
    }

    /// Record a failed cycle and return the delay before the next attempt.
    /// Returns `None` once `max_attempts` is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.config.max_attempts {
            if self.attempt >= max {
                return None;
            }
        }
        self.attempt += 1;
        Some(self.delay_for(self.attempt))
    }

    /// Reset after a successful open.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(base_ms: u64, max_delay_ms: u64, max_attempts: Option<u32>) -> Backoff {
        Backoff::new(BackoffConfig {
            base_ms,
            max_delay_ms,
            max_attempts,
        })
    }

    #[test]
    fn delays_double_then_cap() {
        let mut b = backoff(1_000, 8_000, None);
        let delays: Vec<u128> = (0..5).map(|_| b.next_delay().unwrap().as_millis()).collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 8_000]);
        assert_eq!(b.attempt(), 5);
    }

    #[test]
    fn first_retry_uses_base() {
        let mut b = backoff(250, 10_000, None);
        assert_eq!(b.next_delay(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn reset_restarts_schedule() {
        let mut b = backoff(1_000, 8_000, None);
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.attempt(), 0);
        assert_eq!(b.next_delay(), Some(Duration::from_millis(1_000)));
    }

    #[test]
    fn max_attempts_exhausts() {
        let mut b = backoff(1_000, 8_000, Some(2));
        assert!(b.next_delay().is_some());
        assert!(b.next_delay().is_some());
        assert!(b.next_delay().is_none());
        assert_eq!(b.attempt(), 2);
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let b = backoff(1_000, 8_000, None);
        assert_eq!(b.delay_for(200), Duration::from_millis(8_000));
    }

    #[test]
    fn config_defaults_from_empty_json() {
        let cfg: BackoffConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, BackoffConfig::default());
        assert_eq!(cfg.base(), Duration::from_secs(1));
        assert_eq!(cfg.max_delay(), Duration::from_secs(8));
    }
}
