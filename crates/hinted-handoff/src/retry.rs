//! Retry Policy
//!
//! Exponential backoff schedule for the pump's delivery attempts.
//!
//! ```text
//! backoff(attempt) = min(initial_backoff * multiplier^attempt, max_backoff)
//!
//! Defaults (200ms initial, 2x multiplier, 31s cap, 8 attempts):
//! - Attempt 1: immediate
//! - Attempt 2: wait 200ms
//! - Attempt 3: wait 400ms
//! - ...
//! - Attempt 8: wait 12.8s
//! ```
//!
//! The cap also bounds the backpressure sleep after a permanent delivery
//! failure, so a dead downstream throttles the pump to one rollback per
//! `max_backoff` rather than spinning.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration_ms;

/// Backoff schedule for delivery retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum delivery attempts per block (default: 8)
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// First backoff duration (default: 200ms)
    #[serde(default = "default_initial_backoff", with = "duration_ms")]
    pub initial_backoff: Duration,

    /// Backoff ceiling (default: 31s)
    #[serde(default = "default_max_backoff", with = "duration_ms")]
    pub max_backoff: Duration,

    /// Growth factor between attempts (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retrying after the given 0-indexed failed attempt.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let ms = self.initial_backoff.as_millis() as f64
            * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis(ms as u64).min(self.max_backoff)
    }
}

fn default_max_retries() -> usize {
    8
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(200)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(31)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_initial() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(200));
        assert_eq!(policy.backoff(1), Duration::from_millis(400));
        assert_eq!(policy.backoff(2), Duration::from_millis(800));
        assert_eq!(policy.backoff(3), Duration::from_millis(1600));
    }

    #[test]
    fn backoff_caps_at_max() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        };
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
        assert_eq!(policy.backoff(4), Duration::from_secs(10));
        assert_eq!(policy.backoff(20), Duration::from_secs(10));
    }

    #[test]
    fn deserializes_durations_as_millis() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"max_retries":3,"initial_backoff":50}"#).unwrap();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_backoff, Duration::from_millis(50));
        assert_eq!(policy.max_backoff, Duration::from_secs(31));
    }
}
