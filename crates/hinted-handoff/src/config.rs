//! Service Configuration
//!
//! Controls the on-disk layout, admission limits, and the cadence of the
//! background tasks:
//!
//! - **base_dir**: root directory; each queue lives at `<base_dir>/<cluster>/<topic>/`
//! - **max_queue_size**: per-queue byte cap across all segments; -1 is unbounded
//! - **segment_max_size**: soft cap per segment file before rollover (default: 10MiB)
//! - **max_block_size**: largest framed record accepted (default: 1MiB)
//! - **purge_interval**: how often the housekeeper trims aged segments (default: 10 min)
//! - **max_age**: segments fully behind the cursor older than this are deleted (default: 7 days)
//! - **poll_eof_sleep**: pump idle sleep when the queue is drained (default: 1s)
//! - **dump_per_blocks**: cursor checkpoint cadence, in delivered blocks (default: 100)
//! - **retry**: the pump's delivery backoff schedule
//!
//! ## Usage
//!
//! ```ignore
//! use hinted_handoff::Config;
//!
//! // Production: bound each queue to 1GB
//! let config = Config {
//!     max_queue_size: 1 << 30,
//!     ..Config::new("/var/lib/gateway/hh")
//! };
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory for all queues.
    pub base_dir: PathBuf,

    /// Maximum bytes per queue across all its segments; -1 means unbounded.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: i64,

    /// Soft cap per segment file before a new one is created (default: 10MiB)
    #[serde(default = "default_segment_max_size")]
    pub segment_max_size: u64,

    /// Largest framed block accepted by `append` (default: 1MiB)
    #[serde(default = "default_max_block_size")]
    pub max_block_size: u64,

    /// Housekeeper wake-up interval (default: 10 minutes)
    #[serde(default = "default_purge_interval", with = "duration_ms")]
    pub purge_interval: Duration,

    /// Age threshold for deleting fully-consumed segments (default: 7 days)
    #[serde(default = "default_max_age", with = "duration_ms")]
    pub max_age: Duration,

    /// Pump sleep when the queue has nothing to read (default: 1s)
    #[serde(default = "default_poll_eof_sleep", with = "duration_ms")]
    pub poll_eof_sleep: Duration,

    /// Cursor checkpoint cadence in successfully delivered blocks (default: 100)
    #[serde(default = "default_dump_per_blocks")]
    pub dump_per_blocks: u64,

    /// Delivery retry schedule.
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Config {
    /// A config with defaults rooted at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            max_queue_size: default_max_queue_size(),
            segment_max_size: default_segment_max_size(),
            max_block_size: default_max_block_size(),
            purge_interval: default_purge_interval(),
            max_age: default_max_age(),
            poll_eof_sleep: default_poll_eof_sleep(),
            dump_per_blocks: default_dump_per_blocks(),
            retry: RetryPolicy::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("./data/hh")
    }
}

fn default_max_queue_size() -> i64 {
    -1
}

fn default_segment_max_size() -> u64 {
    10 << 20
}

fn default_max_block_size() -> u64 {
    1 << 20
}

fn default_purge_interval() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_max_age() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_poll_eof_sleep() -> Duration {
    Duration::from_secs(1)
}

fn default_dump_per_blocks() -> u64 {
    100
}

/// Serialize `Duration` fields as integer milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.max_queue_size, -1);
        assert_eq!(config.segment_max_size, 10 << 20);
        assert_eq!(config.max_block_size, 1 << 20);
        assert_eq!(config.purge_interval, Duration::from_secs(600));
        assert_eq!(config.max_age, Duration::from_secs(604_800));
        assert_eq!(config.poll_eof_sleep, Duration::from_secs(1));
        assert_eq!(config.dump_per_blocks, 100);
        assert_eq!(config.retry.max_retries, 8);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"base_dir":"/tmp/hh","max_queue_size":1048576,"poll_eof_sleep":25}"#,
        )
        .unwrap();
        assert_eq!(config.base_dir, PathBuf::from("/tmp/hh"));
        assert_eq!(config.max_queue_size, 1 << 20);
        assert_eq!(config.poll_eof_sleep, Duration::from_millis(25));
        assert_eq!(config.segment_max_size, 10 << 20);
    }
}
