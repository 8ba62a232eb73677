//! Queue configuration.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Settings for a [`TaskQueue`](crate::TaskQueue).
///
/// Deserializable with every field optional; missing fields take the
/// defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of worker loops spawned by `start()`. Must be at least 1.
    pub max_workers: usize,

    /// Upper bound on how long an idle worker sleeps before re-checking the
    /// queue and the shutdown flag.
    #[serde(with = "millis")]
    pub poll_interval: Duration,

    /// How long `stop()` waits for workers before aborting them.
    #[serde(with = "millis")]
    pub stop_timeout: Duration,

    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            poll_interval: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(5),
            event_capacity: 1024,
        }
    }
}

impl QueueConfig {
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    /// Build from `ECHOLOOP_*` environment variables, falling back to the
    /// defaults for anything unset or unparsable. Call `dotenvy::dotenv()`
    /// first if a `.env` file should be honoured.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_workers: env_parse("ECHOLOOP_MAX_WORKERS").unwrap_or(defaults.max_workers),
            poll_interval: env_parse("ECHOLOOP_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            stop_timeout: env_parse("ECHOLOOP_STOP_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.stop_timeout),
            event_capacity: env_parse("ECHOLOOP_EVENT_CAPACITY")
                .unwrap_or(defaults.event_capacity),
        }
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if self.max_workers == 0 {
            return Err(QueueError::invalid("max_workers must be at least 1"));
        }
        if self.poll_interval.is_zero() {
            return Err(QueueError::invalid("poll_interval must be greater than zero"));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key)
        .ok()
        .filter(|s| !s.is_empty())
        .and_then(|v| v.trim().parse().ok())
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
