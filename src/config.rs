//! Manager configuration
//!
//! Timing knobs for the pipeline: global deadline, dependency polling, and
//! retry backoff. All durations deserialize from integer milliseconds.

use serde::Deserialize;
use std::time::Duration;

/// Timing configuration for [`InitManager`](crate::manager::InitManager).
#[derive(Debug, Clone, Deserialize)]
pub struct ManagerConfig {
    /// Wall-clock budget for the whole pipeline
    #[serde(default = "default_global_deadline", with = "millis")]
    pub global_deadline: Duration,
    /// Interval at which the dependency waiter re-checks state
    #[serde(default = "default_poll_interval", with = "millis")]
    pub poll_interval: Duration,
    /// Ceiling on how long one step may wait for its dependencies
    #[serde(default = "default_wait_ceiling", with = "millis")]
    pub dependency_wait_ceiling: Duration,
    /// Base delay between retry attempts
    #[serde(default = "default_retry_base_delay", with = "millis")]
    pub retry_base_delay: Duration,
    /// Cap on the retry backoff delay
    #[serde(default = "default_retry_max_delay", with = "millis")]
    pub retry_max_delay: Duration,
}

fn default_global_deadline() -> Duration {
    Duration::from_secs(30)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(25)
}

fn default_wait_ceiling() -> Duration {
    Duration::from_secs(10)
}

fn default_retry_base_delay() -> Duration {
    Duration::from_millis(200)
}

fn default_retry_max_delay() -> Duration {
    Duration::from_secs(5)
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            global_deadline: default_global_deadline(),
            poll_interval: default_poll_interval(),
            dependency_wait_ceiling: default_wait_ceiling(),
            retry_base_delay: default_retry_base_delay(),
            retry_max_delay: default_retry_max_delay(),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
