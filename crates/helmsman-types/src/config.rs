//! Scheduler configuration types.
//!
//! `SchedulerConfig` represents the top-level `config.toml` that controls
//! lease timing and event retry behavior.

use serde::{Deserialize, Serialize};

use std::time::Duration;

/// Top-level configuration for the Helmsman scheduler.
///
/// Loaded from `<data dir>/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How long a step lease grants exclusivity before a competing worker
    /// may take over, in seconds.
    #[serde(default = "default_lease_duration_secs")]
    pub lease_duration_secs: u64,

    /// Delay before re-delivering a schedule event after a lease-contention
    /// suspension, in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// SQLite database URL. When absent, derived from the data directory.
    #[serde(default)]
    pub database_url: Option<String>,
}

fn default_lease_duration_secs() -> u64 {
    30
}

fn default_retry_backoff_ms() -> u64 {
    100
}

impl SchedulerConfig {
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lease_duration_secs: default_lease_duration_secs(),
            retry_backoff_ms: default_retry_backoff_ms(),
            database_url: None,
        }
    }
}
