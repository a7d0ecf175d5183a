//! Cleanup worker scheduling.
//!
//! # Example
//!
//! ```toml
//! [worker]
//! interval_secs = 3600
//! dry_run = true
//! max_unlists_per_run = 50
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Controls when cleanup runs happen and how much a run may change.
///
/// Without `interval_secs` the worker performs a single run and returns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    /// Seconds between the start of one run and the next.
    #[serde(default)]
    pub interval_secs: Option<u64>,

    /// Seconds to wait before the first run.
    #[serde(default)]
    pub initial_delay_secs: u64,

    /// If true, log what would be unlisted without calling the registry.
    #[serde(default)]
    pub dry_run: bool,

    /// Maximum unlist calls per run (0 = unlimited).
    #[serde(default)]
    pub max_unlists_per_run: u64,
}

impl WorkerConfig {
    pub fn interval(&self) -> Option<Duration> {
        self.interval_secs.map(Duration::from_secs)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    /// Unlist budget for one run.
    pub fn unlist_limit(&self) -> u64 {
        if self.max_unlists_per_run == 0 {
            u64::MAX
        } else {
            self.max_unlists_per_run
        }
    }

    pub(super) fn validate(&self) -> Result<(), String> {
        if self.interval_secs == Some(0) {
            return Err("worker.interval_secs must be greater than 0".into());
        }
        Ok(())
    }
}
