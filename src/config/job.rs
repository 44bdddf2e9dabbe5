//! Scan and deletion job tuning.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Job engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    /// Minimum time spent on each scanned target, in milliseconds.
    /// Faster probes sleep out the remainder.
    #[serde(default = "default_min_scan_item_ms")]
    pub min_scan_item_ms: u64,

    /// Consecutive empty search pages tolerated while messages are still
    /// expected, before the target is abandoned.
    #[serde(default = "default_empty_search_retry_max")]
    pub empty_search_retry_max: u32,

    /// Base of the linear backoff between empty search pages.
    #[serde(default = "default_empty_search_retry_base_ms")]
    pub empty_search_retry_base_ms: u64,

    /// Size of the persisted job log ring.
    #[serde(default = "default_max_log_entries")]
    pub max_log_entries: usize,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            min_scan_item_ms: default_min_scan_item_ms(),
            empty_search_retry_max: default_empty_search_retry_max(),
            empty_search_retry_base_ms: default_empty_search_retry_base_ms(),
            max_log_entries: default_max_log_entries(),
        }
    }
}

impl JobConfig {
    pub(super) fn validate(&self) -> Result<(), String> {
        if self.max_log_entries == 0 {
            return Err("job.max_log_entries must be at least 1".into());
        }
        Ok(())
    }

    pub fn min_scan_item(&self) -> Duration {
        Duration::from_millis(self.min_scan_item_ms)
    }

    /// Delay before empty-page retry number `retry` (1-based).
    pub fn empty_search_delay(&self, retry: u32) -> Duration {
        Duration::from_millis(self.empty_search_retry_base_ms * u64::from(retry))
    }
}

fn default_min_scan_item_ms() -> u64 {
    1000
}

fn default_empty_search_retry_max() -> u32 {
    5
}

fn default_empty_search_retry_base_ms() -> u64 {
    1200
}

fn default_max_log_entries() -> usize {
    500
}
