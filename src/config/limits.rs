//! Rate limiter tuning.
//!
//! ```toml
//! [rate_limit]
//! default_delay_ms = 1100
//! min_delay_ms = 250
//! max_delay_ms = 10000
//! backoff_multiplier = 1.8
//! recovery_factor = 0.85
//! jitter_ms = 180
//! max_attempts = 5
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-bucket pacing configuration.
///
/// Every bucket learns its own spacing between calls (the adaptive delay),
/// starting at `default_delay_ms`. A 429 multiplies it by
/// `backoff_multiplier`, a success multiplies it by `recovery_factor`, and the
/// result is always clamped to `[min_delay_ms, max_delay_ms]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Initial spacing between calls on a fresh bucket.
    #[serde(default = "default_delay_ms")]
    pub default_delay_ms: u64,

    /// Floor for the adaptive delay.
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Cap for the adaptive delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Growth factor applied on every 429.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Shrink factor applied on every non-429 response.
    #[serde(default = "default_recovery_factor")]
    pub recovery_factor: f64,

    /// Uniform jitter added to each wait, in `[-jitter_ms, +jitter_ms]`.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    /// Attempts per request before giving up (includes the first).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Wait used when a 429 carries no `retry-after` header.
    #[serde(default = "default_retry_after_secs")]
    pub default_retry_after_secs: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_delay_ms: default_delay_ms(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            recovery_factor: default_recovery_factor(),
            jitter_ms: default_jitter_ms(),
            max_attempts: default_max_attempts(),
            default_retry_after_secs: default_retry_after_secs(),
        }
    }
}

impl RateLimitConfig {
    pub(super) fn validate(&self) -> Result<(), String> {
        if self.min_delay_ms > self.max_delay_ms {
            return Err("rate_limit.min_delay_ms must not exceed max_delay_ms".into());
        }
        if !(self.min_delay_ms..=self.max_delay_ms).contains(&self.default_delay_ms) {
            return Err(
                "rate_limit.default_delay_ms must lie within [min_delay_ms, max_delay_ms]".into(),
            );
        }
        if self.backoff_multiplier < 1.0 {
            return Err("rate_limit.backoff_multiplier must be at least 1.0".into());
        }
        if !(self.recovery_factor > 0.0 && self.recovery_factor <= 1.0) {
            return Err("rate_limit.recovery_factor must be in (0, 1]".into());
        }
        if self.max_attempts == 0 {
            return Err("rate_limit.max_attempts must be at least 1".into());
        }
        if self.default_retry_after_secs < 0.0 {
            return Err("rate_limit.default_retry_after_secs must not be negative".into());
        }
        Ok(())
    }

    /// Adaptive delay after a 429, capped at `max_delay_ms`.
    pub fn backoff(&self, current_ms: u64) -> u64 {
        let grown = (current_ms as f64 * self.backoff_multiplier).round() as u64;
        grown.clamp(self.min_delay_ms, self.max_delay_ms)
    }

    /// Adaptive delay after a healthy response, floored at `min_delay_ms`.
    pub fn recover(&self, current_ms: u64) -> u64 {
        let shrunk = (current_ms as f64 * self.recovery_factor).round() as u64;
        shrunk.clamp(self.min_delay_ms, self.max_delay_ms)
    }

    /// Add uniform jitter to a base delay.
    pub fn with_jitter(&self, base_ms: u64) -> Duration {
        let jitter = if self.jitter_ms > 0 {
            use rand::Rng;
            let span = self.jitter_ms as i64;
            rand::thread_rng().gen_range(-span..=span)
        } else {
            0
        };
        Duration::from_millis((base_ms as i64 + jitter).max(0) as u64)
    }
}

fn default_delay_ms() -> u64 {
    1100
}

fn default_min_delay_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    1.8
}

fn default_recovery_factor() -> f64 {
    0.85
}

fn default_jitter_ms() -> u64 {
    180
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_after_secs() -> f64 {
    5.0
}
