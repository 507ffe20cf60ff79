//! Reconciliation settings
//!
//! Deadlines and backoff bounds for remote calls and polling, loadable from
//! JSON and overridable from `CONVERGE_*` environment variables.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;
use crate::poller::PollPolicy;
use crate::resilience::RetryPolicy;

/// Prefix shared by all environment overrides.
pub const ENV_PREFIX: &str = "CONVERGE_";

/// Timing settings for one reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSettings {
    /// Retry deadline for reads and existence checks, in seconds.
    #[serde(default = "default_read_deadline")]
    pub read_deadline_secs: u64,

    /// Retry deadline for create, update, delete and tag calls, in seconds.
    #[serde(default = "default_write_deadline")]
    pub write_deadline_secs: u64,

    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound for a single retry delay, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Randomize retry delays downwards.
    #[serde(default = "default_true")]
    pub jitter: bool,

    /// Pause between two status reads while polling, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Time budget for one poll loop, in seconds.
    #[serde(default = "default_poll_deadline")]
    pub poll_deadline_secs: u64,
}

fn default_read_deadline() -> u64 {
    180
}

fn default_write_deadline() -> u64 {
    300
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_poll_deadline() -> u64 {
    1_800
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            read_deadline_secs: default_read_deadline(),
            write_deadline_secs: default_write_deadline(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            jitter: default_true(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_deadline_secs: default_poll_deadline(),
        }
    }
}

impl ReconcileSettings {
    /// Create settings with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse settings from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Defaults overridden by `CONVERGE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides(std::env::vars())
    }

    /// Apply overrides from `(name, value)` pairs; unrelated names are ignored.
    pub fn with_env_overrides<I>(mut self, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(key) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let target = match key {
                "READ_DEADLINE_SECS" => &mut self.read_deadline_secs,
                "WRITE_DEADLINE_SECS" => &mut self.write_deadline_secs,
                "INITIAL_BACKOFF_MS" => &mut self.initial_backoff_ms,
                "MAX_BACKOFF_MS" => &mut self.max_backoff_ms,
                "POLL_INTERVAL_MS" => &mut self.poll_interval_ms,
                "POLL_DEADLINE_SECS" => &mut self.poll_deadline_secs,
                "JITTER" => {
                    self.jitter = parse_bool(&name, &value)?;
                    continue;
                }
                _ => continue,
            };
            *target = value.trim().parse().map_err(|_| ConfigError::Env {
                var: name.clone(),
                value: value.clone(),
                expected: "non-negative integer",
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check that the settings describe a usable schedule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_backoff_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "initial_backoff_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(ConfigError::Invalid {
                field: "max_backoff_ms",
                message: format!(
                    "must be at least initial_backoff_ms ({})",
                    self.initial_backoff_ms
                ),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "poll_interval_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Get read deadline as Duration.
    #[must_use]
    pub fn read_deadline(&self) -> Duration {
        Duration::from_secs(self.read_deadline_secs)
    }

    /// Get write deadline as Duration.
    #[must_use]
    pub fn write_deadline(&self) -> Duration {
        Duration::from_secs(self.write_deadline_secs)
    }

    /// Get poll interval as Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Get poll deadline as Duration.
    #[must_use]
    pub fn poll_deadline(&self) -> Duration {
        Duration::from_secs(self.poll_deadline_secs)
    }

    fn retry_policy(&self, deadline: Duration) -> RetryPolicy {
        RetryPolicy {
            deadline,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            jitter: self.jitter,
        }
    }

    /// Retry policy for reads.
    #[must_use]
    pub fn read_policy(&self) -> RetryPolicy {
        self.retry_policy(self.read_deadline())
    }

    /// Retry policy for writes.
    #[must_use]
    pub fn write_policy(&self) -> RetryPolicy {
        self.retry_policy(self.write_deadline())
    }

    /// Poll policy, reading through the read retry policy.
    #[must_use]
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(self.poll_interval(), self.poll_deadline())
            .with_read_policy(self.read_policy())
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Env {
            var: name.to_string(),
            value: value.to_string(),
            expected: "boolean",
        }),
    }
}
