//! Configuration structures for the mailbox daemon.
//!
//! Supports TOML deserialization with defaults matching the demonstration
//! setup: a half-second control loop publishing 128-sample waveforms.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level mailbox configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    /// Period of the control loop.
    #[serde(with = "humantime_serde")]
    pub period: Duration,

    /// Number of samples generated per waveform and iteration.
    pub event_count: usize,

    /// Record name prefix; records are published as `<prefix>:rbk` and `<prefix>:set`.
    pub prefix: String,

    /// When staged set-points are committed to the readback record.
    pub apply_policy: ApplyPolicy,

    /// Buffered updates per subscriber of a posted record.
    pub observer_capacity: usize,

    /// Bound on external writes waiting for the service thread.
    pub service_queue: usize,

    /// Stop after this many iterations (0 = run until signalled).
    pub max_cycles: u64,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(500),
            event_count: 128,
            prefix: String::from("mbox"),
            apply_policy: ApplyPolicy::default(),
            observer_capacity: 16,
            service_queue: 64,
            max_cycles: 0,
        }
    }
}

/// Policy for committing staged set-points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApplyPolicy {
    /// Commit only once an explicit `nextApplyAfter` has passed.
    #[default]
    Scheduled,
    /// Commit freshly written set-points on the next iteration when no schedule is given.
    Immediate,
}

impl MailboxConfig {
    /// Name of the read-only readback record.
    #[must_use]
    pub fn readback_name(&self) -> String {
        format!("{}:rbk", self.prefix)
    }

    /// Name of the writable settings record.
    #[must_use]
    pub fn settings_name(&self) -> String {
        format!("{}:set", self.prefix)
    }

    /// Check values that serde cannot reject on its own.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero period, zero capacities or an empty prefix.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.period.is_zero() {
            return Err(ConfigError::Invalid("period must be non-zero".into()));
        }
        if self.prefix.is_empty() {
            return Err(ConfigError::Invalid("prefix must not be empty".into()));
        }
        if self.observer_capacity == 0 || self.service_queue == 0 {
            return Err(ConfigError::Invalid(
                "observer_capacity and service_queue must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        tracing::debug!(path = %path.display(), bytes = content.len(), "Configuration file read");
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Semantically invalid value.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
