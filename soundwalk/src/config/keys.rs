//! Typed access to individual configuration keys, for `config get|set|list`.

use std::fmt;
use std::str::FromStr;

use super::file::{expand_tilde, parse_value, ConfigError, ConfigFile};
use crate::playback::ReentryPolicy;

/// A `section.key` name understood by the config commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    ApiBaseUrl,
    ApiTimeoutSecs,
    TrackingCheckIntervalMs,
    TrackingPrefilterRadiusM,
    TrackingReentryPolicy,
    TrackingStartTimeoutSecs,
    CacheDirectory,
    LoggingDirectory,
    LoggingLevel,
}

const ALL_KEYS: [ConfigKey; 9] = [
    ConfigKey::ApiBaseUrl,
    ConfigKey::ApiTimeoutSecs,
    ConfigKey::TrackingCheckIntervalMs,
    ConfigKey::TrackingPrefilterRadiusM,
    ConfigKey::TrackingReentryPolicy,
    ConfigKey::TrackingStartTimeoutSecs,
    ConfigKey::CacheDirectory,
    ConfigKey::LoggingDirectory,
    ConfigKey::LoggingLevel,
];

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl ConfigKey {
    /// Every key, grouped by section in file order.
    pub fn all() -> &'static [ConfigKey] {
        &ALL_KEYS
    }

    pub fn section(&self) -> &'static str {
        match self {
            ConfigKey::ApiBaseUrl | ConfigKey::ApiTimeoutSecs => "api",
            ConfigKey::TrackingCheckIntervalMs
            | ConfigKey::TrackingPrefilterRadiusM
            | ConfigKey::TrackingReentryPolicy
            | ConfigKey::TrackingStartTimeoutSecs => "tracking",
            ConfigKey::CacheDirectory => "cache",
            ConfigKey::LoggingDirectory | ConfigKey::LoggingLevel => "logging",
        }
    }

    pub fn key_name(&self) -> &'static str {
        match self {
            ConfigKey::ApiBaseUrl => "base_url",
            ConfigKey::ApiTimeoutSecs => "timeout_secs",
            ConfigKey::TrackingCheckIntervalMs => "check_interval_ms",
            ConfigKey::TrackingPrefilterRadiusM => "prefilter_radius_m",
            ConfigKey::TrackingReentryPolicy => "reentry_policy",
            ConfigKey::TrackingStartTimeoutSecs => "start_timeout_secs",
            ConfigKey::CacheDirectory | ConfigKey::LoggingDirectory => "directory",
            ConfigKey::LoggingLevel => "level",
        }
    }

    /// Full `section.key` name.
    pub fn name(&self) -> String {
        format!("{}.{}", self.section(), self.key_name())
    }

    /// Current value rendered as text.
    pub fn get(&self, config: &ConfigFile) -> String {
        match self {
            ConfigKey::ApiBaseUrl => config.api.base_url.clone(),
            ConfigKey::ApiTimeoutSecs => config.api.timeout_secs.to_string(),
            ConfigKey::TrackingCheckIntervalMs => config.tracking.check_interval_ms.to_string(),
            ConfigKey::TrackingPrefilterRadiusM => config.tracking.prefilter_radius_m.to_string(),
            ConfigKey::TrackingReentryPolicy => config.tracking.reentry_policy.to_string(),
            ConfigKey::TrackingStartTimeoutSecs => config.tracking.start_timeout_secs.to_string(),
            ConfigKey::CacheDirectory => config.cache.directory.display().to_string(),
            ConfigKey::LoggingDirectory => config.logging.directory.display().to_string(),
            ConfigKey::LoggingLevel => config.logging.level.clone(),
        }
    }

    /// Validate and store a new value.
    pub fn set(&self, config: &mut ConfigFile, value: &str) -> Result<(), ConfigError> {
        let name = self.name();
        match self {
            ConfigKey::ApiBaseUrl => {
                let value = value.trim();
                if !(value.starts_with("http://") || value.starts_with("https://")) {
                    return Err(invalid(&name, value, "must start with http:// or https://"));
                }
                config.api.base_url = value.to_string();
            }
            ConfigKey::ApiTimeoutSecs => {
                config.api.timeout_secs = positive(&name, value)?;
            }
            ConfigKey::TrackingCheckIntervalMs => {
                config.tracking.check_interval_ms = positive(&name, value)?;
            }
            ConfigKey::TrackingPrefilterRadiusM => {
                let radius: f64 = parse_value(&name, value)?;
                if !radius.is_finite() || radius <= 0.0 {
                    return Err(invalid(&name, value, "must be a positive number of meters"));
                }
                config.tracking.prefilter_radius_m = radius;
            }
            ConfigKey::TrackingReentryPolicy => {
                config.tracking.reentry_policy = parse_value::<ReentryPolicy>(&name, value)?;
            }
            ConfigKey::TrackingStartTimeoutSecs => {
                config.tracking.start_timeout_secs = positive(&name, value)?;
            }
            ConfigKey::CacheDirectory => {
                config.cache.directory = expand_tilde(value.trim());
            }
            ConfigKey::LoggingDirectory => {
                config.logging.directory = expand_tilde(value.trim());
            }
            ConfigKey::LoggingLevel => {
                let level = value.trim().to_ascii_lowercase();
                if !LOG_LEVELS.contains(&level.as_str()) {
                    return Err(invalid(
                        &name,
                        value,
                        "expected one of trace, debug, info, warn, error",
                    ));
                }
                config.logging.level = level;
            }
        }
        Ok(())
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn positive(key: &str, value: &str) -> Result<u64, ConfigError> {
    match parse_value::<u64>(key, value)? {
        0 => Err(invalid(key, value, "must be greater than zero")),
        n => Ok(n),
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ALL_KEYS
            .iter()
            .copied()
            .find(|key| key.name() == wanted)
            .ok_or_else(|| ConfigError::UnknownKey(s.to_string()))
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.section(), self.key_name())
    }
}
