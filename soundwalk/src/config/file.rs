//! INI configuration file.
//!
//! Lives at `~/.soundwalk/config.ini`. Missing files and missing keys fall
//! back to defaults, so a fresh install runs without any setup.
//!
//! ```ini
//! [api]
//! base_url = https://example.com/
//! timeout_secs = 30
//!
//! [tracking]
//! check_interval_ms = 1000
//! prefilter_radius_m = 100
//! reentry_policy = repeat
//! start_timeout_secs = 12
//!
//! [cache]
//! directory = ~/.soundwalk/cache
//!
//! [logging]
//! directory = ~/.soundwalk/logs
//! level = info
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};
use thiserror::Error;

use crate::playback::{
    MachineConfig, PoolConfig, ReentryPolicy, DEFAULT_MONITOR_INTERVAL,
    DEFAULT_PREFILTER_RADIUS_M, DEFAULT_START_TIMEOUT,
};
use crate::provider::{DEFAULT_API_BASE_URL, DEFAULT_HTTP_TIMEOUT};
use crate::session::{SessionConfig, DEFAULT_CHECK_INTERVAL};

/// Errors from reading, writing or editing the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("unknown configuration key '{0}'")]
    UnknownKey(String),
}

/// Directory holding the config file, cache and logs.
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".soundwalk")
}

/// Path of the configuration file.
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(value: &str) -> PathBuf {
    match value.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => {
            let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
            home.join(rest.trim_start_matches('/'))
        }
        _ => PathBuf::from(value),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiSettings {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            timeout_secs: DEFAULT_HTTP_TIMEOUT.as_secs(),
        }
    }
}

impl ApiSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackingSettings {
    pub check_interval_ms: u64,
    pub prefilter_radius_m: f64,
    pub reentry_policy: ReentryPolicy,
    pub start_timeout_secs: u64,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            check_interval_ms: DEFAULT_CHECK_INTERVAL.as_millis() as u64,
            prefilter_radius_m: DEFAULT_PREFILTER_RADIUS_M,
            reentry_policy: ReentryPolicy::default(),
            start_timeout_secs: DEFAULT_START_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    pub directory: PathBuf,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            directory: config_directory().join("cache"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    pub directory: PathBuf,
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: config_directory().join("logs"),
            level: "info".to_string(),
        }
    }
}

/// Parsed contents of `config.ini`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigFile {
    pub api: ApiSettings,
    pub tracking: TrackingSettings,
    pub cache: CacheSettings,
    pub logging: LoggingSettings,
}

impl ConfigFile {
    /// Load from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    /// Load from a specific file. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    /// Save to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&config_file_path())
    }

    /// Save to a specific file, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        self.to_ini().write_to_file(path).map_err(write_err)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(api) = ini.section(Some("api")) {
            if let Some(v) = api.get("base_url") {
                config.api.base_url = v.trim().to_string();
            }
            read_parsed(api, "api", "timeout_secs", &mut config.api.timeout_secs)?;
        }

        if let Some(tracking) = ini.section(Some("tracking")) {
            let t = &mut config.tracking;
            read_parsed(tracking, "tracking", "check_interval_ms", &mut t.check_interval_ms)?;
            read_parsed(tracking, "tracking", "prefilter_radius_m", &mut t.prefilter_radius_m)?;
            read_parsed(tracking, "tracking", "reentry_policy", &mut t.reentry_policy)?;
            read_parsed(tracking, "tracking", "start_timeout_secs", &mut t.start_timeout_secs)?;
        }

        if let Some(cache) = ini.section(Some("cache")) {
            if let Some(v) = cache.get("directory") {
                config.cache.directory = expand_tilde(v.trim());
            }
        }

        if let Some(logging) = ini.section(Some("logging")) {
            if let Some(v) = logging.get("directory") {
                config.logging.directory = expand_tilde(v.trim());
            }
            if let Some(v) = logging.get("level") {
                config.logging.level = v.trim().to_string();
            }
        }

        Ok(config)
    }

    fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();
        ini.with_section(Some("api"))
            .set("base_url", self.api.base_url.as_str())
            .set("timeout_secs", self.api.timeout_secs.to_string());
        ini.with_section(Some("tracking"))
            .set("check_interval_ms", self.tracking.check_interval_ms.to_string())
            .set("prefilter_radius_m", self.tracking.prefilter_radius_m.to_string())
            .set("reentry_policy", self.tracking.reentry_policy.as_str())
            .set("start_timeout_secs", self.tracking.start_timeout_secs.to_string());
        ini.with_section(Some("cache"))
            .set("directory", self.cache.directory.display().to_string());
        ini.with_section(Some("logging"))
            .set("directory", self.logging.directory.display().to_string())
            .set("level", self.logging.level.as_str());
        ini
    }

    /// Tracking session settings derived from the `[tracking]` section.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            check_interval: Duration::from_millis(self.tracking.check_interval_ms),
            machine: MachineConfig {
                prefilter_radius_m: self.tracking.prefilter_radius_m,
                policy: self.tracking.reentry_policy,
            },
            pool: PoolConfig {
                start_timeout: Duration::from_secs(self.tracking.start_timeout_secs),
                monitor_interval: DEFAULT_MONITOR_INTERVAL,
            },
        }
    }
}

/// Overwrite `target` with the parsed value of `key`, if present.
fn read_parsed<T>(
    section: &Properties,
    section_name: &str,
    key: &str,
    target: &mut T,
) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = section.get(key) {
        *target = parse_value(&format!("{}.{}", section_name, key), raw)?;
    }
    Ok(())
}

pub(crate) fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ConfigFile::load_from(&dir.path().join("config.ini")).unwrap();
        assert_eq!(config, ConfigFile::default());
        assert_eq!(config.api.base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.tracking.check_interval_ms, 1000);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(
            &path,
            "[tracking]\nreentry_policy = once\nprefilter_radius_m = 250\n",
        )
        .unwrap();

        let config = ConfigFile::load_from(&path).unwrap();

        assert_eq!(config.tracking.reentry_policy, ReentryPolicy::Once);
        assert_eq!(config.tracking.prefilter_radius_m, 250.0);
        assert_eq!(config.tracking.start_timeout_secs, 12);
        assert_eq!(config.api, ApiSettings::default());
    }

    #[test]
    fn test_invalid_number_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(&path, "[api]\ntimeout_secs = soon\n").unwrap();

        let err = ConfigFile::load_from(&path).unwrap_err();

        match err {
            ConfigError::InvalidValue { key, value, .. } => {
                assert_eq!(key, "api.timeout_secs");
                assert_eq!(value, "soon");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.ini");

        let mut config = ConfigFile::default();
        config.api.base_url = "http://localhost:8080/".into();
        config.tracking.reentry_policy = ReentryPolicy::Once;
        config.cache.directory = dir.path().join("cache");
        config.logging.level = "debug".into();
        config.save_to(&path).unwrap();

        assert_eq!(ConfigFile::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_session_config_from_tracking_section() {
        let mut config = ConfigFile::default();
        config.tracking.check_interval_ms = 500;
        config.tracking.start_timeout_secs = 5;
        config.tracking.reentry_policy = ReentryPolicy::Once;

        let session = config.session_config();

        assert_eq!(session.check_interval, Duration::from_millis(500));
        assert_eq!(session.pool.start_timeout, Duration::from_secs(5));
        assert_eq!(session.machine.policy, ReentryPolicy::Once);
    }

    #[test]
    fn test_expand_tilde() {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        assert_eq!(expand_tilde("~/walks"), home.join("walks"));
        assert_eq!(expand_tilde("/var/cache"), PathBuf::from("/var/cache"));
        assert_eq!(expand_tilde("~other/x"), PathBuf::from("~other/x"));
    }
}
