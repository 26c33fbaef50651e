//! User configuration.
//!
//! Settings are read from `~/.soundwalk/config.ini` (see [`ConfigFile`]) and
//! edited key by key through [`ConfigKey`].

mod file;
mod keys;

pub use file::{
    config_directory, config_file_path, expand_tilde, ApiSettings, CacheSettings, ConfigError,
    ConfigFile, LoggingSettings, TrackingSettings,
};
pub use keys::ConfigKey;
