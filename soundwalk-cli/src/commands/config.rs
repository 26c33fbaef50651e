//! Config command - view and edit `config.ini` from the command line.

use clap::Subcommand;
use soundwalk::config::{config_file_path, ConfigFile, ConfigKey};

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Print one value
    Get {
        /// Key as section.key (e.g., tracking.reentry_policy)
        key: String,
    },

    /// Change one value
    Set {
        /// Key as section.key (e.g., tracking.reentry_policy)
        key: String,

        /// New value
        value: String,
    },

    /// Restore one value to its default
    Reset {
        /// Key as section.key
        key: String,
    },

    /// Print every setting, grouped by section
    List,

    /// Print the configuration file path
    Path,
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Get { key } => {
            let key = parse_key(&key)?;
            println!("{}", key.get(&ConfigFile::load()?));
        }
        ConfigCommands::Set { key, value } => {
            let key = parse_key(&key)?;
            // An unreadable file is reported rather than overwritten.
            let mut config = ConfigFile::load()?;
            key.set(&mut config, &value)?;
            config.save()?;
            println!("{} = {}", key, key.get(&config));
        }
        ConfigCommands::Reset { key } => {
            let key = parse_key(&key)?;
            let mut config = ConfigFile::load()?;
            let default = key.get(&ConfigFile::default());
            key.set(&mut config, &default)?;
            config.save()?;
            println!("{} = {} (default)", key, default);
        }
        ConfigCommands::List => list(&ConfigFile::load()?),
        ConfigCommands::Path => println!("{}", config_file_path().display()),
    }
    Ok(())
}

fn parse_key(key: &str) -> Result<ConfigKey, CliError> {
    key.parse().map_err(|_| {
        CliError::Config(format!(
            "Unknown configuration key '{}'. Run 'soundwalk config list' for the full list.",
            key
        ))
    })
}

fn list(config: &ConfigFile) {
    println!("# {}", config_file_path().display());

    let mut section = "";
    for key in ConfigKey::all() {
        if key.section() != section {
            section = key.section();
            println!();
            println!("[{}]", section);
        }
        println!("{} = {}", key.key_name(), key.get(config));
    }
}
