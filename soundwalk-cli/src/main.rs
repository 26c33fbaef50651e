//! Soundwalk CLI - Command-line interface
//!
//! Browse published works, cache their marker data and walk them, either by
//! replaying a recorded route or in a dry run without audio.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::common::PolicyArg;
use commands::config::ConfigCommands;
use error::CliError;

#[derive(Parser)]
#[command(name = "soundwalk")]
#[command(version = soundwalk::VERSION)]
#[command(about = "Location-triggered audio playback", long_about = None)]
struct Cli {
    /// Override the API base URL from config.ini
    #[arg(long, global = true, value_name = "URL")]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List published works near a point
    Works {
        /// Latitude in degrees
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude in degrees
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Search radius in kilometers
        #[arg(long, default_value = "5")]
        radius: f64,
    },

    /// Download a work's markers and records into the local cache
    Sync {
        /// Publisher user id of the work
        user_id: String,
    },

    /// Show a work's markers around a point
    Nearby {
        /// Publisher user id of the work
        user_id: String,

        /// Latitude in degrees
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude in degrees
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Search range in meters
        #[arg(long, default_value = "500")]
        range: f64,
    },

    /// Walk a work by replaying a recorded route
    Walk {
        /// Publisher user id of the work
        user_id: String,

        /// Route file: one "lat, lon[, accuracy_m[, pause_ms]]" fix per line
        #[arg(long, value_name = "FILE")]
        route: PathBuf,

        /// Re-entry policy (defaults to tracking.reentry_policy)
        #[arg(long, value_enum)]
        policy: Option<PolicyArg>,

        /// Pause between fixes in milliseconds
        #[arg(long, default_value = "2000")]
        interval: u64,

        /// Simulate playback without downloading or playing audio
        #[arg(long)]
        dry_run: bool,
    },

    /// View or edit configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = run(cli);

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let api_url = cli.api_url;
    match cli.command {
        Commands::Works { lat, lon, radius } => commands::works::run(commands::works::WorksArgs {
            latitude: lat,
            longitude: lon,
            radius_km: radius,
            api_url,
        }),
        Commands::Sync { user_id } => {
            commands::sync::run(commands::sync::SyncArgs { user_id, api_url })
        }
        Commands::Nearby {
            user_id,
            lat,
            lon,
            range,
        } => commands::nearby::run(commands::nearby::NearbyArgs {
            user_id,
            latitude: lat,
            longitude: lon,
            range_m: range,
            api_url,
        }),
        Commands::Walk {
            user_id,
            route,
            policy,
            interval,
            dry_run,
        } => commands::walk::run(commands::walk::WalkArgs {
            user_id,
            route,
            policy,
            interval_ms: interval,
            dry_run,
            api_url,
        }),
        Commands::Config { command } => commands::config::run(command),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_walk_arguments() {
        let cli = Cli::parse_from([
            "soundwalk",
            "walk",
            "user-1",
            "--route",
            "harbour.route",
            "--policy",
            "once",
            "--dry-run",
        ]);
        match cli.command {
            Commands::Walk {
                user_id,
                route,
                policy,
                interval,
                dry_run,
            } => {
                assert_eq!(user_id, "user-1");
                assert_eq!(route, PathBuf::from("harbour.route"));
                assert_eq!(policy, Some(PolicyArg::Once));
                assert_eq!(interval, 2000);
                assert!(dry_run);
            }
            _ => panic!("expected walk"),
        }
    }

    #[test]
    fn test_negative_coordinates() {
        let cli = Cli::parse_from(["soundwalk", "works", "--lat", "-33.86", "--lon", "151.2"]);
        assert!(matches!(cli.command, Commands::Works { lat, .. } if lat == -33.86));
    }
}
