//! Works command - list published works near a point.

use soundwalk::geo::format_distance;

use super::common::{location_arg, truncate};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the works command.
pub struct WorksArgs {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: f64,
    pub api_url: Option<String>,
}

/// Run the works command.
pub fn run(args: WorksArgs) -> Result<(), CliError> {
    let here = location_arg(args.latitude, args.longitude)?;
    if args.radius_km.is_nan() || args.radius_km <= 0.0 {
        return Err(CliError::Config("--radius must be positive".to_string()));
    }

    let runner = CliRunner::new(args.api_url.as_deref())?;
    runner.log_startup("works");
    let provider = runner.provider()?;

    let works = runner.block_on(provider.list_works(&here, args.radius_km))?;

    if works.is_empty() {
        println!("No works within {} km", args.radius_km);
        return Ok(());
    }

    println!("{} work(s) within {} km", works.len(), args.radius_km);
    println!();
    println!(
        "  {:<32} {:<20} {:>6} {:>9}  ID",
        "TITLE", "AUTHOR", "POINTS", "DISTANCE"
    );
    for work in &works {
        let distance = work
            .distance_m
            .map(format_distance)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<32} {:<20} {:>6} {:>9}  {}",
            truncate(&work.title, 32),
            truncate(&work.author, 20),
            work.playable_markers,
            distance,
            work.user_id
        );
    }
    println!();
    println!("Use 'soundwalk sync <ID>' to download a work.");

    Ok(())
}
