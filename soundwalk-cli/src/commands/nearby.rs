//! Nearby command - show a work's markers around a point.
//!
//! Reads the cached dataset, fetching it first if the work was never synced.

use soundwalk::geo::{find_nearby, format_distance, within_annulus};

use super::common::location_arg;
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the nearby command.
pub struct NearbyArgs {
    pub user_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub range_m: f64,
    pub api_url: Option<String>,
}

/// Run the nearby command.
pub fn run(args: NearbyArgs) -> Result<(), CliError> {
    let here = location_arg(args.latitude, args.longitude)?;
    if args.range_m.is_nan() || args.range_m <= 0.0 {
        return Err(CliError::Config("--range must be positive".to_string()));
    }

    let runner = CliRunner::new(args.api_url.as_deref())?;
    runner.log_startup("nearby");
    let catalog = runner.catalog()?;

    let dataset = runner.block_on(async {
        match catalog.cached(&args.user_id).await? {
            Some(dataset) if !dataset.markers.is_empty() => Ok(dataset),
            _ => catalog.refresh(&args.user_id).await,
        }
    })?;

    let nearby = find_nearby(&here, &dataset.markers, args.range_m);
    if nearby.is_empty() {
        println!(
            "No markers within {} of {:.5}, {:.5}",
            format_distance(args.range_m),
            here.latitude,
            here.longitude
        );
        return Ok(());
    }

    println!(
        "{} marker(s) within {}",
        nearby.len(),
        format_distance(args.range_m)
    );
    println!();
    for hit in &nearby {
        println!(
            "  {:<12} {:>8}",
            hit.marker.label(hit.index),
            format_distance(hit.distance)
        );
        for record in &hit.marker.records {
            let status = if within_annulus(record, hit.distance) {
                "in range"
            } else {
                "out of range"
            };
            println!(
                "      {:<24} {:>6} - {:<6} {}",
                record.record_id,
                format_distance(record.inner_radius),
                format_distance(record.outer_radius),
                status
            );
        }
    }

    Ok(())
}
