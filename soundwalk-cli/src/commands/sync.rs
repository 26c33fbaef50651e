//! Sync command - fetch a work and replace its cached dataset.

use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the sync command.
pub struct SyncArgs {
    pub user_id: String,
    pub api_url: Option<String>,
}

/// Run the sync command.
pub fn run(args: SyncArgs) -> Result<(), CliError> {
    let runner = CliRunner::new(args.api_url.as_deref())?;
    runner.log_startup("sync");
    let catalog = runner.catalog()?;
    let store = runner.store();

    println!("Fetching work {}...", args.user_id);
    let dataset = runner.block_on(catalog.refresh(&args.user_id))?;

    println!();
    if let Some(title) = &dataset.info.title {
        println!("Work:    {}", title);
    }
    if let Some(description) = &dataset.info.description {
        println!("About:   {}", description);
    }
    println!("Markers: {}", dataset.markers.len());
    println!("Records: {}", dataset.record_count());
    println!("Cached:  {}", store.path_for(&args.user_id).display());

    Ok(())
}
