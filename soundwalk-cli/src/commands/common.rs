//! Common types and utilities shared across CLI commands.

use clap::ValueEnum;
use soundwalk::geo::Location;
use soundwalk::playback::ReentryPolicy;

use crate::error::CliError;

/// Re-entry policy selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum PolicyArg {
    /// Play again every time a geofence is re-entered
    Repeat,
    /// Play each record at most once per walk
    Once,
}

impl From<PolicyArg> for ReentryPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Repeat => ReentryPolicy::Repeat,
            PolicyArg::Once => ReentryPolicy::Once,
        }
    }
}

/// Validate a coordinate pair from the command line.
pub fn location_arg(latitude: f64, longitude: f64) -> Result<Location, CliError> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(CliError::Config(format!(
            "latitude {} is out of range (-90..=90)",
            latitude
        )));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(CliError::Config(format!(
            "longitude {} is out of range (-180..=180)",
            longitude
        )));
    }
    Ok(Location::new(latitude, longitude))
}

/// Shorten text to `max` characters for table output.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_arg_converts() {
        assert_eq!(ReentryPolicy::from(PolicyArg::Once), ReentryPolicy::Once);
        assert_eq!(ReentryPolicy::from(PolicyArg::Repeat), ReentryPolicy::Repeat);
    }

    #[test]
    fn test_location_arg_bounds() {
        assert!(location_arg(35.68, 139.76).is_ok());
        assert!(location_arg(91.0, 0.0).is_err());
        assert!(location_arg(0.0, -181.0).is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("Harbour", 10), "Harbour");
        assert_eq!(truncate("Harbour Walk at Dusk", 8), "Harbour…");
        assert_eq!(truncate("港の夕暮れ散歩", 4), "港の夕…");
    }
}
