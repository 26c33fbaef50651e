//! Per-record playback and range state types.

use std::fmt;
use std::str::FromStr;

use tokio::time::Instant;

/// Playback state of one record's handle, as seen by observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// No handle exists.
    #[default]
    Idle,
    /// The payload is being fetched and decoded.
    Loading,
    Playing,
    /// The last start attempt failed.
    Error,
}

impl PlaybackState {
    /// Short lowercase label.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Loading => "loading",
            PlaybackState::Playing => "playing",
            PlaybackState::Error => "error",
        }
    }

    /// Whether a handle is loading or playing.
    pub fn is_active(&self) -> bool {
        matches!(self, PlaybackState::Loading | PlaybackState::Playing)
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens when the listener leaves a geofence and comes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReentryPolicy {
    /// Every entry is a fresh trigger; the record plays again.
    #[default]
    Repeat,
    /// A record plays at most once per tracking session.
    Once,
}

impl ReentryPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReentryPolicy::Repeat => "repeat",
            ReentryPolicy::Once => "once",
        }
    }
}

impl fmt::Display for ReentryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReentryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "repeat" => Ok(ReentryPolicy::Repeat),
            "once" => Ok(ReentryPolicy::Once),
            other => Err(format!(
                "unknown reentry policy '{}' (expected 'repeat' or 'once')",
                other
            )),
        }
    }
}

/// Geofence bookkeeping for one record.
///
/// Invariant: `has_played_in_range` implies `in_range`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeState {
    pub in_range: bool,
    pub has_played_in_range: bool,
    pub last_check: Instant,
}

impl RangeState {
    pub(crate) fn new(now: Instant) -> Self {
        Self {
            in_range: false,
            has_played_in_range: false,
            last_check: now,
        }
    }

    /// Phase derived from the two flags.
    pub fn phase(&self) -> RecordPhase {
        match (self.in_range, self.has_played_in_range) {
            (false, _) => RecordPhase::OutOfRange,
            (true, false) => RecordPhase::InRangeUnplayed,
            (true, true) => RecordPhase::InRangePlayed,
        }
    }
}

/// Stable phases of a record's lifecycle.
///
/// ```text
/// OutOfRange --enter--> InRangeUnplayed --started--> InRangePlayed
///      ^                        |                         |
///      +---------exit-----------+-----------exit----------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordPhase {
    OutOfRange,
    InRangeUnplayed,
    InRangePlayed,
}

/// Edge reported when geofence membership flips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeTransition {
    Entered,
    Exited,
}

impl RangeTransition {
    pub fn in_range(&self) -> bool {
        matches!(self, RangeTransition::Entered)
    }
}
