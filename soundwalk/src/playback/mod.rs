//! Proximity-triggered playback.
//!
//! - [`machine`] decides, per location fix, which records to start and stop
//! - [`pool`] owns the voices and guarantees one handle per record
//! - [`backend`] is the seam to the audio device

pub mod backend;
pub mod machine;
pub mod pool;
mod state;

#[cfg(feature = "audio-output")]
pub use backend::RodioBackend;
pub use backend::{AudioBackend, OpenRequest, SimulatedBackend, SimulatedVoice, Voice};
pub use machine::{MachineConfig, PlaybackStateMachine, TickPlan, DEFAULT_PREFILTER_RADIUS_M};
pub use pool::{
    AudioPlayerPool, PoolConfig, StartOutcome, DEFAULT_MONITOR_INTERVAL, DEFAULT_START_TIMEOUT,
};
pub use state::{PlaybackState, RangeState, RangeTransition, RecordPhase, ReentryPolicy};
