//! Soundwalk - location-triggered audio playback
//!
//! A work is a set of map markers, each carrying audio records with a
//! circular (or annular) geofence. While tracking, the listener's position is
//! checked against every geofence; entering one starts its record, leaving
//! it stops playback.
//!
//! # Layout
//!
//! - [`provider`] - HTTP access to the work API
//! - [`catalog`] / [`store`] - cache-first dataset loading
//! - [`geo`] - distance and geofence math
//! - [`playback`] - range state machine, player pool and audio backends
//! - [`session`] - the tracking loop tying location to playback
//! - [`location`] - location sources, including route replay
//! - [`config`] / [`logging`] - ambient setup

pub mod catalog;
pub mod config;
pub mod error;
pub mod events;
pub mod geo;
pub mod location;
pub mod logging;
pub mod model;
pub mod playback;
pub mod provider;
pub mod session;
pub mod store;

/// Crate version, as reported by `--version` and in the HTTP user agent.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
