//! CLI command implementations.

pub mod common;
pub mod config;
pub mod nearby;
pub mod sync;
pub mod walk;
pub mod works;
