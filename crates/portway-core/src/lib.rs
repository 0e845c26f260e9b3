//! Core types and constants shared across portway crates.
//!
//! This crate provides:
//! - Default configuration values
//! - Error-kind labels for logging and events
//! - The generic bidirectional copy engine

pub mod defaults;
pub mod errors;
pub mod io;

/// Project name.
pub const PROJECT_NAME: &str = "portway";
/// Project version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
