//! Core types and constants shared across anytls crates.
//!
//! This crate provides:
//! - Default configuration values
//! - I/O adapters used by the admission pipeline

pub mod defaults;
pub mod io;

/// Project name.
pub const PROJECT_NAME: &str = "anytls-rs";
/// Project version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
