//! Configuration for the anytls server.
//!
//! Supports YAML (the documented format), JSON and TOML config files, plus
//! command-line overrides for the handful of flags the binary accepts.

mod cli;
mod defaults;
mod loader;
mod types;
mod validate;

pub use cli::{CliOverrides, apply_overrides};
pub use loader::{ConfigError, load_config};
pub use types::{Config, LogConfig, TlsConfig};
pub use validate::validate_config;
