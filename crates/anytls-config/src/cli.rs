//! Command-line overrides applied on top of the config file.

use clap::Parser;

use crate::types::Config;

/// Flags that override config-file values.
#[derive(Parser, Debug, Clone, Default)]
pub struct CliOverrides {
    /// Listen address override (host:port)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Run without a control plane (single shared password)
    #[arg(long)]
    pub standalone: bool,

    /// Shared password for standalone mode
    #[arg(short = 'p', long)]
    pub password: Option<String>,
}

/// Apply CLI overrides to a loaded config.
pub fn apply_overrides(config: &mut Config, overrides: &CliOverrides) {
    if let Some(listen) = &overrides.listen {
        config.listen = listen.clone();
    }
    if overrides.standalone {
        config.standalone = true;
    }
    if let Some(password) = &overrides.password {
        config.password = password.clone();
    }
}
