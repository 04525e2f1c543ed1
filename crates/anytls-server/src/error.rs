//! Server error types.

use anytls_config::ConfigError;
use anytls_panel::PanelError;

/// Server error type.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("tls: {0}")]
    Tls(#[from] tokio_rustls::rustls::Error),
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("panel: {0}")]
    Panel(#[from] PanelError),
    #[error("invalid listen address: {0}")]
    ListenAddr(String),
    #[error("certificate: {0}")]
    Certificate(String),
}
