//! Configuration type definitions.

use serde::{Deserialize, Serialize};

use crate::defaults::*;

/// Server configuration.
///
/// In panel mode the server pulls its user table from the control plane at
/// `api_host`; in standalone mode a single user is synthesised from
/// `password` and the panel fields are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Listen address, e.g. "0.0.0.0:8443". The panel-supplied server port,
    /// when positive, replaces the port but keeps the host.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Control-plane base URL.
    #[serde(default)]
    pub api_host: String,
    /// Control-plane communication token.
    #[serde(default)]
    pub api_token: String,
    /// This node's id within the control plane's fleet.
    #[serde(default)]
    pub node_id: i64,
    /// Node type reported to the control plane.
    #[serde(default = "default_node_type")]
    pub node_type: String,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub log: LogConfig,
    /// Decoy target ("host:port") for failed authentications. Empty means
    /// failed connections are simply closed.
    #[serde(default)]
    pub fallback: String,
    /// Run without a control plane.
    #[serde(default)]
    pub standalone: bool,
    /// Shared password for standalone mode.
    #[serde(default)]
    pub password: String,
    /// Where unreported traffic is persisted across restarts.
    #[serde(default = "default_traffic_file")]
    pub traffic_file: String,
}

impl Config {
    /// Build a standalone-mode config that needs no config file.
    pub fn standalone(password: String, listen: Option<String>) -> Self {
        Self {
            listen: listen.unwrap_or_else(default_listen),
            standalone: true,
            password,
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            api_host: String::new(),
            api_token: String::new(),
            node_id: 0,
            node_type: default_node_type(),
            tls: TlsConfig::default(),
            log: LogConfig::default(),
            fallback: String::new(),
            standalone: false,
            password: String::new(),
            traffic_file: default_traffic_file(),
        }
    }
}

/// TLS certificate configuration. Both paths empty (or unloadable) means a
/// self-signed certificate is generated at startup.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TlsConfig {
    /// Server certificate file path (PEM format).
    #[serde(default)]
    pub cert_file: String,
    /// Server private key file path (PEM format).
    #[serde(default)]
    pub key_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: Option<String>,
    /// Log format: json, pretty, or compact. Default: pretty.
    pub format: Option<String>,
    /// Output target: stdout or stderr. Default: stderr.
    pub output: Option<String>,
}
