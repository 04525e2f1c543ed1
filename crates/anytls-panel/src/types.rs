//! Wire types for the control-plane API.

use serde::{Deserialize, Serialize};

/// Node configuration fetched from the panel.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeConfig {
    /// Overrides the configured listen port when positive.
    #[serde(default)]
    pub server_port: u16,
    #[serde(default)]
    pub server_name: String,
    /// Padding directives; joined with newlines before installation.
    #[serde(default)]
    pub padding_scheme: Vec<String>,
    #[serde(default)]
    pub base_config: BaseConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BaseConfig {
    /// Push period in seconds.
    #[serde(default)]
    pub push_interval: i64,
    /// Pull period in seconds.
    #[serde(default)]
    pub pull_interval: i64,
}

/// One user as the panel reports it. `speed_limit` and `device_limit` may be
/// absent or null; both mean "no cap".
#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub uuid: String,
    #[serde(default)]
    pub speed_limit: Option<i64>,
    #[serde(default)]
    pub device_limit: Option<i64>,
}

impl User {
    /// Speed cap in Mbps, 0 meaning unlimited.
    pub fn speed_limit(&self) -> i64 {
        self.speed_limit.unwrap_or(0)
    }

    /// Device cap, 0 meaning unlimited.
    pub fn device_limit(&self) -> i64 {
        self.device_limit.unwrap_or(0)
    }
}

/// Node load report pushed to the panel.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NodeStatus {
    pub cpu: f64,
    pub mem: ResourceUsage,
    pub swap: ResourceUsage,
    pub disk: ResourceUsage,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ResourceUsage {
    pub total: u64,
    pub used: u64,
}

/// Join the panel's `padding_scheme` array into the newline format the
/// session library installs: `["stop=8", "0=30-30"]` → `"stop=8\n0=30-30"`.
pub fn padding_scheme_to_bytes(scheme: &[String]) -> Vec<u8> {
    scheme.join("\n").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_null_limits_mean_uncapped() {
        let user: User =
            serde_json::from_str(r#"{"id":1,"uuid":"u","speed_limit":null}"#).unwrap();
        assert_eq!(user.speed_limit(), 0);
        assert_eq!(user.device_limit(), 0);

        let user: User =
            serde_json::from_str(r#"{"id":2,"uuid":"v","speed_limit":50,"device_limit":3}"#)
                .unwrap();
        assert_eq!(user.speed_limit(), 50);
        assert_eq!(user.device_limit(), 3);
    }

    #[test]
    fn node_config_tolerates_missing_fields() {
        let cfg: NodeConfig = serde_json::from_str(r#"{"server_port":8443}"#).unwrap();
        assert_eq!(cfg.server_port, 8443);
        assert_eq!(cfg.base_config.pull_interval, 0);
        assert!(cfg.padding_scheme.is_empty());
    }

    #[test]
    fn padding_scheme_joins_lines() {
        let scheme = vec!["stop=8".to_string(), "0=30-30".to_string()];
        assert_eq!(padding_scheme_to_bytes(&scheme), b"stop=8\n0=30-30");
    }
}
