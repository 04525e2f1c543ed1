//! Serde default helpers.

pub(crate) fn default_listen() -> String {
    "0.0.0.0:8443".to_string()
}

pub(crate) fn default_node_type() -> String {
    "anytls".to_string()
}

pub(crate) fn default_traffic_file() -> String {
    "/tmp/anytls-traffic.json".to_string()
}
