//! Online-device tracking.
//!
//! Tracks which source addresses each user currently connects from and
//! produces the `<ip>_<node_id>` strings the panel expects, so reports from
//! different nodes sharing a user stay distinguishable.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::RwLock;

#[derive(Debug)]
pub struct AliveTracker {
    node_id: i64,
    online: RwLock<HashMap<i64, HashMap<String, Instant>>>,
}

impl AliveTracker {
    pub fn new(node_id: i64) -> Self {
        Self {
            node_id,
            online: RwLock::new(HashMap::new()),
        }
    }

    /// Record (or refresh) a user's presence from `ip`.
    pub fn track(&self, user_id: i64, ip: &str) {
        let mut online = self.online.write();
        online
            .entry(user_id)
            .or_default()
            .insert(ip.to_string(), Instant::now());
    }

    /// Drop one address; the user entry goes away with its last address.
    pub fn remove(&self, user_id: i64, ip: &str) {
        let mut online = self.online.write();
        if let Some(ips) = online.get_mut(&user_id) {
            ips.remove(ip);
            if ips.is_empty() {
                online.remove(&user_id);
            }
        }
    }

    /// Current presence, addresses suffixed with this node's id.
    pub fn snapshot(&self) -> HashMap<i64, Vec<String>> {
        let online = self.online.read();
        online
            .iter()
            .map(|(&user_id, ips)| {
                let list = ips
                    .keys()
                    .map(|ip| format!("{ip}_{}", self.node_id))
                    .collect();
                (user_id, list)
            })
            .collect()
    }

    /// Check a user against the fleet-wide device counts the panel reported.
    /// A cap of zero never limits. Never mutates tracker state.
    pub fn check_limit(
        &self,
        user_id: i64,
        device_limit: i64,
        global_counts: &HashMap<i64, i64>,
    ) -> bool {
        if device_limit == 0 {
            return true;
        }
        global_counts.get(&user_id).copied().unwrap_or(0) < device_limit
    }
}
