//! Server state shared across connections.

use std::sync::Arc;

use parking_lot::Mutex;

use anytls_auth::UserManager;
use anytls_panel::{AliveTracker, Client, NodeConfig, TrafficCounter};

use crate::ban::FailureLimiter;
use crate::fallback::Fallback;
use crate::speed::SpeedLimiter;

/// Everything the admission pipeline and sync loop share.
pub struct ServerState {
    pub users: UserManager,
    pub traffic: TrafficCounter,
    pub speed: SpeedLimiter,
    pub bans: FailureLimiter,
    pub alive: AliveTracker,
    pub fallback: Fallback,
    /// Absent in standalone mode.
    pub panel: Option<Arc<Client>>,
    /// Last node config fetched from the panel. Refreshed by the pull tick,
    /// but tick periods and the listen port only change across restarts.
    pub node_config: Mutex<NodeConfig>,
}
