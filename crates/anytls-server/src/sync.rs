//! Periodic synchronisation with the control plane.
//!
//! Two independent tickers: the pull tick refreshes users, node config and
//! padding; the push tick reports traffic, liveness and node status, then
//! persists unreported traffic. Periods are frozen from the node config at
//! loop start, so a later `fetch_config` cannot de-synchronise running
//! tickers; changing them takes a restart. Errors inside a tick are logged
//! and never abort the loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use anytls_core::defaults::DEFAULT_SYNC_INTERVAL;
use anytls_panel::{Client, NodeConfig, StatusSampler};

use crate::state::ServerState;

pub async fn run_sync_loop(
    state: Arc<ServerState>,
    panel: Arc<Client>,
    node_config: NodeConfig,
    traffic_file: String,
    shutdown: CancellationToken,
) {
    let pull_interval = interval_or_default(node_config.base_config.pull_interval);
    let push_interval = interval_or_default(node_config.base_config.push_interval);

    let mut pull_ticker = ticker(pull_interval);
    let mut push_ticker = ticker(push_interval);
    let mut sampler = StatusSampler::new();

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                debug!("sync loop shutting down");
                return;
            }

            _ = pull_ticker.tick() => do_pull(&state, &panel).await,

            _ = push_ticker.tick() => do_push(&state, &panel, &mut sampler, &traffic_file).await,
        }
    }
}

fn interval_or_default(secs: i64) -> Duration {
    if secs > 0 {
        Duration::from_secs(secs as u64)
    } else {
        DEFAULT_SYNC_INTERVAL
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    // first tick fires after one period, not immediately
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// One pull cycle: users, node config (padding as a client side effect),
/// expired-ban sweep.
async fn do_pull(state: &ServerState, panel: &Client) {
    match panel.fetch_users().await {
        Ok(Some(users)) => {
            state.users.update(&users);
            info!(count = users.len(), "user list synchronised");
        }
        Ok(None) => {}
        Err(err) => error!(error = %err, "user list fetch failed"),
    }

    match panel.fetch_config().await {
        Ok(config) => *state.node_config.lock() = config,
        Err(err) => error!(error = %err, "node config fetch failed"),
    }

    state.bans.sweep();
}

/// One push cycle: traffic (merged back on failure), liveness, node status,
/// carry-over persistence.
async fn do_push(
    state: &ServerState,
    panel: &Client,
    sampler: &mut StatusSampler,
    traffic_file: &str,
) {
    let snapshot = state.traffic.snapshot();
    if !snapshot.is_empty() {
        if let Err(err) = panel.push_traffic(&snapshot).await {
            error!(error = %err, "traffic push failed, keeping data for next cycle");
            state.traffic.merge(&snapshot);
        }
    }

    let alive = state.alive.snapshot();
    if !alive.is_empty() {
        // no rollback here: stale liveness is tolerable
        if let Err(err) = panel.push_alive(&alive).await {
            error!(error = %err, "alive push failed");
        }
    }

    let status = sampler.sample();
    if let Err(err) = panel.push_status(&status).await {
        error!(error = %err, "status push failed");
    }

    if let Err(err) = state.traffic.save(traffic_file) {
        error!(error = %err, "traffic persistence failed");
    }
}
