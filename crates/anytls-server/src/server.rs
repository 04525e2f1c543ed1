//! Supervisor: startup, accept loop, graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use anytls_auth::UserManager;
use anytls_config::Config;
use anytls_core::defaults::{CONNECTION_BACKLOG, SHUTDOWN_TIMEOUT};
use anytls_panel::{AliveTracker, Client, NodeConfig, TrafficCounter, User};

use crate::ban::FailureLimiter;
use crate::error::ServerError;
use crate::fallback::Fallback;
use crate::handler::handle_connection;
use crate::speed::SpeedLimiter;
use crate::state::ServerState;
use crate::sync::run_sync_loop;
use crate::tls::build_tls_config;
use crate::util::{ConnectionGuard, ConnectionTracker, create_listener};

/// Owns every subsystem and their lifecycles.
pub struct Server {
    config: Config,
    state: Arc<ServerState>,
    acceptor: TlsAcceptor,
    tracker: ConnectionTracker,
}

impl Server {
    pub fn new(config: Config) -> Result<Self, ServerError> {
        let tls = build_tls_config(&config.tls)?;
        let acceptor = TlsAcceptor::from(Arc::new(tls));

        let panel = (!config.standalone).then(|| {
            Arc::new(Client::new(
                &config.api_host,
                &config.api_token,
                config.node_id,
                &config.node_type,
            ))
        });

        let state = Arc::new(ServerState {
            users: UserManager::new(),
            traffic: TrafficCounter::new(),
            speed: SpeedLimiter::new(),
            bans: FailureLimiter::new(),
            alive: AliveTracker::new(config.node_id),
            fallback: Fallback::new(&config.fallback),
            panel,
            node_config: Mutex::new(NodeConfig::default()),
        });

        Ok(Self {
            config,
            state,
            acceptor,
            tracker: ConnectionTracker::new(),
        })
    }

    /// Merge carried-over traffic from a previous run.
    pub fn load_traffic(&self, path: &str) -> std::io::Result<()> {
        self.state.traffic.load(path)
    }

    /// Run until the cancellation token fires, then flush and drain.
    ///
    /// Panel mode starts with `fetch_config` (whose `server_port` replaces
    /// the configured port but keeps the host) and `fetch_users`; both are
    /// fatal here. Standalone mode synthesises a single user from the shared
    /// password and runs without a panel or sync loop.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), ServerError> {
        let mut listen_addr = self.config.listen.clone();

        if let Some(panel) = &self.state.panel {
            let node_config = panel.fetch_config().await?;
            info!(
                server_port = node_config.server_port,
                push_interval = node_config.base_config.push_interval,
                pull_interval = node_config.base_config.pull_interval,
                "node config loaded"
            );
            if node_config.server_port > 0 {
                listen_addr = override_port(&listen_addr, node_config.server_port);
            }

            if let Some(users) = panel.fetch_users().await? {
                self.state.users.update(&users);
                info!(count = users.len(), "user list loaded");
            }

            *self.state.node_config.lock() = node_config;
        } else {
            self.state.users.update(&[User {
                id: 1,
                uuid: self.config.password.clone(),
                speed_limit: None,
                device_limit: None,
            }]);
        }

        let addr: SocketAddr = listen_addr
            .parse()
            .map_err(|_| ServerError::ListenAddr(listen_addr.clone()))?;
        let listener = create_listener(addr, CONNECTION_BACKLOG)?;
        info!(addr = %addr, "server listening");

        let sync_task = self.state.panel.as_ref().map(|panel| {
            tokio::spawn(run_sync_loop(
                self.state.clone(),
                panel.clone(),
                self.state.node_config.lock().clone(),
                self.config.traffic_file.clone(),
                shutdown.clone(),
            ))
        });

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("shutdown signal received, stopping accept loop");
                    break;
                }

                result = listener.accept() => {
                    let (tcp, peer) = match result {
                        Ok(pair) => pair,
                        Err(err) => {
                            error!(error = %err, "accept failed");
                            continue;
                        }
                    };
                    debug!(peer = %peer, "new connection");

                    let acceptor = self.acceptor.clone();
                    let state = self.state.clone();
                    self.tracker.increment();
                    let guard = ConnectionGuard::new(self.tracker.clone());

                    tokio::spawn(async move {
                        let _guard = guard;
                        // the inner task boundary catches handler panics
                        let task =
                            tokio::spawn(handle_connection(tcp, acceptor, state, peer));
                        if let Err(err) = task.await {
                            if err.is_panic() {
                                error!(peer = %peer, error = %err, "connection handler panicked");
                            }
                        }
                    });
                }
            }
        }

        // no new accepts past this point
        drop(listener);

        self.flush_traffic().await;

        if let Some(task) = sync_task {
            let _ = task.await;
        }

        let active = self.tracker.count();
        if active > 0 {
            info!(active, "waiting for active connections to drain");
            if self.tracker.wait_for_zero(SHUTDOWN_TIMEOUT).await {
                info!("all connections drained");
            } else {
                warn!(
                    active = self.tracker.count(),
                    "shutdown deadline reached with connections still active"
                );
            }
        }

        info!("server stopped");
        Ok(())
    }

    /// Push outstanding traffic (merging back on failure) and persist the
    /// carry-over file.
    async fn flush_traffic(&self) {
        if let Some(panel) = &self.state.panel {
            let snapshot = self.state.traffic.snapshot();
            if !snapshot.is_empty() {
                match panel.push_traffic(&snapshot).await {
                    Ok(()) => info!(users = snapshot.len(), "final traffic report pushed"),
                    Err(err) => {
                        error!(error = %err, "final traffic push failed");
                        self.state.traffic.merge(&snapshot);
                    }
                }
            }
        }

        if let Err(err) = self.state.traffic.save(&self.config.traffic_file) {
            error!(error = %err, "traffic persistence failed");
        }
    }
}

/// Replace the port of `listen`, keeping the host. A bare host gets the
/// port appended.
fn override_port(listen: &str, port: u16) -> String {
    match listen.rsplit_once(':') {
        Some((host, _)) if !host.is_empty() => format!("{host}:{port}"),
        _ => format!("{listen}:{port}"),
    }
}
