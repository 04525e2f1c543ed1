//! CLI entry point for the anytls server.

use std::io;
use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use anytls_config::{CliOverrides, Config, LogConfig, apply_overrides, load_config, validate_config};

use crate::server::Server;

/// Server CLI arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "anytls-server", version, about = "Obfuscated TLS proxy server")]
pub struct ServerArgs {
    /// Config file path (yaml/json/toml); unused in standalone mode
    #[arg(short, long, default_value = "/etc/anytls/config.yaml")]
    pub config: PathBuf,

    /// TLS SNI printed into the standalone share link
    #[arg(long)]
    pub sni: Option<String>,

    #[command(flatten)]
    pub overrides: CliOverrides,
}

/// Run the server with the given arguments.
pub async fn run(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = if args.overrides.standalone {
        // standalone needs no config file
        let mut config = Config::standalone(
            args.overrides.password.clone().unwrap_or_default(),
            args.overrides.listen.clone(),
        );
        apply_overrides(&mut config, &args.overrides);
        config
    } else {
        let mut config = load_config(&args.config)?;
        apply_overrides(&mut config, &args.overrides);
        config
    };
    validate_config(&config)?;

    init_tracing(&config.log);
    info!(version = anytls_core::VERSION, "anytls server starting");

    let server = Server::new(config.clone())?;

    if let Err(err) = server.load_traffic(&config.traffic_file) {
        warn!(error = %err, "failed to load carried-over traffic");
    }

    // Graceful shutdown on SIGTERM/SIGINT
    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal_handler().await;
        info!("shutdown signal received");
        shutdown_signal.cancel();
    });

    if config.standalone {
        print_share_link(&config, args.sni.as_deref());
    }

    server.run(shutdown).await?;
    Ok(())
}

/// Wait for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                warn!("failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Initialize the tracing subscriber from the `log` config section.
fn init_tracing(config: &LogConfig) {
    let level = config.level.as_deref().unwrap_or("info");
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    let format = config.format.as_deref().unwrap_or("pretty");
    let output = config.output.as_deref().unwrap_or("stderr");

    match (format, output) {
        ("json", "stdout") => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(io::stdout))
                .init();
        }
        ("json", _) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(io::stderr))
                .init();
        }
        ("compact", "stdout") => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact().with_writer(io::stdout))
                .init();
        }
        ("compact", _) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact().with_writer(io::stderr))
                .init();
        }
        (_, "stdout") => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(io::stdout))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(io::stderr))
                .init();
        }
    }
}

/// Print an `anytls://` share link and a Clash-style snippet for the
/// standalone single-user setup.
fn print_share_link(config: &Config, sni: Option<&str>) {
    let port = config
        .listen
        .rsplit_once(':')
        .map(|(_, port)| port)
        .unwrap_or("8443");

    let host = public_ip().unwrap_or_else(|| "YOUR_SERVER_IP".to_string());

    let mut link = format!("anytls://{}@{host}:{port}/?insecure=1", config.password);
    if let Some(sni) = sni {
        link.push_str("&sni=");
        link.push_str(sni);
    }

    println!();
    println!("========== share link ==========");
    println!("{link}");
    println!("================================");
    println!();
    println!("Clash.Meta config:");
    println!(
        r#"
  - name: "anytls-node"
    type: anytls
    server: {host}
    port: {port}
    password: "{}"
    udp: true
    skip-cert-verify: true"#,
        config.password
    );
    if let Some(sni) = sni {
        println!("    sni: \"{sni}\"");
    }
    println!();
}

/// Best-effort public address discovery: a connected UDP socket exposes the
/// route's local address without sending anything.
fn public_ip() -> Option<String> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let ip = socket.local_addr().ok()?.ip();
    if ip.is_loopback() {
        return None;
    }
    Some(ip.to_string())
}
