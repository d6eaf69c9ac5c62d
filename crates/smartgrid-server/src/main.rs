//! SmartGrid device link service, entry point.
//!
//! Breaker-panel devices open a WebSocket to the device port and send their
//! identifier (usually a MAC address) as the first frame.  The service binds
//! that identifier to a catalog entry, keeps the socket in a registry, and
//! the control-plane API pushes commands down it.
//!
//! # Usage
//!
//! ```text
//! smartgrid-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>            TOML config file
//!   --catalog <PATH>           TOML catalog file (overrides [catalog].path)
//!   --bind <IP>                Bind IP for both listeners
//!   --device-port <PORT>       Device WebSocket port [default: 8080]
//!   --api-port <PORT>          Control API port [default: 8090]
//!   --handshake-timeout <SECS> Identity frame deadline [default: 10]
//!   --send-timeout-ms <MS>     Per-command write deadline [default: 5000]
//! ```
//!
//! # Precedence
//!
//! CLI flag, then environment variable, then config file, then built-in
//! default.
//!
//! | Variable                      | Flag                  |
//! |-------------------------------|-----------------------|
//! | `SMARTGRID_CONFIG`            | `--config`            |
//! | `SMARTGRID_CATALOG`           | `--catalog`           |
//! | `SMARTGRID_BIND`              | `--bind`              |
//! | `SMARTGRID_DEVICE_PORT`       | `--device-port`       |
//! | `SMARTGRID_API_PORT`          | `--api-port`          |
//! | `SMARTGRID_HANDSHAKE_TIMEOUT` | `--handshake-timeout` |
//! | `SMARTGRID_SEND_TIMEOUT_MS`   | `--send-timeout-ms`   |
//!
//! Log filtering follows `RUST_LOG`, falling back to `[server].log_level`.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use smartgrid_server::application::{CommandDispatcher, ConnectionRegistry, DeviceCatalog, IdentityBinder};
use smartgrid_server::domain::ServiceConfig;
use smartgrid_server::infrastructure::control_api::run_control_api;
use smartgrid_server::infrastructure::device_server::run_device_server;
use smartgrid_server::infrastructure::storage::{load_config, FileCatalog, FileConfig, InMemoryCatalog};
use smartgrid_server::infrastructure::ConnectionLifecycle;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// SmartGrid device link service.
#[derive(Debug, Parser)]
#[command(
    name = "smartgrid-server",
    about = "Device connection registry and command dispatch for SmartGrid panels",
    version
)]
struct Cli {
    /// TOML config file.  A missing file means built-in defaults.
    #[arg(long, env = "SMARTGRID_CONFIG")]
    config: Option<PathBuf>,

    /// TOML catalog file.  Without one the catalog is empty and in-memory.
    #[arg(long, env = "SMARTGRID_CATALOG")]
    catalog: Option<PathBuf>,

    /// IP address both listeners bind to.
    #[arg(long, env = "SMARTGRID_BIND")]
    bind: Option<IpAddr>,

    /// Port devices connect to (ws://host:PORT).
    #[arg(long, env = "SMARTGRID_DEVICE_PORT")]
    device_port: Option<u16>,

    /// Port of the control-plane REST API.
    #[arg(long, env = "SMARTGRID_API_PORT")]
    api_port: Option<u16>,

    /// Seconds a device has to upgrade and send its identifier.
    #[arg(long, env = "SMARTGRID_HANDSHAKE_TIMEOUT")]
    handshake_timeout: Option<u64>,

    /// Milliseconds a single command write may take before the device is
    /// considered gone.
    #[arg(long, env = "SMARTGRID_SEND_TIMEOUT_MS")]
    send_timeout_ms: Option<u64>,
}

impl Cli {
    /// Applies CLI overrides on top of the file configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file configuration is invalid or an override
    /// is zero where a positive duration is required.
    fn into_service_config(self, file: FileConfig) -> anyhow::Result<ServiceConfig> {
        let mut config = file
            .into_service_config()
            .context("invalid configuration file")?;

        if let Some(ip) = self.bind {
            config.device_bind_addr.set_ip(ip);
            config.api_bind_addr.set_ip(ip);
        }
        if let Some(port) = self.device_port {
            config.device_bind_addr.set_port(port);
        }
        if let Some(port) = self.api_port {
            config.api_bind_addr.set_port(port);
        }
        if let Some(secs) = self.handshake_timeout {
            anyhow::ensure!(secs > 0, "--handshake-timeout must be greater than zero");
            config.handshake_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = self.send_timeout_ms {
            anyhow::ensure!(ms > 0, "--send-timeout-ms must be greater than zero");
            config.send_timeout = Duration::from_millis(ms);
        }
        if let Some(path) = self.catalog {
            config.catalog_path = Some(path);
        }
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let file = match &cli.config {
        Some(path) => load_config(path).with_context(|| format!("loading {}", path.display()))?,
        None => FileConfig::default(),
    };

    // ── Logging setup ─────────────────────────────────────────────────────────
    //
    // RUST_LOG wins; otherwise the config file's log level applies.
    let fallback_level = file.server.log_level.clone();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&fallback_level)),
        )
        .init();

    let config = cli.into_service_config(file)?;
    info!(
        "SmartGrid device link starting: devices={}, api={}",
        config.device_bind_addr, config.api_bind_addr
    );

    // ── Wiring ────────────────────────────────────────────────────────────────
    let catalog: Arc<dyn DeviceCatalog> = match &config.catalog_path {
        Some(path) => {
            let catalog = FileCatalog::open(path)
                .await
                .with_context(|| format!("opening catalog {}", path.display()))?;
            info!("catalog backed by {}", catalog.path().display());
            Arc::new(catalog)
        }
        None => {
            warn!("no catalog configured; every device will be refused until one is provided");
            Arc::new(InMemoryCatalog::default())
        }
    };
    let registry = Arc::new(ConnectionRegistry::new());
    let binder = IdentityBinder::new(Arc::clone(&catalog));
    let dispatcher = CommandDispatcher::new(catalog, Arc::clone(&registry), config.send_timeout);
    let lifecycle = ConnectionLifecycle::new(registry, binder, config.handshake_timeout);

    // ── Graceful shutdown flag ────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => tracing::error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    // ── Push-style devices ────────────────────────────────────────────────────
    let push_task = if config.push_devices.is_empty() {
        None
    } else {
        let client = reqwest::Client::builder()
            .timeout(config.send_timeout)
            .build()
            .context("building HTTP client for push devices")?;
        let lifecycle = lifecycle.clone();
        let devices = config.push_devices.clone();
        let interval = config.push_rearm_interval;
        info!("{} push device(s) configured", devices.len());
        Some(tokio::spawn(async move {
            lifecycle.maintain_push_devices(devices, client, interval).await;
        }))
    };

    // ── Listeners ─────────────────────────────────────────────────────────────
    let api_addr: SocketAddr = config.api_bind_addr;
    let api_listener = TcpListener::bind(api_addr)
        .await
        .with_context(|| format!("failed to bind control API on {api_addr}"))?;
    let api_task = tokio::spawn(run_control_api(api_listener, dispatcher, Arc::clone(&running)));

    run_device_server(config.device_bind_addr, lifecycle, running).await?;

    api_task.await.context("control API task panicked")??;
    if let Some(task) = push_task {
        task.abort();
    }

    info!("SmartGrid device link stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
