//! Service configuration types.
//!
//! [`ServiceConfig`] is the single source of truth for all runtime settings.
//! `main.rs` builds it from the TOML config file and CLI flags; tests build
//! it directly or start from [`ServiceConfig::default`].

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use smartgrid_core::Identifier;

/// All runtime configuration for the device link service.
///
/// # Example
///
/// ```rust
/// use smartgrid_server::domain::ServiceConfig;
///
/// let cfg = ServiceConfig::default();
/// assert_eq!(cfg.device_bind_addr.port(), 8080);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Address the device WebSocket listener binds to.
    pub device_bind_addr: SocketAddr,

    /// Address the control-plane REST API binds to.
    pub api_bind_addr: SocketAddr,

    /// How long a freshly upgraded connection may take to send its identity
    /// frame before it is dropped.
    pub handshake_timeout: Duration,

    /// Upper bound on a single command write.  A write that takes longer is
    /// reported as a delivery failure and the connection is evicted.
    pub send_timeout: Duration,

    /// How often missing push-style devices are put back into the registry.
    pub push_rearm_interval: Duration,

    /// TOML catalog file.  `None` runs with an empty in-memory catalog.
    pub catalog_path: Option<PathBuf>,

    /// Devices reached by outbound HTTP instead of a persistent connection.
    pub push_devices: Vec<PushDevice>,
}

/// A device that receives commands as HTTP POSTs to a fixed URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushDevice {
    pub identifier: Identifier,
    pub url: String,
}

impl Default for ServiceConfig {
    /// | Field                | Default         |
    /// |----------------------|-----------------|
    /// | device_bind_addr     | `0.0.0.0:8080`  |
    /// | api_bind_addr        | `0.0.0.0:8090`  |
    /// | handshake_timeout    | 10 seconds      |
    /// | send_timeout         | 5 seconds       |
    /// | push_rearm_interval  | 30 seconds      |
    fn default() -> Self {
        Self {
            device_bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            api_bind_addr: SocketAddr::from(([0, 0, 0, 0], 8090)),
            handshake_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(5),
            push_rearm_interval: Duration::from_secs(30),
            catalog_path: None,
            push_devices: Vec::new(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
