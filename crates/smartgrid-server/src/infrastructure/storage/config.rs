//! TOML configuration file for the device link service.
//!
//! Every field is optional; a missing field takes the value shown below, and a
//! missing file yields the full default configuration.
//!
//! ```toml
//! [server]
//! device_bind = "0.0.0.0:8080"
//! api_bind = "0.0.0.0:8090"
//! log_level = "info"
//!
//! [timeouts]
//! handshake_secs = 10
//! send_ms = 5000
//! push_rearm_secs = 30
//!
//! [catalog]
//! path = "/var/lib/smartgrid/catalog.toml"
//!
//! [[push_devices]]
//! identifier = "AA:BB:CC:DD:EE:01"
//! url = "http://10.0.0.21/command"
//! ```
//!
//! CLI flags are applied on top of the loaded file in `main.rs`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use smartgrid_core::Identifier;

use crate::domain::{PushDevice, ServiceConfig};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{field} must be greater than zero")]
    ZeroTimeout { field: &'static str },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// On-disk configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub timeouts: TimeoutSection,
    #[serde(default)]
    pub catalog: CatalogSection,
    #[serde(default)]
    pub push_devices: Vec<PushDeviceEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    #[serde(default = "default_device_bind")]
    pub device_bind: SocketAddr,
    #[serde(default = "default_api_bind")]
    pub api_bind: SocketAddr,
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeoutSection {
    #[serde(default = "default_handshake_secs")]
    pub handshake_secs: u64,
    #[serde(default = "default_send_ms")]
    pub send_ms: u64,
    #[serde(default = "default_push_rearm_secs")]
    pub push_rearm_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CatalogSection {
    /// Catalog file.  Absent means an empty in-memory catalog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushDeviceEntry {
    pub identifier: Identifier,
    pub url: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_device_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}
fn default_api_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8090))
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_handshake_secs() -> u64 {
    10
}
fn default_send_ms() -> u64 {
    5000
}
fn default_push_rearm_secs() -> u64 {
    30
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            device_bind: default_device_bind(),
            api_bind: default_api_bind(),
            log_level: default_log_level(),
        }
    }
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            handshake_secs: default_handshake_secs(),
            send_ms: default_send_ms(),
            push_rearm_secs: default_push_rearm_secs(),
        }
    }
}

impl FileConfig {
    /// Converts the file representation into the runtime [`ServiceConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroTimeout`] if any timeout is zero.
    pub fn into_service_config(self) -> Result<ServiceConfig, ConfigError> {
        let t = &self.timeouts;
        for (field, value) in [
            ("timeouts.handshake_secs", t.handshake_secs),
            ("timeouts.send_ms", t.send_ms),
            ("timeouts.push_rearm_secs", t.push_rearm_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroTimeout { field });
            }
        }

        Ok(ServiceConfig {
            device_bind_addr: self.server.device_bind,
            api_bind_addr: self.server.api_bind,
            handshake_timeout: Duration::from_secs(t.handshake_secs),
            send_timeout: Duration::from_millis(t.send_ms),
            push_rearm_interval: Duration::from_secs(t.push_rearm_secs),
            catalog_path: self.catalog.path,
            push_devices: self
                .push_devices
                .into_iter()
                .map(|entry| PushDevice {
                    identifier: entry.identifier,
                    url: entry.url,
                })
                .collect(),
        })
    }
}

/// Loads [`FileConfig`] from `path`, returning the default configuration if
/// the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<FileConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
