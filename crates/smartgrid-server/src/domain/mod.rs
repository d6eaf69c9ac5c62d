//! Domain layer for smartgrid-server.
//!
//! Catalog entities and the wire envelope live in `smartgrid-core`; the only
//! server-specific domain type is the runtime configuration.

pub mod config;

pub use config::{PushDevice, ServiceConfig};
