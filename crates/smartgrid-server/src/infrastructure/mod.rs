//! Infrastructure layer for smartgrid-server.
//!
//! # Sub-modules
//!
//! - **`lifecycle`** – Drives one inbound connection through Handshaking,
//!   Binding, Active and Closed against the shared registry.
//!
//! - **`device_server`** – TCP accept loop; spawns one lifecycle task per
//!   device socket.
//!
//! - **`control_api`** – axum router exposing the dispatcher over HTTP.
//!
//! - **`transport`** – `DeviceLink` implementations: WebSocket, HTTP push,
//!   and in-memory test doubles.
//!
//! - **`storage`** – Catalog backends (in-memory, TOML file) and the
//!   configuration file loader.

pub mod control_api;
pub mod device_server;
pub mod lifecycle;
pub mod storage;
pub mod transport;

pub use lifecycle::{ConnectionLifecycle, ConnectionOutcome, ConnectionPhase};
