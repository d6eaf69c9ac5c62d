//! Application layer for smartgrid-server.
//!
//! # Sub-modules
//!
//! - **`ports`** – Traits the application needs from the outside world: the
//!   device catalog (persistence) and a device link (transport).
//!
//! - **`registry`** – The in-memory table of currently reachable devices,
//!   keyed by identifier.  One mutex, held only for map operations.
//!
//! - **`identity_binder`** – Resolves a connecting device's identifier to a
//!   catalog row, auto-linking the first unclaimed row for unseen devices.
//!
//! - **`dispatcher`** – Validates a command, finds the live connection, writes
//!   the envelope, and evicts the connection if the write fails.

pub mod dispatcher;
pub mod identity_binder;
pub mod ports;
pub mod registry;

pub use dispatcher::{CommandDispatcher, DispatchError};
pub use identity_binder::{BindError, IdentityBinder};
pub use ports::{CatalogError, DeviceCatalog, DeviceLink, TransportError};
pub use registry::{ConnectedDevice, ConnectionHandle, ConnectionId, ConnectionRegistry};
