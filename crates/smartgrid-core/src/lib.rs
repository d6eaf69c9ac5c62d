//! # smartgrid-core
//!
//! Shared library for the SmartGrid device link containing the device catalog
//! types and the command envelope that travels to breaker-panel devices.
//!
//! This crate is used by the server and by device-side tooling.  It has zero
//! dependencies on sockets, async runtimes, or storage engines.
//!
//! # Architecture overview (for beginners)
//!
//! Each physical breaker-panel controller keeps a WebSocket open to the cloud
//! service.  The first thing it sends is its identifier (usually a hardware
//! MAC address).  The service binds that identifier to a provisioned catalog
//! row and, from then on, can push commands down the open socket.
//!
//! This crate (`smartgrid-core`) is the shared foundation.  It defines:
//!
//! - **`domain`** – The catalog vocabulary: catalog ids, owners, validated
//!   device identifiers, and the catalog entry itself.
//!
//! - **`protocol`** – What travels on the wire: the identity handshake frame
//!   and the minimal JSON command envelope
//!   (`{"command": ..., "breaker_reference": ...}`).

pub mod domain;
pub mod protocol;

pub use domain::catalog::{Binding, CatalogEntry, CatalogId, Identifier, IdentifierError, OwnerId};
pub use protocol::command::{Command, CommandError, CommandRequest};
pub use protocol::envelope::{
    decode_envelope, encode_envelope, parse_identity_frame, CommandEnvelope, EnvelopeError,
};
