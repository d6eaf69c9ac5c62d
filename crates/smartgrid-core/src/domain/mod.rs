//! Domain entities for the device catalog.
//!
//! Everything here is pure data with validation rules; persistence lives in
//! the server crate behind the `DeviceCatalog` port.

pub mod catalog;

pub use catalog::{Binding, CatalogEntry, CatalogId, Identifier, IdentifierError, OwnerId};
