//! Ports: the traits the application layer calls out through.
//!
//! Production implementations live in `infrastructure::storage` (catalog) and
//! `infrastructure::transport` (links); tests use the doubles in
//! `infrastructure::transport::mock` or the `mockall`-generated
//! `MockDeviceCatalog`.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use smartgrid_core::{CatalogEntry, CatalogId, Identifier};

/// Errors reported by a [`DeviceCatalog`].
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Every catalog row already carries an identifier.
    #[error("no unclaimed catalog entry is available")]
    NoAvailableSlot,

    /// A concurrent claim bound this identifier first.
    #[error("identifier {identifier} is already bound to catalog entry {catalog_id}")]
    AlreadyBound {
        identifier: Identifier,
        catalog_id: CatalogId,
    },

    /// The backing store failed.
    #[error("catalog storage error: {0}")]
    Storage(String),
}

/// Persistence interface for provisioned device records.
///
/// Implementations must make [`claim_unassigned`](DeviceCatalog::claim_unassigned)
/// a single atomic conditional update: two concurrent claims may never bind
/// the same row.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceCatalog: Send + Sync {
    /// Returns the row bound to `identifier`, if any.
    async fn find_by_identifier(
        &self,
        identifier: &Identifier,
    ) -> Result<Option<CatalogEntry>, CatalogError>;

    /// Binds `identifier` to the unclaimed row with the lowest catalog id and
    /// returns the updated row.
    ///
    /// # Errors
    ///
    /// - [`CatalogError::NoAvailableSlot`] when no unclaimed row exists.
    /// - [`CatalogError::AlreadyBound`] when another row already carries
    ///   `identifier`.
    async fn claim_unassigned(&self, identifier: &Identifier) -> Result<CatalogEntry, CatalogError>;

    /// Returns the row with `catalog_id`, if any.
    async fn get(&self, catalog_id: CatalogId) -> Result<Option<CatalogEntry>, CatalogError>;

    /// Returns `true` if a row with `catalog_id` exists.
    async fn exists(&self, catalog_id: CatalogId) -> Result<bool, CatalogError> {
        Ok(self.get(catalog_id).await?.is_some())
    }
}

/// Transport-level failures.  Always terminal for the connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("link is closed")]
    Closed,

    #[error("send timed out after {0:?}")]
    Timeout(Duration),

    #[error("device endpoint answered HTTP {0}")]
    Rejected(u16),

    #[error("transport failure: {0}")]
    Io(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl TransportError {
    pub fn io(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        TransportError::Io(Box::new(err))
    }
}

/// An outbound channel to one device.
///
/// The registry stores links as `Arc<dyn DeviceLink>`; a link may be shared by
/// the registry, the lifecycle task that owns the connection, and any
/// dispatch currently writing to it.
#[async_trait]
pub trait DeviceLink: Send + Sync {
    /// Writes one text frame (a JSON command envelope) to the device.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the frame could not be written; the
    /// caller must treat the link as dead.
    async fn send_text(&self, text: String) -> Result<(), TransportError>;

    /// Closes the link.  Idempotent; never fails.
    async fn close(&self);

    /// Short transport name for logs and the control API (`"websocket"`, `"push"`).
    fn transport(&self) -> &'static str;
}
