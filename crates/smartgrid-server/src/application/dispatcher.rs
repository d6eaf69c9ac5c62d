//! CommandDispatcher: delivers one validated command to one live device.
//!
//! # Dispatch steps
//!
//! 1. The identifier must exist in the catalog, else [`DispatchError::DeviceNotFound`].
//! 2. The registry must hold a live handle, else [`DispatchError::DeviceNotConnected`].
//!    No transport I/O happens on this path.
//! 3. The request is validated into a [`Command`], else
//!    [`DispatchError::InvalidCommand`].  Still no I/O.
//! 4. The envelope is written to the handle under `send_timeout`.
//! 5. A failed or timed-out write evicts the entry (only if it still refers to
//!    this handle), closes the link and returns [`DispatchError::DeliveryFailed`].
//!
//! Delivery is at-most-once.  Nothing here retries; success means the frame
//! reached the transport, not that the device acted on it.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use smartgrid_core::{encode_envelope, CatalogId, Command, CommandError, CommandRequest, EnvelopeError, Identifier};

use crate::application::ports::{CatalogError, DeviceCatalog, TransportError};
use crate::application::registry::{ConnectedDevice, ConnectionRegistry};

/// Typed dispatch outcomes, mapped one-to-one onto control-plane responses.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("device {0} is not in the catalog")]
    DeviceNotFound(String),

    #[error("device {0} is not connected")]
    DeviceNotConnected(String),

    #[error("invalid command: {0}")]
    InvalidCommand(#[from] CommandError),

    #[error("delivery to {identifier} failed: {source}")]
    DeliveryFailed {
        identifier: Identifier,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("failed to encode command envelope: {0}")]
    Encoding(#[from] EnvelopeError),
}

/// Sends commands to registered devices.  Cheap to clone.
#[derive(Clone)]
pub struct CommandDispatcher {
    catalog: Arc<dyn DeviceCatalog>,
    registry: Arc<ConnectionRegistry>,
    send_timeout: Duration,
}

impl CommandDispatcher {
    pub fn new(
        catalog: Arc<dyn DeviceCatalog>,
        registry: Arc<ConnectionRegistry>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            registry,
            send_timeout,
        }
    }

    /// Sends `request` to the device bound under `identifier`.
    ///
    /// # Errors
    ///
    /// See the module docs for the order in which each [`DispatchError`]
    /// variant is checked.
    pub async fn dispatch_command(
        &self,
        identifier: &Identifier,
        request: &CommandRequest,
    ) -> Result<(), DispatchError> {
        if self.catalog.find_by_identifier(identifier).await?.is_none() {
            return Err(DispatchError::DeviceNotFound(identifier.to_string()));
        }
        self.deliver(identifier, request).await
    }

    /// Sends `request` to the device bound to catalog row `catalog_id`.
    ///
    /// A row that exists but has never been claimed by a device is reported as
    /// [`DispatchError::DeviceNotConnected`].
    pub async fn dispatch_to_device(
        &self,
        catalog_id: CatalogId,
        request: &CommandRequest,
    ) -> Result<(), DispatchError> {
        let entry = self
            .catalog
            .get(catalog_id)
            .await?
            .ok_or_else(|| DispatchError::DeviceNotFound(format!("catalog entry {catalog_id}")))?;

        match entry.identifier {
            Some(identifier) => self.deliver(&identifier, request).await,
            None => Err(DispatchError::DeviceNotConnected(format!(
                "catalog entry {catalog_id}"
            ))),
        }
    }

    /// Lists every device currently in the registry.
    pub fn connected_devices(&self) -> Vec<ConnectedDevice> {
        self.registry.snapshot()
    }

    async fn deliver(&self, identifier: &Identifier, request: &CommandRequest) -> Result<(), DispatchError> {
        // get() clones the handle and drops the registry lock at once; the
        // write below never holds it.
        let handle = self
            .registry
            .get(identifier)
            .ok_or_else(|| DispatchError::DeviceNotConnected(identifier.to_string()))?;

        // Validate before touching the link so a bad request costs no I/O.
        let command = Command::from_request(request)?;
        let envelope = encode_envelope(&command)?;
        debug!("sending {envelope} to {identifier} via {}", handle.link().transport());

        let failure = match tokio::time::timeout(self.send_timeout, handle.link().send_text(envelope)).await {
            Ok(Ok(())) => {
                info!("sent {} to {identifier}", command.name());
                return Ok(());
            }
            Ok(Err(err)) => err,
            Err(_) => TransportError::Timeout(self.send_timeout),
        };

        // A stalled write counts as a dead link, same as an error.  Only this
        // handle is evicted: if the device reconnected while we were writing,
        // the newer entry stays.  The registry lock is released before the
        // link is closed.
        let evicted = self.registry.remove_if_current(identifier, handle.id()).is_some();
        handle.link().close().await;
        warn!(
            "delivery of {} to {identifier} failed: {failure} (evicted: {evicted})",
            command.name()
        );

        Err(DispatchError::DeliveryFailed {
            identifier: identifier.clone(),
            source: failure,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
