//! Connection lifecycle: one accepted transport from upgrade to cleanup.
//!
//! # State machine
//!
//! ```text
//!   Handshaking ──upgrade ok──► Binding ──bound──► Active ──read error / close──► Closed
//!        │                         │                 ▲ │
//!        │ upgrade failed          │ no identity,    │ └──displaced / evicted───► Closed
//!        ▼                         │ bad identity,   │
//!      (done, registry untouched)  │ NoAvailableSlot │ insert() displaces any older
//!                                  ▼                 │ handle for the identifier
//!                            (done, registry untouched)
//! ```
//!
//! - **Handshaking** – WebSocket upgrade, bounded by `handshake_timeout`.
//! - **Binding** – exactly one identity frame, bounded by `handshake_timeout`.
//!   Ping/pong frames before it are skipped.  The identifier is resolved by
//!   the [`IdentityBinder`]; a refusal is sent as a policy-violation close frame.
//! - **Active** – the handle is inserted (last writer wins; the displaced
//!   handle is closed), then the task only reads, to notice the peer going away.
//! - **Closed** – the entry is removed only if it still carries this
//!   connection's id, then the transport is released.
//!
//! Transport errors end here: they are logged and reported as a
//! [`ConnectionOutcome`], never returned as errors.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, info, warn};

use smartgrid_core::{parse_identity_frame, Binding, EnvelopeError, Identifier};

use crate::application::identity_binder::{BindError, IdentityBinder};
use crate::application::ports::{DeviceLink, TransportError};
use crate::application::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};
use crate::domain::PushDevice;
use crate::infrastructure::transport::{PushLink, WsDeviceLink};

/// Phases of one connection, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Handshaking,
    Binding,
    Active,
    Closed,
}

/// How a connection ended.
#[derive(Debug)]
pub enum ConnectionOutcome {
    /// The WebSocket upgrade failed or timed out.
    HandshakeFailed,
    /// The peer closed, errored or stayed silent before identifying itself.
    IdentityNotReceived,
    /// The identity frame was not a valid identifier.
    InvalidIdentity(EnvelopeError),
    /// Binding was refused; the registry was not touched.
    Refused { identifier: Identifier, reason: BindError },
    /// The connection reached Active and has now ended.
    ///
    /// `deregistered` is `false` when the entry had already been replaced by
    /// a newer connection or evicted by a failed dispatch.
    Closed {
        identifier: Identifier,
        binding: Binding,
        connection_id: ConnectionId,
        deregistered: bool,
    },
}

enum IdentityError {
    Transport(TransportError),
    Invalid(EnvelopeError),
}

type WsSink<S> = SplitSink<WebSocketStream<S>, Message>;
type WsStream<S> = SplitStream<WebSocketStream<S>>;

/// Runs connections through their lifecycle against a shared registry.
#[derive(Clone)]
pub struct ConnectionLifecycle {
    registry: Arc<ConnectionRegistry>,
    binder: IdentityBinder,
    handshake_timeout: Duration,
}

impl ConnectionLifecycle {
    pub fn new(registry: Arc<ConnectionRegistry>, binder: IdentityBinder, handshake_timeout: Duration) -> Self {
        Self {
            registry,
            binder,
            handshake_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Runs the full lifecycle of one inbound connection and returns when it
    /// has closed.
    ///
    /// `stream` is the raw transport before the WebSocket upgrade; `peer` is
    /// only used in log lines.
    pub async fn register_inbound_connection<S>(&self, stream: S, peer: &str) -> ConnectionOutcome
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        // ── Handshaking ───────────────────────────────────────────────────────
        debug!("{peer}: {:?}", ConnectionPhase::Handshaking);
        let ws = match timeout(self.handshake_timeout, accept_async(stream)).await {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                warn!("{peer}: WebSocket handshake failed: {e}");
                return ConnectionOutcome::HandshakeFailed;
            }
            Err(_) => {
                warn!("{peer}: WebSocket handshake timed out");
                return ConnectionOutcome::HandshakeFailed;
            }
        };
        let (mut sink, mut stream) = ws.split();

        // ── Binding ───────────────────────────────────────────────────────────
        debug!("{peer}: {:?}", ConnectionPhase::Binding);
        let identifier = match timeout(self.handshake_timeout, read_identity(&mut stream)).await {
            Ok(Ok(identifier)) => identifier,
            Ok(Err(IdentityError::Invalid(e))) => {
                warn!("{peer}: rejected identity frame: {e}");
                refuse(&mut sink, "invalid identifier").await;
                return ConnectionOutcome::InvalidIdentity(e);
            }
            Ok(Err(IdentityError::Transport(e))) => {
                info!("{peer}: disconnected before identifying: {e}");
                return ConnectionOutcome::IdentityNotReceived;
            }
            Err(_) => {
                warn!("{peer}: no identity frame within {:?}", self.handshake_timeout);
                return ConnectionOutcome::IdentityNotReceived;
            }
        };

        let binding = match self.binder.bind(&identifier).await {
            Ok(binding) => binding,
            Err(reason) => {
                warn!("{peer}: refusing {identifier}: {reason}");
                let close_reason = match reason {
                    BindError::NoAvailableSlot(_) => "no catalog slot available",
                    BindError::Catalog { .. } => "catalog unavailable",
                };
                refuse(&mut sink, close_reason).await;
                return ConnectionOutcome::Refused { identifier, reason };
            }
        };

        // ── Active ────────────────────────────────────────────────────────────
        let link = Arc::new(WsDeviceLink::new(sink));
        let handle = ConnectionHandle::new(identifier.clone(), binding, link.clone());
        let connection_id = handle.id();
        debug!("{peer}: {:?} as {connection_id}", ConnectionPhase::Active);

        // insert() has already released the registry lock, so closing the
        // displaced link may await without blocking other connections.  Its
        // own task then finds the newer entry and leaves it in place.
        if let Some(displaced) = self.registry.insert(handle) {
            info!(
                "{identifier}: connection {connection_id} supersedes {}",
                displaced.id()
            );
            displaced.link().close().await;
        }
        info!(
            "{peer}: device {identifier} online as catalog entry {} (owner {})",
            binding.catalog_id, binding.owner_id
        );

        pump_until_closed(&link, &mut stream, &identifier).await;

        // ── Closed ────────────────────────────────────────────────────────────
        let deregistered = self
            .registry
            .remove_if_current(&identifier, connection_id)
            .is_some();
        link.close().await;
        debug!("{peer}: {:?}", ConnectionPhase::Closed);
        info!("{peer}: device {identifier} offline (deregistered: {deregistered})");

        ConnectionOutcome::Closed {
            identifier,
            binding,
            connection_id,
            deregistered,
        }
    }

    /// Binds a push-style device and inserts its link into the registry.
    ///
    /// Returns `Ok(false)` without touching the registry if the identifier is
    /// already registered.
    ///
    /// # Errors
    ///
    /// Returns [`BindError`] if the identifier cannot be bound to a catalog row.
    pub async fn register_push_device(
        &self,
        device: &PushDevice,
        client: &reqwest::Client,
    ) -> Result<bool, BindError> {
        // Cheap early exit; the authoritative check is insert_if_absent below.
        if self.registry.contains(&device.identifier) {
            return Ok(false);
        }
        let binding = self.binder.bind(&device.identifier).await?;
        let link = Arc::new(PushLink::new(client.clone(), device.url.clone()));
        let url = link.url().to_string();
        let handle = ConnectionHandle::new(device.identifier.clone(), binding, link);

        // A socket with the same identifier may have connected while the bind
        // was awaited.  A live socket outranks a push link, so never displace.
        if !self.registry.insert_if_absent(handle) {
            debug!(
                "push device {} already connected; push link not registered",
                device.identifier
            );
            return Ok(false);
        }
        info!(
            "push device {} registered as catalog entry {} via {url}",
            device.identifier, binding.catalog_id
        );
        Ok(true)
    }

    /// Keeps push-style devices registered.
    ///
    /// A push link that fails a dispatch is evicted like any other link.  This
    /// loop puts it back every `interval` so the device is retried without
    /// operator action.  Runs until the task is aborted.
    pub async fn maintain_push_devices(&self, devices: Vec<PushDevice>, client: reqwest::Client, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            for device in &devices {
                if let Err(e) = self.register_push_device(device, &client).await {
                    warn!("push device {} not registered: {e}", device.identifier);
                }
            }
        }
    }
}

/// Reads frames until the first text or binary frame and parses it as the
/// device identifier.
async fn read_identity<S>(stream: &mut WsStream<S>) -> Result<Identifier, IdentityError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                return parse_identity_frame(text.as_bytes()).map_err(IdentityError::Invalid)
            }
            Some(Ok(Message::Binary(bytes))) => {
                return parse_identity_frame(&bytes).map_err(IdentityError::Invalid)
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
            Some(Ok(Message::Close(_))) | None => {
                return Err(IdentityError::Transport(TransportError::Closed))
            }
            Some(Err(e)) => return Err(IdentityError::Transport(TransportError::io(e))),
        }
    }
}

/// Active-phase read loop.  Inbound frames carry no meaning; the loop exists
/// to notice the peer leaving or the link being closed locally.
async fn pump_until_closed<S>(link: &WsDeviceLink<S>, stream: &mut WsStream<S>, identifier: &Identifier)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    loop {
        tokio::select! {
            _ = link.closed() => {
                debug!("{identifier}: link closed locally");
                return;
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Close(_))) | None => {
                    debug!("{identifier}: peer closed the connection");
                    return;
                }
                Some(Ok(other)) => debug!("{identifier}: ignoring {} byte frame", other.len()),
                Some(Err(e)) => {
                    debug!("{identifier}: read error: {e}");
                    return;
                }
            },
        }
    }
}

/// Sends a policy-violation close frame, bounded so a stuck peer cannot hold
/// the task.
async fn refuse<S>(sink: &mut WsSink<S>, reason: &'static str)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = CloseFrame {
        code: CloseCode::Policy,
        reason: reason.into(),
    };
    let closing = async {
        sink.send(Message::Close(Some(frame))).await?;
        sink.close().await
    };
    match timeout(Duration::from_secs(1), closing).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("sending refusal close frame: {e}"),
        Err(_) => debug!("sending refusal close frame timed out"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{CatalogError, DeviceCatalog};
    use crate::infrastructure::storage::InMemoryCatalog;
    use crate::infrastructure::transport::mock::RecordingLink;
    use smartgrid_core::{CatalogEntry, CatalogId, OwnerId};
    use tokio::io::DuplexStream;
    use tokio_tungstenite::client_async;

    fn id(raw: &str) -> Identifier {
        Identifier::parse(raw).unwrap()
    }

    fn lifecycle(rows: Vec<CatalogEntry>, handshake_timeout: Duration) -> ConnectionLifecycle {
        let catalog = Arc::new(InMemoryCatalog::new(rows));
        ConnectionLifecycle::new(
            Arc::new(ConnectionRegistry::new()),
            IdentityBinder::new(catalog),
            handshake_timeout,
        )
    }

    async fn client(io: DuplexStream) -> WebSocketStream<DuplexStream> {
        client_async("ws://smartgrid.local/", io).await.unwrap().0
    }

    #[tokio::test]
    async fn test_silent_device_is_dropped_after_handshake_timeout() {
        // Arrange
        let lc = lifecycle(
            vec![CatalogEntry::unclaimed(CatalogId(1), "A", OwnerId(1))],
            Duration::from_millis(100),
        );
        let (client_io, server_io) = tokio::io::duplex(4096);

        // Act: the client upgrades but never sends its identifier
        let (outcome, _client) = tokio::join!(lc.register_inbound_connection(server_io, "test"), client(client_io));

        // Assert
        assert!(matches!(outcome, ConnectionOutcome::IdentityNotReceived));
        assert!(lc.registry().is_empty());
    }

    #[tokio::test]
    async fn test_garbage_upgrade_is_handshake_failure() {
        use tokio::io::AsyncWriteExt;

        let lc = lifecycle(Vec::new(), Duration::from_millis(200));
        let (mut client_io, server_io) = tokio::io::duplex(4096);
        client_io.write_all(b"NOT HTTP\r\n\r\n").await.unwrap();

        let outcome = lc.register_inbound_connection(server_io, "test").await;

        assert!(matches!(outcome, ConnectionOutcome::HandshakeFailed));
    }

    #[tokio::test]
    async fn test_pings_before_identity_are_skipped() {
        // Arrange
        let lc = lifecycle(
            vec![CatalogEntry::unclaimed(CatalogId(5), "A", OwnerId(1))],
            Duration::from_secs(2),
        );
        let (client_io, server_io) = tokio::io::duplex(4096);
        let server = tokio::spawn({
            let lc = lc.clone();
            async move { lc.register_inbound_connection(server_io, "test").await }
        });

        // Act
        let mut ws = client(client_io).await;
        ws.send(Message::Ping(vec![1, 2, 3])).await.unwrap();
        ws.send(Message::Text("AA:BB\n".to_string())).await.unwrap();
        for _ in 0..50 {
            if lc.registry().contains(&id("AA:BB")) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // Assert
        assert_eq!(
            lc.registry().get(&id("AA:BB")).unwrap().binding().catalog_id,
            CatalogId(5)
        );
        ws.close(None).await.unwrap();
        let outcome = server.await.unwrap();
        assert!(matches!(outcome, ConnectionOutcome::Closed { deregistered: true, .. }));
        assert!(lc.registry().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_identity_gets_policy_close() {
        let lc = lifecycle(
            vec![CatalogEntry::unclaimed(CatalogId(1), "A", OwnerId(1))],
            Duration::from_secs(2),
        );
        let (client_io, server_io) = tokio::io::duplex(4096);
        let server = tokio::spawn({
            let lc = lc.clone();
            async move { lc.register_inbound_connection(server_io, "test").await }
        });

        let mut ws = client(client_io).await;
        ws.send(Message::Text("   ".to_string())).await.unwrap();
        let reply = ws.next().await.unwrap().unwrap();

        match reply {
            Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Policy),
            other => panic!("expected policy close, got {other:?}"),
        }
        assert!(matches!(server.await.unwrap(), ConnectionOutcome::InvalidIdentity(_)));
        assert!(lc.registry().is_empty());
    }

    /// Catalog whose lookup lets a socket for the same identifier connect
    /// while a push device's bind is still in flight.
    struct SocketArrivesDuringBind {
        inner: InMemoryCatalog,
        registry: Arc<ConnectionRegistry>,
        socket: std::sync::Mutex<Option<ConnectionHandle>>,
    }

    #[async_trait::async_trait]
    impl DeviceCatalog for SocketArrivesDuringBind {
        async fn find_by_identifier(&self, identifier: &Identifier) -> Result<Option<CatalogEntry>, CatalogError> {
            let arriving = self.socket.lock().unwrap().take();
            if let Some(socket) = arriving {
                self.registry.insert(socket);
            }
            self.inner.find_by_identifier(identifier).await
        }

        async fn claim_unassigned(&self, identifier: &Identifier) -> Result<CatalogEntry, CatalogError> {
            self.inner.claim_unassigned(identifier).await
        }

        async fn get(&self, catalog_id: CatalogId) -> Result<Option<CatalogEntry>, CatalogError> {
            self.inner.get(catalog_id).await
        }
    }

    #[tokio::test]
    async fn test_push_registration_never_displaces_socket_connected_during_bind() {
        // Arrange
        let registry = Arc::new(ConnectionRegistry::new());
        let socket_link = Arc::new(RecordingLink::new());
        let binding = Binding {
            catalog_id: CatalogId(1),
            owner_id: OwnerId(1),
        };
        let socket = ConnectionHandle::new(id("PUSH-01"), binding, socket_link.clone());
        let socket_id = socket.id();
        let catalog = Arc::new(SocketArrivesDuringBind {
            inner: InMemoryCatalog::new(vec![CatalogEntry::unclaimed(CatalogId(1), "A", OwnerId(1))]),
            registry: Arc::clone(&registry),
            socket: std::sync::Mutex::new(Some(socket)),
        });
        let lc = ConnectionLifecycle::new(Arc::clone(&registry), IdentityBinder::new(catalog), Duration::from_secs(1));
        let device = PushDevice {
            identifier: id("PUSH-01"),
            url: "http://127.0.0.1:9/command".to_string(),
        };

        // Act
        let registered = lc
            .register_push_device(&device, &reqwest::Client::new())
            .await
            .unwrap();

        // Assert: the socket that won the race keeps its entry and stays open
        assert!(!registered);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&id("PUSH-01")).unwrap().id(), socket_id);
        assert!(!socket_link.is_closed());
    }
}
