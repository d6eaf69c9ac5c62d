//! WebSocket device link.
//!
//! The lifecycle task splits each accepted WebSocket into a read half, which
//! it keeps for the liveness loop, and a write half, which is wrapped in a
//! [`WsDeviceLink`] and shared through the registry.
//!
//! # Write serialization
//!
//! The sink sits behind a `tokio::sync::Mutex`, so two dispatches to the same
//! device queue up instead of interleaving frames.  This lock is separate from
//! the registry lock and is the only lock held across a socket write.
//!
//! # Close signal
//!
//! [`WsDeviceLink::close`] flips a flag and wakes [`WsDeviceLink::closed`].
//! The lifecycle task selects on `closed()` next to its read loop, so a link
//! that is displaced or evicted stops its task without waiting for the peer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

use crate::application::ports::{DeviceLink, TransportError};

/// Upper bound on sending the close frame when a link is shut down.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

type WsSink<S> = SplitSink<WebSocketStream<S>, Message>;

/// Write half of one device's WebSocket.
pub struct WsDeviceLink<S> {
    sink: Mutex<WsSink<S>>,
    closed: AtomicBool,
    close_signal: Notify,
}

impl<S> WsDeviceLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(sink: WsSink<S>) -> Self {
        Self {
            sink: Mutex::new(sink),
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Resolves once [`close`](DeviceLink::close) has been called.
    pub async fn closed(&self) {
        if self.is_closed() {
            return;
        }
        self.close_signal.notified().await;
    }
}

fn map_ws_error(err: WsError) -> TransportError {
    match err {
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
        other => TransportError::io(other),
    }
}

#[async_trait]
impl<S> DeviceLink for WsDeviceLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        // Held for the whole send (feed plus flush), so a second dispatch to
        // this device waits here instead of splicing into the frame.
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text)).await.map_err(map_ws_error)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // notify_one stores a permit if the lifecycle task is not waiting yet.
        self.close_signal.notify_one();

        let shutdown = async {
            let mut sink = self.sink.lock().await;
            sink.close().await
        };
        match timeout(CLOSE_GRACE, shutdown).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("closing WebSocket link: {e}"),
            Err(_) => debug!("closing WebSocket link timed out after {CLOSE_GRACE:?}"),
        }
    }

    fn transport(&self) -> &'static str {
        "websocket"
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
