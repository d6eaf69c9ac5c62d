//! Device listener: TCP accept loop feeding the connection lifecycle.
//!
//! Each accepted socket gets its own Tokio task running
//! [`ConnectionLifecycle::register_inbound_connection`], so one slow or silent
//! device never delays the next accept.  The loop polls the shared `running`
//! flag between accepts and stops once it is cleared; connections that are
//! already active keep running until their peers leave or the runtime shuts
//! down.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::infrastructure::lifecycle::{ConnectionLifecycle, ConnectionOutcome};

/// How often the accept loop re-checks the `running` flag when idle.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// Binds `addr` and serves device connections until `running` is cleared.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound.
pub async fn run_device_server(
    addr: SocketAddr,
    lifecycle: ConnectionLifecycle,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind device listener on {addr}"))?;
    serve_devices(listener, lifecycle, running).await
}

/// Serves device connections on an already-bound listener.
pub async fn serve_devices(
    listener: TcpListener,
    lifecycle: ConnectionLifecycle,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let local = listener
        .local_addr()
        .context("device listener has no local address")?;
    info!("device listener on {local}");

    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping device accept loop");
            break;
        }

        // accept() has no cancellation of its own; the short timeout lets the
        // loop notice the shutdown flag between connections.
        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                debug!("device connection from {peer_addr}");
                // Commands are small frames; Nagle would only delay them.
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("{peer_addr}: could not set TCP_NODELAY: {e}");
                }
                let lifecycle = lifecycle.clone();
                // One task per socket: a slow handshake never blocks accept().
                tokio::spawn(async move {
                    let peer = peer_addr.to_string();
                    let outcome = lifecycle.register_inbound_connection(stream, &peer).await;
                    log_outcome(&peer, &outcome);
                });
            }
            Ok(Err(e)) => {
                // Transient (e.g. too many open files); keep accepting.
                error!("device accept error: {e}");
            }
            Err(_) => {} // poll interval elapsed; re-check the flag
        }
    }

    Ok(())
}

fn log_outcome(peer: &str, outcome: &ConnectionOutcome) {
    match outcome {
        ConnectionOutcome::Closed {
            identifier,
            connection_id,
            ..
        } => debug!("{peer}: session {connection_id} for {identifier} finished"),
        other => debug!("{peer}: connection ended: {other:?}"),
    }
}
