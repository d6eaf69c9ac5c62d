//! Push-style device link: one HTTP POST per command.
//!
//! Some panels do not hold a connection open; they expose a small HTTP
//! endpoint and expect the service to call them.  [`PushLink`] adapts such a
//! device to [`DeviceLink`] so it sits in the same registry and goes through
//! the same dispatch and eviction path as a WebSocket device.
//!
//! A non-2xx answer counts as a delivery failure.  The response body is
//! ignored.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use crate::application::ports::{DeviceLink, TransportError};

/// Outbound HTTP link to one device endpoint.
pub struct PushLink {
    client: reqwest::Client,
    url: String,
    closed: AtomicBool,
}

impl PushLink {
    /// `client` is shared between every push device; its timeout should match
    /// the dispatcher's send timeout.
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceLink for PushLink {
    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(text)
            .send()
            .await
            .map_err(TransportError::io)?;

        let status = response.status();
        debug!("push to {} answered {status}", self.url);
        if status.is_success() {
            Ok(())
        } else {
            Err(TransportError::Rejected(status.as_u16()))
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn transport(&self) -> &'static str {
        "push"
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
