//! In-memory device links for unit and integration testing.
//!
//! These let tests drive the registry and dispatcher without a socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::application::ports::{DeviceLink, TransportError};

/// A link that accepts every frame and remembers it.
#[derive(Default)]
pub struct RecordingLink {
    sent: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl RecordingLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every frame written so far, oldest first.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().expect("lock poisoned").clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceLink for RecordingLink {
    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.sent.lock().expect("lock poisoned").push(text);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn transport(&self) -> &'static str {
        "mock"
    }
}

/// A link whose every write fails with a broken-pipe I/O error.
#[derive(Default)]
pub struct FailingLink {
    closed: AtomicBool,
}

impl FailingLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceLink for FailingLink {
    async fn send_text(&self, _text: String) -> Result<(), TransportError> {
        Err(TransportError::io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "simulated write failure",
        )))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn transport(&self) -> &'static str {
        "mock"
    }
}

/// A link whose writes never complete, for exercising send timeouts.
#[derive(Default)]
pub struct StalledLink {
    closed: AtomicBool,
}

impl StalledLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceLink for StalledLink {
    async fn send_text(&self, _text: String) -> Result<(), TransportError> {
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn transport(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_recording_link_records_frames_in_order() {
        // Arrange
        let link = RecordingLink::new();

        // Act
        link.send_text("one".to_string()).await.unwrap();
        link.send_text("two".to_string()).await.unwrap();

        // Assert
        assert_eq!(link.sent(), vec!["one".to_string(), "two".to_string()]);
    }

    #[tokio::test]
    async fn test_recording_link_rejects_writes_after_close() {
        let link = RecordingLink::new();
        link.close().await;

        let result = link.send_text("late".to_string()).await;

        assert!(matches!(result, Err(TransportError::Closed)));
        assert!(link.sent().is_empty());
    }

    #[tokio::test]
    async fn test_failing_link_reports_io_error() {
        let link = FailingLink::new();
        let result = link.send_text("x".to_string()).await;
        assert!(matches!(result, Err(TransportError::Io(_))));
    }

    #[tokio::test]
    async fn test_stalled_link_never_completes() {
        let link = StalledLink::new();
        let result = tokio::time::timeout(Duration::from_millis(20), link.send_text("x".to_string())).await;
        assert!(result.is_err(), "write must still be pending");
    }
}
