//! [`DeviceLink`](crate::application::ports::DeviceLink) implementations.
//!
//! - [`websocket::WsDeviceLink`] – write half of a device's persistent WebSocket.
//! - [`push::PushLink`] – HTTP POST per command, for devices that expose an endpoint.
//! - [`mock`] – in-memory links for tests.

pub mod mock;
pub mod push;
pub mod websocket;

pub use push::PushLink;
pub use websocket::WsDeviceLink;
