//! smartgrid-server library crate.
//!
//! This crate provides the device connection registry and command dispatch
//! service: breaker-panel devices hold a WebSocket open to it, and the
//! control plane pushes commands down those sockets.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Device (WebSocket: identity frame, then command envelopes)
//!         ↕
//! [smartgrid-server]
//!   ├── domain/           ServiceConfig
//!   ├── application/      Registry, identity binding, command dispatch, ports
//!   └── infrastructure/
//!         ├── lifecycle/      Per-connection state machine
//!         ├── device_server/  TCP accept loop (tokio-tungstenite)
//!         ├── transport/      WebSocket and HTTP-push device links
//!         ├── storage/        Catalog backends, TOML config file
//!         └── control_api/    REST surface (axum)
//!         ↕
//! Control plane (HTTP: POST /devices/{id}/commands)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain`, `smartgrid-core` and the port traits
//!   it defines; it never names a socket or a storage engine.
//! - `infrastructure` implements the ports and owns every network and file
//!   handle.

/// Domain layer: configuration types (no I/O).
pub mod domain;

/// Application layer: registry, binder, dispatcher and their ports.
pub mod application;

/// Infrastructure layer: sockets, storage, HTTP.
pub mod infrastructure;
