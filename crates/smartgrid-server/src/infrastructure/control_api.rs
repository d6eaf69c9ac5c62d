//! Control-plane REST API.
//!
//! | Method | Path                                   | Purpose                         |
//! |--------|----------------------------------------|---------------------------------|
//! | POST   | `/devices/{catalog_id}/commands`       | send a command by catalog id    |
//! | POST   | `/identifiers/{identifier}/commands`   | send a command by identifier    |
//! | GET    | `/devices/connected`                   | list live registry entries      |
//! | GET    | `/health`                              | liveness plus connection count  |
//!
//! Command bodies are `{"command": "...", "breaker_reference": "..."}`; the
//! older `breakerId` field is accepted too.
//!
//! # Status mapping
//!
//! | Dispatch result        | HTTP |
//! |------------------------|------|
//! | sent                   | 200  |
//! | `InvalidCommand`       | 400  |
//! | `DeviceNotFound`       | 404  |
//! | `DeviceNotConnected`   | 404  |
//! | `DeliveryFailed`       | 502  |
//! | catalog / encoding     | 500  |

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{info, warn};

use smartgrid_core::{CatalogId, CommandRequest, Identifier};

use crate::application::dispatcher::{CommandDispatcher, DispatchError};
use crate::application::registry::ConnectedDevice;

#[derive(Debug, Serialize)]
struct CommandSent {
    message: &'static str,
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    connected: usize,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        let status = match &err {
            DispatchError::DeviceNotFound(_) | DispatchError::DeviceNotConnected(_) => StatusCode::NOT_FOUND,
            DispatchError::InvalidCommand(_) => StatusCode::BAD_REQUEST,
            DispatchError::DeliveryFailed { .. } => StatusCode::BAD_GATEWAY,
            DispatchError::Catalog(_) | DispatchError::Encoding(_) => {
                warn!("command dispatch failed internally: {err}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

// A body that is not JSON, or lacks `command`, is a bad request in the same
// shape as every other API error rather than axum's plain-text rejection.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            format!("invalid request format: {}", rejection.body_text()),
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

/// Builds the API router around `dispatcher`.
pub fn router(dispatcher: CommandDispatcher) -> Router {
    Router::new()
        .route("/devices/{catalog_id}/commands", post(command_by_catalog_id))
        .route("/identifiers/{identifier}/commands", post(command_by_identifier))
        .route("/devices/connected", get(connected_devices))
        .route("/health", get(health))
        .with_state(dispatcher)
}

async fn command_by_catalog_id(
    State(dispatcher): State<CommandDispatcher>,
    Path(catalog_id): Path<u64>,
    payload: Result<Json<CommandRequest>, JsonRejection>,
) -> Result<Json<CommandSent>, ApiError> {
    let Json(request) = payload?;
    dispatcher
        .dispatch_to_device(CatalogId(catalog_id), &request)
        .await?;
    Ok(Json(CommandSent {
        message: "command sent",
    }))
}

async fn command_by_identifier(
    State(dispatcher): State<CommandDispatcher>,
    Path(raw): Path<String>,
    payload: Result<Json<CommandRequest>, JsonRejection>,
) -> Result<Json<CommandSent>, ApiError> {
    let Json(request) = payload?;
    let identifier =
        Identifier::parse(&raw).map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;
    dispatcher.dispatch_command(&identifier, &request).await?;
    Ok(Json(CommandSent {
        message: "command sent",
    }))
}

async fn connected_devices(State(dispatcher): State<CommandDispatcher>) -> Json<Vec<ConnectedDevice>> {
    Json(dispatcher.connected_devices())
}

async fn health(State(dispatcher): State<CommandDispatcher>) -> Json<Health> {
    Json(Health {
        status: "ok",
        connected: dispatcher.connected_devices().len(),
    })
}

/// Serves the API on `listener` until `running` is cleared.
///
/// # Errors
///
/// Returns an error if the server fails while running.
pub async fn run_control_api(
    listener: TcpListener,
    dispatcher: CommandDispatcher,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let addr = listener.local_addr().context("API listener has no local address")?;
    info!("control API listening on {addr}");

    axum::serve(listener, router(dispatcher))
        .with_graceful_shutdown(async move {
            while running.load(Ordering::Relaxed) {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        })
        .await
        .with_context(|| format!("control API on {addr} failed"))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
