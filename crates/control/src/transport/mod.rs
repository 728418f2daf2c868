// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire-protocol adapters: the agent and subscriber WebSocket handlers and
//! the REST query surface, all speaking the envelope frame of [`crate::proto`].

pub mod agent;
pub mod auth;
pub mod client;
pub mod http;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::ErrorKind;
use crate::plane::ControlPlane;

/// Shared state handed to every route: the plane plus the two static
/// bearer tokens the adapters check before envelopes reach the core.
pub struct AppState {
    pub plane: Arc<ControlPlane>,
    pub agent_token: String,
    pub ui_token: String,
}

/// Top-level error response envelope for the REST surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Machine-readable code plus human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ErrorKind {
    /// Convert this kind into an axum JSON error response.
    pub fn to_http_response(&self, message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse {
            error: ErrorBody { code: self.as_str().to_owned(), message: message.into() },
        };
        (status, Json(body))
    }
}

/// Build the axum `Router` with all HTTP and WebSocket routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws/agent", get(agent::agent_ws_handler))
        .route("/ws/client", get(client::client_ws_handler))
        .route("/api/servers", get(http::get_servers))
        .route("/api/sessions", get(http::get_sessions).post(http::create_session))
        .route("/api/sessions/{id}", delete(http::delete_session))
        .route("/api/sessions/{id}/stop", post(http::stop_session))
        .route("/api/sessions/{id}/events", get(http::get_session_events))
        .route("/api/events/pending", get(http::get_pending_events))
        .route("/api/healthz", get(http::healthz))
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
