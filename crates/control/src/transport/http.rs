// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! REST query and mutation surface for operator UIs.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::error::ErrorKind;
use crate::model::{StartSessionRequest, StopSessionRequest};
use crate::transport::auth::extract_token;
use crate::transport::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct SessionsQuery {
    #[serde(default)]
    pub server_id: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// `GET /api/healthz`
pub async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

/// `GET /api/servers`
pub async fn get_servers(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "servers": state.plane.servers() }))
}

/// `GET /api/sessions?server_id=`
pub async fn get_sessions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionsQuery>,
) -> Json<serde_json::Value> {
    let sessions = state.plane.sessions(query.server_id.as_deref());
    Json(serde_json::json!({ "sessions": sessions }))
}

/// `POST /api/sessions`
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    Json(req): Json<StartSessionRequest>,
) -> Response {
    let actor = actor_from(&headers, query.token.as_deref());
    match state.plane.create_session(&actor, &req).await {
        Ok(session) => (StatusCode::CREATED, Json(session)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// `POST /api/sessions/{id}/stop`
pub async fn stop_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    body: Option<Json<StopSessionRequest>>,
) -> Response {
    let actor = actor_from(&headers, query.token.as_deref());
    let req = body.map(|Json(b)| b).unwrap_or_default();
    match state
        .plane
        .stop_session(&actor, &session_id, req.grace_ms, req.kill_after_ms)
        .await
    {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(e) => error_response(&e),
    }
}

/// `DELETE /api/sessions/{id}`: stop if still active, then remove.
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    body: Option<Json<StopSessionRequest>>,
) -> Response {
    let actor = actor_from(&headers, query.token.as_deref());
    let req = body.map(|Json(b)| b).unwrap_or_default();
    match state
        .plane
        .stop_and_delete_session(&actor, &session_id, req.grace_ms, req.kill_after_ms)
        .await
    {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(e) => error_response(&e),
    }
}

/// `GET /api/sessions/{id}/events`
pub async fn get_session_events(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "events": state.plane.session_events(&session_id) }))
}

/// `GET /api/events/pending`: unresolved approvals, newest first.
pub async fn get_pending_events(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "events": state.plane.pending_approval_events() }))
}

fn actor_from(headers: &HeaderMap, query_token: Option<&str>) -> String {
    format!("ui:{}", extract_token(headers, query_token))
}

/// Map a core failure onto an HTTP response, preserving stable codes.
fn error_response(err: &anyhow::Error) -> Response {
    match err.downcast_ref::<ErrorKind>() {
        Some(kind) => kind.to_http_response(err.to_string()).into_response(),
        None => ErrorKind::InvalidAction
            .to_http_response(err.to_string())
            .into_response(),
    }
}
