// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::transport::{AppState, ErrorBody, ErrorResponse};

/// Constant-time string comparison to prevent timing side-channel attacks.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Extract a bearer token from the `Authorization` header, falling back to
/// the `token` query parameter (used by WebSocket clients that cannot set
/// headers).
pub fn extract_token(headers: &HeaderMap, query: Option<&str>) -> String {
    let header_token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .and_then(|v| {
            if v.len() >= 7 && v[..7].eq_ignore_ascii_case("bearer ") {
                Some(v[7..].trim())
            } else {
                None
            }
        });
    match header_token {
        Some(tok) if !tok.is_empty() => tok.to_owned(),
        _ => query.unwrap_or_default().trim().to_owned(),
    }
}

/// Axum middleware enforcing the UI bearer token and rate limit on the
/// `/api/*` surface. Health and the WebSocket upgrades are exempt; the WS
/// handlers run their own token checks.
pub async fn auth_layer(
    State(state): State<Arc<AppState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if path == "/api/healthz" || path == "/ws/agent" || path == "/ws/client" {
        return next.run(req).await;
    }

    let query_token = req.uri().query().and_then(token_from_query);
    let token = extract_token(req.headers(), query_token.as_deref());
    if token.is_empty()
        || !constant_time_eq(&token, &state.ui_token)
        || !state.plane.rate_allow(&format!("ui:{token}"))
    {
        let body = ErrorResponse {
            error: ErrorBody {
                code: "unauthorized".to_owned(),
                message: "unauthorized".to_owned(),
            },
        };
        return (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response();
    }

    next.run(req).await
}

/// Pull `token=` out of a raw query string.
pub fn token_from_query(query: &str) -> Option<String> {
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .map(str::to_owned)
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
