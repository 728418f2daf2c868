// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent-side WebSocket adapter.
//!
//! An agent connection authenticates with the agent bearer token, sends
//! `register` as its first frame, receives `register_ok`, and then streams
//! `heartbeat` / `pty_out` / `pty_exit` / `error` envelopes. Outbound frames
//! are drained by a dedicated writer task so socket backpressure never
//! reaches the control plane.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{info, warn};

use crate::model::{AgentRegister, PtyExit};
use crate::plane::{now_ms, AgentHandle};
use crate::proto::{AgentErrorPayload, Envelope, RegisterOk};
use crate::transport::auth::{constant_time_eq, extract_token};
use crate::transport::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade for `/ws/agent`.
pub async fn agent_ws_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = extract_token(&headers, query.token.as_deref());
    if token.is_empty()
        || !constant_time_eq(&token, &state.agent_token)
        || !state.plane.rate_allow(&format!("agent:{token}"))
    {
        warn!("agent ws unauthorized");
        return axum::http::StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(move |socket| handle_agent(state, socket))
        .into_response()
}

/// Per-connection loop: register-first handshake, then envelope dispatch.
async fn handle_agent(state: Arc<AppState>, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // The first inbound frame must be `register`, or the connection drops.
    let Some(first) = read_envelope(&mut ws_rx).await else {
        warn!("agent ws closed before register");
        return;
    };
    if first.kind != "register" {
        warn!(kind = %first.kind, "agent ws first frame was not register");
        return;
    }
    let Some(reg) = first.parse_data::<AgentRegister>() else {
        warn!("agent ws bad register payload");
        return;
    };
    if reg.server_id.is_empty() {
        warn!("agent ws register missing server_id");
        return;
    }

    let (handle, mut agent_rx) = AgentHandle::channel();
    if let Err(kind) = state.plane.register_server(&reg, handle.clone()) {
        let env = crate::proto::error_envelope(kind, "");
        let _ = send_envelope(&mut ws_tx, &env).await;
        return;
    }
    info!(
        server_id = %reg.server_id,
        hostname = %reg.hostname,
        "agent registered"
    );

    // Writer task: the only socket writer for this connection.
    let writer = tokio::spawn(async move {
        while let Some(env) = agent_rx.recv().await {
            if send_envelope(&mut ws_tx, &env).await.is_err() {
                break;
            }
        }
    });

    let ack = Envelope::new("register_ok", &reg.server_id, "").with_data(&RegisterOk {
        heartbeat_interval_ms: state.plane.config().heartbeat_interval_ms,
        server_time_ms: now_ms(),
    });
    let _ = handle.send(ack).await;

    while let Some(env) = read_envelope(&mut ws_rx).await {
        match env.kind.as_str() {
            "heartbeat" => state.plane.touch_server(&reg.server_id),
            "pty_out" => {
                state
                    .plane
                    .handle_pty_out(&reg.server_id, &env.session_id, env.seq, &env.data_b64);
            }
            "pty_exit" => {
                let exit = env.parse_data::<PtyExit>().unwrap_or_default();
                state.plane.handle_pty_exit(&reg.server_id, &env.session_id, &exit);
            }
            "error" => {
                let payload = env.parse_data::<AgentErrorPayload>().unwrap_or_default();
                let message = if payload.message.is_empty() {
                    env.data.as_ref().map(|d| d.to_string()).unwrap_or_default()
                } else {
                    payload.message
                };
                state.plane.handle_agent_error(&reg.server_id, &env.session_id, &message);
            }
            _ => {}
        }
    }

    info!(server_id = %reg.server_id, "agent ws disconnected");
    state.plane.remove_agent(&reg.server_id);
    writer.abort();
}

/// Read the next text frame and decode it as an envelope. `None` on close,
/// transport error, or undecodable frame from a peer that must speak the
/// protocol from its first byte.
async fn read_envelope(rx: &mut SplitStream<WebSocket>) -> Option<Envelope> {
    loop {
        let msg = rx.next().await?.ok()?;
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).ok(),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}

async fn send_envelope(
    tx: &mut SplitSink<WebSocket, Message>,
    env: &Envelope,
) -> Result<(), ()> {
    let text = serde_json::to_string(env).map_err(|_| ())?;
    tx.send(Message::Text(text.into())).await.map_err(|_| ())
}
