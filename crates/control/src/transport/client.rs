// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subscriber-side WebSocket adapter.
//!
//! A subscriber authenticates with the UI bearer token, gets any pending
//! approval events replayed, and may then `attach`, send `term_in`,
//! `action`, and `resize` envelopes. Failures come back as `error`
//! envelopes on the same connection; the connection stays open.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::model::ActionRequest;
use crate::plane::{Subscriber, SUBSCRIBER_SEND_BUFFER};
use crate::proto::{
    encode_b64, error_envelope, error_message_envelope, AttachOk, AttachPayload, Envelope,
    ResizePayload,
};
use crate::transport::agent::WsQuery;
use crate::transport::auth::{constant_time_eq, extract_token};
use crate::transport::AppState;

/// WebSocket upgrade for `/ws/client`.
pub async fn client_ws_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = extract_token(&headers, query.token.as_deref());
    if token.is_empty()
        || !constant_time_eq(&token, &state.ui_token)
        || !state.plane.rate_allow(&format!("ui:{token}"))
    {
        return axum::http::StatusCode::UNAUTHORIZED.into_response();
    }
    let actor = format!("ui:{token}");
    ws.on_upgrade(move |socket| handle_client(state, socket, actor))
        .into_response()
}

async fn handle_client(state: Arc<AppState>, socket: WebSocket, actor: String) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let subscriber_id = Uuid::new_v4().to_string();

    let (tx, mut rx) = mpsc::channel::<Envelope>(SUBSCRIBER_SEND_BUFFER);
    state
        .plane
        .register_subscriber(Subscriber::new(subscriber_id.clone(), actor.clone(), tx.clone()));

    // Writer task: drains the bounded subscriber queue onto the socket.
    let writer = tokio::spawn(async move {
        while let Some(env) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&env) else {
                continue;
            };
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Replay unresolved approvals so a reconnecting operator sees what is
    // still blocked.
    for event in state.plane.pending_approval_events() {
        let env = Envelope::new("event", &event.server_id, &event.session_id).with_data(&event);
        if tx.try_send(env).is_err() {
            debug!(%subscriber_id, "pending replay dropped: queue full");
            break;
        }
    }

    while let Some(Ok(msg)) = ws_rx.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(env) = serde_json::from_str::<Envelope>(&text) else {
            enqueue(&tx, error_message_envelope("invalid envelope", ""));
            continue;
        };
        dispatch(&state, &subscriber_id, &actor, &tx, env).await;
    }

    state.plane.unregister_subscriber(&subscriber_id);
    writer.abort();
    debug!(%subscriber_id, "subscriber disconnected");
}

/// Handle one inbound subscriber envelope.
async fn dispatch(
    state: &AppState,
    subscriber_id: &str,
    actor: &str,
    tx: &mpsc::Sender<Envelope>,
    env: Envelope,
) {
    match env.kind.as_str() {
        "attach" => {
            let payload = env.parse_data::<AttachPayload>();
            let Some(payload) = payload.filter(|p| !p.session_id.is_empty()) else {
                enqueue(tx, error_envelope(ErrorKind::BadAttachPayload, &env.session_id));
                return;
            };
            match state.plane.attach_subscriber(subscriber_id, &payload.session_id) {
                Ok((snapshot, latest)) => {
                    let ack = Envelope::new("attach_ok", "", &payload.session_id).with_data(
                        &AttachOk { session_id: payload.session_id.clone(), latest_seq: latest },
                    );
                    enqueue(tx, ack);
                    if !snapshot.is_empty() {
                        let mut out = Envelope::new("term_out", "", &payload.session_id);
                        out.seq = latest;
                        out.data_b64 = encode_b64(&snapshot);
                        enqueue(tx, out);
                    }
                }
                Err(kind) => enqueue(tx, error_envelope(kind, &payload.session_id)),
            }
        }
        "term_in" => {
            let Some(session_id) = resolve_session(state, subscriber_id, &env, tx) else {
                return;
            };
            if let Err(e) = state.plane.handle_client_term_in(actor, &session_id, &env.data_b64).await
            {
                enqueue(tx, envelope_for_error(&e, &session_id));
            }
        }
        "action" => {
            let Some(req) = env.parse_data::<ActionRequest>() else {
                enqueue(tx, error_envelope(ErrorKind::BadActionPayload, &env.session_id));
                return;
            };
            let Some(session_id) = resolve_session(state, subscriber_id, &env, tx) else {
                return;
            };
            if let Err(e) = state.plane.handle_client_action(actor, &session_id, &req).await {
                enqueue(tx, envelope_for_error(&e, &session_id));
            }
        }
        "resize" => {
            let Some(payload) = env.parse_data::<ResizePayload>() else {
                enqueue(tx, error_envelope(ErrorKind::BadResizePayload, &env.session_id));
                return;
            };
            let Some(session_id) = resolve_session(state, subscriber_id, &env, tx) else {
                return;
            };
            if let Err(e) = state
                .plane
                .handle_client_resize(actor, &session_id, payload.cols, payload.rows)
                .await
            {
                enqueue(tx, envelope_for_error(&e, &session_id));
            }
        }
        other => {
            warn!(kind = other, "unknown subscriber envelope type");
            enqueue(tx, error_envelope(ErrorKind::UnknownType, &env.session_id));
        }
    }
}

/// The target session: explicit on the envelope, else the attached one.
fn resolve_session(
    state: &AppState,
    subscriber_id: &str,
    env: &Envelope,
    tx: &mpsc::Sender<Envelope>,
) -> Option<String> {
    if !env.session_id.is_empty() {
        return Some(env.session_id.clone());
    }
    match state.plane.attached_session(subscriber_id) {
        Some(sid) => Some(sid),
        None => {
            enqueue(tx, error_envelope(ErrorKind::NoAttachedSession, ""));
            None
        }
    }
}

/// Direct reply to this subscriber; a full queue drops the frame and the
/// operator reconciles via reattach.
fn enqueue(tx: &mpsc::Sender<Envelope>, env: Envelope) {
    if tx.try_send(env).is_err() {
        debug!("subscriber reply dropped: {}", ErrorKind::SendQueueFull);
    }
}

/// Map a core failure onto an `error` envelope, preserving stable kinds.
fn envelope_for_error(err: &anyhow::Error, session_id: &str) -> Envelope {
    match err.downcast_ref::<ErrorKind>() {
        Some(kind) => error_envelope(*kind, session_id),
        None => error_message_envelope(&err.to_string(), session_id),
    }
}
