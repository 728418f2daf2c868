// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subscriber-facing control-plane operations: attach/detach, session
//! lifecycle, terminal input, approval actions, and resize.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::audit::AuditEvent;
use crate::error::ErrorKind;
use crate::model::{
    ActionRequest, ServerStatus, Session, SessionStatus, StartSessionRequest,
};
use crate::proto::{
    decode_b64, encode_b64, Envelope, ResizePayload, StartSessionPayload, StopSessionPayload,
};

use super::{now_ms, AgentHandle, ControlPlane, SessionHub, Subscriber};

impl ControlPlane {
    // -- subscribers ------------------------------------------------------

    pub fn register_subscriber(&self, sub: Subscriber) {
        self.state.write().subscribers.insert(sub.id.clone(), sub);
    }

    pub fn unregister_subscriber(&self, subscriber_id: &str) {
        let mut state = self.state.write();
        let Some(sub) = state.subscribers.remove(subscriber_id) else {
            return;
        };
        if let Some(ref session_id) = sub.attached {
            if let Some(hub) = state.hubs.get_mut(session_id) {
                hub.subscribers.remove(subscriber_id);
            }
        }
    }

    /// Attach a subscriber to a session, detaching it from any prior hub.
    ///
    /// Returns the ring snapshot and the session's latest output sequence;
    /// the transport emits `attach_ok` followed by one synthetic `term_out`
    /// carrying the snapshot.
    pub fn attach_subscriber(
        &self,
        subscriber_id: &str,
        session_id: &str,
    ) -> Result<(Vec<u8>, u64), ErrorKind> {
        let mut state = self.state.write();
        let Some(latest) = state.sessions.get(session_id).map(|s| s.latest_agent_out_seq)
        else {
            return Err(ErrorKind::SessionNotFound);
        };
        if !state.subscribers.contains_key(subscriber_id) {
            return Err(ErrorKind::NoAttachedSession);
        }

        let prior = state
            .subscribers
            .get(subscriber_id)
            .and_then(|s| s.attached.clone());
        if let Some(ref old) = prior {
            if let Some(hub) = state.hubs.get_mut(old) {
                hub.subscribers.remove(subscriber_id);
            }
        }

        let ring_bytes = self.config().ring_buffer_bytes;
        let hub = state
            .hubs
            .entry(session_id.to_owned())
            .or_insert_with(|| SessionHub::new(ring_bytes));
        hub.subscribers.insert(subscriber_id.to_owned());
        let snapshot = hub.ring.snapshot();

        if let Some(sub) = state.subscribers.get_mut(subscriber_id) {
            sub.attached = Some(session_id.to_owned());
        }
        Ok((snapshot, latest))
    }

    /// The session a subscriber is currently attached to, if any.
    pub fn attached_session(&self, subscriber_id: &str) -> Option<String> {
        self.state
            .read()
            .subscribers
            .get(subscriber_id)
            .and_then(|s| s.attached.clone())
    }

    // -- session lifecycle ------------------------------------------------

    /// Create a session on an online server and instruct its agent to start
    /// the assistant process.
    pub async fn create_session(
        &self,
        actor: &str,
        req: &StartSessionRequest,
    ) -> anyhow::Result<Session> {
        if req.server_id.is_empty() || req.cwd.is_empty() {
            anyhow::bail!("server_id and cwd are required");
        }

        let (session, conn) = {
            let mut state = self.state.write();
            let online = state
                .servers
                .get(&req.server_id)
                .is_some_and(|s| s.status == ServerStatus::Online);
            let Some(conn) = state.agent_conns.get(&req.server_id).cloned() else {
                return Err(ErrorKind::ServerOffline.into());
            };
            if !online {
                return Err(ErrorKind::ServerOffline.into());
            }

            let claude_path = state
                .servers
                .get(&req.server_id)
                .map(|s| s.claude_path.clone())
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| "claude".to_owned());
            let mut cmd = vec![claude_path];
            if !req.resume_id.is_empty() {
                cmd.push("--resume".to_owned());
                cmd.push(req.resume_id.clone());
            }

            let session = Session {
                session_id: Uuid::new_v4().to_string(),
                server_id: req.server_id.clone(),
                cwd: req.cwd.clone(),
                cmd,
                resume_id: req.resume_id.clone(),
                env_keys: req.env.keys().cloned().collect(),
                status: SessionStatus::Starting,
                created_by: actor.to_owned(),
                created_at_ms: now_ms(),
                exit_code: None,
                exit_reason: String::new(),
                awaiting_approval: false,
                pending_event_id: String::new(),
                latest_agent_out_seq: 0,
            };
            state.sessions.insert(session.session_id.clone(), session.clone());
            state.hubs.insert(
                session.session_id.clone(),
                SessionHub::new(self.config().ring_buffer_bytes),
            );
            (session, conn)
        };

        let payload = StartSessionPayload {
            cwd: req.cwd.clone(),
            cmd: session.cmd.clone(),
            env: req.env.clone(),
            cols: req.cols,
            rows: req.rows,
            resume_id: req.resume_id.clone(),
        };
        let env = Envelope::new("start_session", &req.server_id, &session.session_id)
            .with_data(&payload);
        if self.send_to_agent(&conn, env).await.is_err() {
            {
                let mut state = self.state.write();
                if let Some(sess) = state.sessions.get_mut(&session.session_id) {
                    sess.status = SessionStatus::Error;
                    sess.exit_reason = ErrorKind::StartSessionSendFailed.as_str().to_owned();
                }
            }
            self.broadcast_session_update(&session.session_id);
            return Err(ErrorKind::StartSessionSendFailed.into());
        }

        self.audit_log(AuditEvent {
            actor: actor.to_owned(),
            server_id: req.server_id.clone(),
            session_id: session.session_id.clone(),
            kind: "create_session".to_owned(),
            meta: Some(serde_json::json!({ "cwd": req.cwd })),
            ..AuditEvent::default()
        });
        Ok(session)
    }

    /// Request a graceful stop; non-positive durations take the defaults.
    pub async fn stop_session(
        &self,
        actor: &str,
        session_id: &str,
        grace_ms: i64,
        kill_after_ms: i64,
    ) -> anyhow::Result<()> {
        let (server_id, conn) = {
            let mut state = self.state.write();
            let Some(sess) = state.sessions.get(session_id) else {
                return Err(ErrorKind::SessionNotFound.into());
            };
            let server_id = sess.server_id.clone();
            let Some(conn) = state.agent_conns.get(&server_id).cloned() else {
                return Err(ErrorKind::ServerOffline.into());
            };
            if let Some(sess) = state.sessions.get_mut(session_id) {
                sess.status = SessionStatus::Stopping;
            }
            (server_id, conn)
        };

        let grace_ms = if grace_ms > 0 { grace_ms } else { self.config().default_grace_ms };
        let kill_after_ms =
            if kill_after_ms > 0 { kill_after_ms } else { self.config().default_kill_ms };

        let env = Envelope::new("stop_session", &server_id, session_id).with_data(
            &StopSessionPayload { grace_ms, kill_after_ms, signal: "SIGTERM".to_owned() },
        );
        self.send_to_agent(&conn, env).await?;

        self.audit_log(AuditEvent {
            actor: actor.to_owned(),
            server_id,
            session_id: session_id.to_owned(),
            kind: "stop_session".to_owned(),
            meta: Some(serde_json::json!({
                "grace_ms": grace_ms,
                "kill_after_ms": kill_after_ms,
            })),
            ..AuditEvent::default()
        });
        self.broadcast_session_update(session_id);
        Ok(())
    }

    /// Remove an exited or errored session and all of its artifacts.
    pub fn delete_session(&self, actor: &str, session_id: &str) -> anyhow::Result<()> {
        {
            let mut state = self.state.write();
            let Some(sess) = state.sessions.get(session_id) else {
                return Err(ErrorKind::SessionNotFound.into());
            };
            if !sess.status.is_terminal() {
                return Err(ErrorKind::SessionActive.into());
            }
            self.remove_session_artifacts(&mut state, session_id);
        }
        self.detector.clear(session_id);
        self.resume.clear(session_id);
        self.audit_log(AuditEvent {
            actor: actor.to_owned(),
            session_id: session_id.to_owned(),
            kind: "delete_session".to_owned(),
            ..AuditEvent::default()
        });
        Ok(())
    }

    /// Stop an active session (best effort), then remove its artifacts.
    pub async fn stop_and_delete_session(
        &self,
        actor: &str,
        session_id: &str,
        grace_ms: i64,
        kill_after_ms: i64,
    ) -> anyhow::Result<()> {
        let active = {
            let state = self.state.read();
            let Some(sess) = state.sessions.get(session_id) else {
                return Err(ErrorKind::SessionNotFound.into());
            };
            !sess.status.is_terminal()
        };
        if active {
            // The agent may be offline; deletion proceeds regardless.
            if let Err(e) = self.stop_session(actor, session_id, grace_ms, kill_after_ms).await {
                tracing::debug!(session_id, "stop before delete failed: {e}");
            }
        }

        {
            let mut state = self.state.write();
            if !state.sessions.contains_key(session_id) {
                return Err(ErrorKind::SessionNotFound.into());
            }
            self.remove_session_artifacts(&mut state, session_id);
        }
        self.detector.clear(session_id);
        self.resume.clear(session_id);
        self.audit_log(AuditEvent {
            actor: actor.to_owned(),
            session_id: session_id.to_owned(),
            kind: "delete_session".to_owned(),
            meta: Some(serde_json::json!({ "stopped": active })),
            ..AuditEvent::default()
        });
        Ok(())
    }

    fn remove_session_artifacts(&self, state: &mut super::PlaneState, session_id: &str) {
        state.sessions.remove(session_id);
        state.session_events.remove(session_id);
        if let Some(hub) = state.hubs.remove(session_id) {
            for sub_id in hub.subscribers {
                if let Some(sub) = state.subscribers.get_mut(&sub_id) {
                    sub.attached = None;
                }
            }
        }
    }

    // -- terminal input and actions ---------------------------------------

    /// Route operator keystrokes to the owning agent as `pty_in`.
    ///
    /// The audit trail records the size and SHA-256 of the input, never the
    /// bytes themselves.
    pub async fn handle_client_term_in(
        &self,
        actor: &str,
        session_id: &str,
        data_b64: &str,
    ) -> anyhow::Result<()> {
        let (server_id, conn) = {
            let state = self.state.read();
            let Some(sess) = state.sessions.get(session_id) else {
                return Err(ErrorKind::SessionNotFound.into());
            };
            let Some(conn) = state.agent_conns.get(&sess.server_id).cloned() else {
                return Err(ErrorKind::ServerOffline.into());
            };
            (sess.server_id.clone(), conn)
        };

        let mut env = Envelope::new("pty_in", &server_id, session_id);
        env.data_b64 = data_b64.to_owned();
        self.send_to_agent(&conn, env).await?;

        let raw = decode_b64(data_b64).unwrap_or_default();
        let sha = hex_digest(&raw);
        self.audit_log(AuditEvent {
            actor: actor.to_owned(),
            server_id,
            session_id: session_id.to_owned(),
            kind: "term_in".to_owned(),
            meta: Some(serde_json::json!({ "size": raw.len(), "sha": sha })),
            ..AuditEvent::default()
        });
        Ok(())
    }

    /// Resolve an operator action: `approve`, `reject`, or `stop`.
    ///
    /// The *current* `pending_event_id` is authoritative even when the
    /// client submits a stale `event_id` (operators reconnect and race the
    /// stream). The audit record keeps both ids.
    pub async fn handle_client_action(
        &self,
        actor: &str,
        session_id: &str,
        req: &ActionRequest,
    ) -> anyhow::Result<()> {
        match req.kind.as_str() {
            "approve" | "reject" => {}
            "stop" => return self.stop_session(actor, session_id, 0, 0).await,
            _ => return Err(ErrorKind::InvalidAction.into()),
        }
        let approve = req.kind == "approve";

        let (event_id, excerpt) = {
            let mut state = self.state.write();
            let Some(sess) = state.sessions.get_mut(session_id) else {
                return Err(ErrorKind::SessionNotFound.into());
            };
            if !sess.awaiting_approval {
                return Err(ErrorKind::NoPendingApproval.into());
            }
            let event_id = std::mem::take(&mut sess.pending_event_id);
            sess.awaiting_approval = false;

            let mut excerpt = String::new();
            if let Some(events) = state.session_events.get_mut(session_id) {
                if let Some(ev) = events.iter_mut().rev().find(|e| e.event_id == event_id) {
                    ev.resolved = true;
                    ev.actor = actor.to_owned();
                    excerpt = ev.prompt_text.clone();
                }
            }
            (event_id, excerpt)
        };

        // Menu prompts take Enter/Escape; plain y/n prompts take keystrokes.
        let input: &[u8] = if looks_like_menu(&excerpt) {
            if approve {
                b"\r"
            } else {
                b"\x1b"
            }
        } else if approve {
            b"y\n"
        } else {
            b"n\n"
        };
        self.handle_client_term_in(actor, session_id, &encode_b64(input)).await?;

        self.broadcast_session_update(session_id);
        self.audit_log(AuditEvent {
            actor: actor.to_owned(),
            session_id: session_id.to_owned(),
            kind: format!("action_{}", req.kind),
            meta: Some(serde_json::json!({
                "event_id": event_id,
                "requested_event_id": req.event_id,
            })),
            ..AuditEvent::default()
        });
        Ok(())
    }

    /// Forward a terminal resize to the owning agent.
    pub async fn handle_client_resize(
        &self,
        actor: &str,
        session_id: &str,
        cols: u16,
        rows: u16,
    ) -> anyhow::Result<()> {
        let (server_id, conn) = {
            let state = self.state.read();
            let Some(sess) = state.sessions.get(session_id) else {
                return Err(ErrorKind::SessionNotFound.into());
            };
            let Some(conn) = state.agent_conns.get(&sess.server_id).cloned() else {
                return Err(ErrorKind::ServerOffline.into());
            };
            (sess.server_id.clone(), conn)
        };

        let env = Envelope::new("resize", &server_id, session_id)
            .with_data(&ResizePayload { cols, rows });
        self.send_to_agent(&conn, env).await?;

        self.audit_log(AuditEvent {
            actor: actor.to_owned(),
            server_id,
            session_id: session_id.to_owned(),
            kind: "resize".to_owned(),
            meta: Some(serde_json::json!({ "cols": cols, "rows": rows })),
            ..AuditEvent::default()
        });
        Ok(())
    }

    async fn send_to_agent(&self, conn: &AgentHandle, env: Envelope) -> Result<(), ErrorKind> {
        conn.send(env).await
    }
}

/// Classify a prompt excerpt as a menu prompt (Enter/Escape keyboard
/// contract) rather than a plain y/n prompt.
pub fn looks_like_menu(excerpt: &str) -> bool {
    let lower = excerpt.to_lowercase();
    let text = lower.split_whitespace().collect::<Vec<_>>().join(" ");

    if text.contains("esc to cancel") && text.contains("tab to amend") {
        return true;
    }
    if text.contains("do you want to")
        && (text.contains("1. yes") || text.contains("1) yes"))
        && (text.contains("2. ")
            || text.contains("2) ")
            || text.contains("3. no")
            || text.contains("3) no"))
    {
        return true;
    }
    text.contains("always allow access") && text.contains("from this project")
}

fn hex_digest(raw: &[u8]) -> String {
    let digest = Sha256::digest(raw);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
