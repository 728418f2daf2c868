// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent-facing control-plane operations: registration, liveness, and the
//! inbound PTY stream (`pty_out` / `pty_exit` / `error`).

use tracing::{debug, warn};
use uuid::Uuid;

use crate::audit::AuditEvent;
use crate::error::ErrorKind;
use crate::model::{AgentRegister, PtyExit, Server, ServerStatus, SessionEvent, SessionStatus};
use crate::proto::{decode_b64, encode_b64, Envelope};

use super::{now_ms, AgentHandle, ApprovalBroadcast, ControlPlane};

impl ControlPlane {
    /// Install an agent transport and upsert its server record.
    ///
    /// A second live transport claiming the same `server_id` is rejected;
    /// the record is only replaced once the first transport is gone.
    pub fn register_server(
        &self,
        reg: &AgentRegister,
        conn: AgentHandle,
    ) -> Result<(), ErrorKind> {
        let now = now_ms();
        {
            let mut state = self.state.write();
            if state.agent_conns.contains_key(&reg.server_id) {
                return Err(ErrorKind::DuplicateServer);
            }
            state.servers.insert(
                reg.server_id.clone(),
                Server {
                    server_id: reg.server_id.clone(),
                    hostname: reg.hostname.clone(),
                    tags: reg.tags.clone(),
                    os: reg.os.clone(),
                    arch: reg.arch.clone(),
                    agent_version: reg.agent_version.clone(),
                    last_seen_ms: now,
                    status: ServerStatus::Online,
                    allow_roots: reg.allow_roots.clone(),
                    claude_path: reg.claude_path.clone(),
                },
            );
            state.agent_conns.insert(reg.server_id.clone(), conn);
        }
        self.audit_log(AuditEvent {
            actor: format!("agent:{}", reg.server_id),
            server_id: reg.server_id.clone(),
            kind: "register".to_owned(),
            ..AuditEvent::default()
        });
        Ok(())
    }

    /// Heartbeat: bump `last_seen_ms` and flip the server online.
    pub fn touch_server(&self, server_id: &str) {
        let mut state = self.state.write();
        if let Some(server) = state.servers.get_mut(server_id) {
            server.last_seen_ms = now_ms();
            server.status = ServerStatus::Online;
        }
    }

    /// Drop the agent transport and mark the server offline.
    ///
    /// Sessions owned by the server keep their last status; subsequent
    /// operations against them fail with `server_offline`.
    pub fn remove_agent(&self, server_id: &str) {
        {
            let mut state = self.state.write();
            state.agent_conns.remove(server_id);
            if let Some(server) = state.servers.get_mut(server_id) {
                server.status = ServerStatus::Offline;
            }
        }
        self.audit_log(AuditEvent {
            actor: format!("agent:{server_id}"),
            server_id: server_id.to_owned(),
            kind: "agent_disconnected".to_owned(),
            ..AuditEvent::default()
        });
    }

    /// Inbound PTY output: dedup by sequence, advance the session state
    /// machine, append to the ring, capture resume ids, fan out, and feed
    /// the prompt detector.
    pub fn handle_pty_out(&self, server_id: &str, session_id: &str, seq: u64, data_b64: &str) {
        let Some(raw) = decode_b64(data_b64) else {
            return;
        };

        let mut became_running = false;
        let mut resume_changed = false;
        let awaiting;
        {
            let mut state = self.state.write();
            let Some(sess) = state.sessions.get_mut(session_id) else {
                return;
            };
            if sess.server_id != server_id {
                return;
            }
            // seq 0 means "unnumbered" and is always accepted.
            if seq > 0 && seq <= sess.latest_agent_out_seq {
                return;
            }
            if seq > sess.latest_agent_out_seq {
                sess.latest_agent_out_seq = seq;
            }
            if sess.status == SessionStatus::Starting {
                sess.status = SessionStatus::Running;
                became_running = true;
            }
            awaiting = sess.awaiting_approval;

            if let Some(id) = self.resume.feed(session_id, &raw) {
                if sess.resume_id != id {
                    debug!(session_id, resume_id = %id, "captured resume id");
                    sess.resume_id = id;
                    resume_changed = true;
                }
            }

            if let Some(hub) = state.hubs.get(session_id) {
                hub.ring.append(&raw);
            }
        }

        let mut out = Envelope::new("term_out", server_id, session_id);
        out.seq = seq;
        out.data_b64 = data_b64.to_owned();
        self.broadcast_to_attached(session_id, &out);

        if became_running || resume_changed {
            self.broadcast_session_update(session_id);
        }

        // A pending approval freezes detection until the operator responds.
        if awaiting || !self.config().prompt_detection {
            return;
        }
        if let Some(excerpt) = self.detector.feed(session_id, &raw) {
            self.create_approval_event(session_id, server_id, excerpt);
        }
    }

    /// Raise an `approval_needed` event, at most one pending per session.
    fn create_approval_event(&self, session_id: &str, server_id: &str, excerpt: String) {
        let event = {
            let mut state = self.state.write();
            let Some(sess) = state.sessions.get_mut(session_id) else {
                return;
            };
            if sess.awaiting_approval {
                return;
            }
            let event_id = Uuid::new_v4().to_string();
            sess.awaiting_approval = true;
            sess.pending_event_id = event_id.clone();
            let event = SessionEvent {
                event_id,
                session_id: session_id.to_owned(),
                server_id: server_id.to_owned(),
                kind: "approval_needed".to_owned(),
                prompt_text: excerpt,
                actor: String::new(),
                ts_ms: now_ms(),
                resolved: false,
            };
            state
                .session_events
                .entry(session_id.to_owned())
                .or_default()
                .push(event.clone());
            event
        };

        // Drop the rolling buffer so the same prompt text cannot re-trigger.
        self.detector.clear(session_id);

        let env = Envelope::new("event", server_id, session_id).with_data(&event);
        match self.config().approval_broadcast {
            ApprovalBroadcast::Attached => self.broadcast_to_attached(session_id, &env),
            ApprovalBroadcast::All => self.broadcast_to_all(&env),
        }
        self.broadcast_session_update(session_id);
        self.audit_log(AuditEvent {
            actor: "system".to_owned(),
            server_id: server_id.to_owned(),
            session_id: session_id.to_owned(),
            kind: "approval_needed".to_owned(),
            meta: Some(serde_json::json!({ "event_id": event.event_id })),
            ..AuditEvent::default()
        });
    }

    /// The agent's PTY exited: record the exit, clear approval state, and
    /// drop both detector buffers.
    pub fn handle_pty_exit(&self, server_id: &str, session_id: &str, exit: &PtyExit) {
        {
            let mut state = self.state.write();
            let Some(sess) = state.sessions.get_mut(session_id) else {
                return;
            };
            if sess.status.is_terminal() {
                return;
            }
            sess.status = SessionStatus::Exited;
            sess.exit_code = exit.exit_code;
            sess.exit_reason = exit.reason.clone();
            sess.awaiting_approval = false;
            let pending = std::mem::take(&mut sess.pending_event_id);
            if !pending.is_empty() {
                // Resolve the orphaned approval so no dead session lingers in
                // the pending list.
                if let Some(events) = state.session_events.get_mut(session_id) {
                    if let Some(ev) = events.iter_mut().rev().find(|e| e.event_id == pending) {
                        ev.resolved = true;
                        ev.actor = "system".to_owned();
                    }
                }
            }
        }

        self.detector.clear(session_id);
        self.resume.clear(session_id);
        self.broadcast_session_update(session_id);
        self.audit_log(AuditEvent {
            actor: format!("agent:{server_id}"),
            server_id: server_id.to_owned(),
            session_id: session_id.to_owned(),
            kind: "session_exit".to_owned(),
            meta: Some(serde_json::json!({
                "exit_code": exit.exit_code,
                "signal": exit.signal,
                "reason": exit.reason,
            })),
            ..AuditEvent::default()
        });
    }

    /// An agent-side error for a session.
    ///
    /// Terminal sessions are untouched. A `"session not found"` against a
    /// `starting` session is a startup race (a resize beat the spawn) and is
    /// suppressed. Everything else moves the session to `error` and surfaces
    /// a bracketed note on the terminal stream.
    pub fn handle_agent_error(&self, server_id: &str, session_id: &str, message: &str) {
        let note;
        let latest;
        {
            let mut state = self.state.write();
            let Some(sess) = state.sessions.get_mut(session_id) else {
                return;
            };
            if sess.status.is_terminal() {
                return;
            }
            if sess.status == SessionStatus::Starting && message == "session not found" {
                return;
            }
            warn!(server_id, session_id, message, "agent error");
            sess.status = SessionStatus::Error;
            sess.exit_reason = message.to_owned();
            latest = sess.latest_agent_out_seq;
            note = format!("\r\n[agent error] {message}\r\n");
            if let Some(hub) = state.hubs.get(session_id) {
                hub.ring.append(note.as_bytes());
            }
        }

        self.detector.clear(session_id);
        self.resume.clear(session_id);

        let mut out = Envelope::new("term_out", server_id, session_id);
        out.seq = latest;
        out.data_b64 = encode_b64(note.as_bytes());
        self.broadcast_to_attached(session_id, &out);
        self.broadcast_session_update(session_id);
        self.audit_log(AuditEvent {
            actor: format!("agent:{server_id}"),
            server_id: server_id.to_owned(),
            session_id: session_id.to_owned(),
            kind: "agent_error".to_owned(),
            meta: Some(serde_json::json!({ "message": message })),
            ..AuditEvent::default()
        });
    }
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
