// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Core records: servers, sessions, and session events.
//!
//! Everything here serializes directly onto the wire (list endpoints and
//! `session_update` payloads), so field names are part of the contract.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Starting,
    Running,
    Stopping,
    Exited,
    Error,
}

impl SessionStatus {
    /// `exited` and `error` accept no further work.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exited | Self::Error)
    }
}

/// A registered remote host agent, last-known metadata retained across
/// disconnects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub server_id: String,
    pub hostname: String,
    pub tags: Vec<String>,
    pub os: String,
    pub arch: String,
    pub agent_version: String,
    pub last_seen_ms: i64,
    pub status: ServerStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_roots: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub claude_path: String,
}

/// A supervised PTY lifecycle on one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub server_id: String,
    pub cwd: String,
    pub cmd: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resume_id: String,
    pub env_keys: Vec<String>,
    pub status: SessionStatus,
    pub created_by: String,
    pub created_at_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub exit_reason: String,
    pub awaiting_approval: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pending_event_id: String,
    pub latest_agent_out_seq: u64,
}

/// A control-plane-minted session event. Currently the only kind is
/// `approval_needed`; the record is mutated once, to mark resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub event_id: String,
    pub session_id: String,
    pub server_id: String,
    pub kind: String,
    #[serde(rename = "prompt_excerpt", default, skip_serializing_if = "String::is_empty")]
    pub prompt_text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub actor: String,
    pub ts_ms: i64,
    pub resolved: bool,
}

/// Body of `POST /api/sessions`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartSessionRequest {
    pub server_id: String,
    pub cwd: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resume_id: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub cols: u16,
    #[serde(default)]
    pub rows: u16,
}

/// Body of `POST /api/sessions/{id}/stop` and `DELETE /api/sessions/{id}`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StopSessionRequest {
    #[serde(default)]
    pub grace_ms: i64,
    #[serde(default)]
    pub kill_after_ms: i64,
}

/// Payload of a subscriber `action` envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionRequest {
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub event_id: String,
}

/// Payload of the first (`register`) frame on an agent connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRegister {
    pub server_id: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub arch: String,
    #[serde(default)]
    pub agent_version: String,
    #[serde(default)]
    pub allow_roots: Vec<String>,
    #[serde(default)]
    pub claude_path: String,
}

/// Payload of an agent `pty_exit` envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PtyExit {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signal: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}
