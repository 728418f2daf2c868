// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The single wire frame shared by agent and subscriber transports.
//!
//! Bulk PTY bytes travel base64-encoded in `data_b64`; structured payloads
//! live in `data`. Both directions of both transports use this one shape.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// One framed wire message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub seq: u64,
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub ts_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data_b64: String,
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

impl Envelope {
    /// Build an envelope of the given type, stamped with the current time.
    pub fn new(kind: &str, server_id: &str, session_id: &str) -> Self {
        Self {
            kind: kind.to_owned(),
            server_id: server_id.to_owned(),
            session_id: session_id.to_owned(),
            ts_ms: crate::plane::now_ms(),
            ..Self::default()
        }
    }

    /// Attach a structured payload, replacing any prior `data`.
    ///
    /// Serialization of the payload types in this crate cannot fail; a
    /// `None` here would mean a programming error, and the frame goes out
    /// without a body rather than not at all.
    pub fn with_data<T: Serialize>(mut self, payload: &T) -> Self {
        self.data = serde_json::to_value(payload).ok();
        self
    }

    /// Decode the structured payload into `T`.
    pub fn parse_data<T: for<'de> Deserialize<'de>>(&self) -> Option<T> {
        let data = self.data.clone()?;
        serde_json::from_value(data).ok()
    }
}

/// Build an `error` envelope carrying a stable kind string.
pub fn error_envelope(kind: ErrorKind, session_id: &str) -> Envelope {
    Envelope::new("error", "", session_id)
        .with_data(&serde_json::json!({ "message": kind.as_str() }))
}

/// Build an `error` envelope with a free-form message.
pub fn error_message_envelope(message: &str, session_id: &str) -> Envelope {
    Envelope::new("error", "", session_id)
        .with_data(&serde_json::json!({ "message": message }))
}

/// Payload of `register_ok` (core → agent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterOk {
    pub heartbeat_interval_ms: u64,
    pub server_time_ms: i64,
}

/// Payload of `start_session` (core → agent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSessionPayload {
    pub cwd: String,
    pub cmd: Vec<String>,
    pub env: std::collections::BTreeMap<String, String>,
    pub cols: u16,
    pub rows: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resume_id: String,
}

/// Payload of `stop_session` (core → agent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopSessionPayload {
    pub grace_ms: i64,
    pub kill_after_ms: i64,
    pub signal: String,
}

/// Payload of `resize` (both directions).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResizePayload {
    pub cols: u16,
    pub rows: u16,
}

/// Payload of a subscriber `attach` envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct AttachPayload {
    pub session_id: String,
    /// Accepted for forward compatibility; replay below the ring window is a
    /// non-goal, so the snapshot always starts at the ring head.
    #[serde(default)]
    pub since_seq: u64,
}

/// Payload of `attach_ok` (core → subscriber).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachOk {
    pub session_id: String,
    pub latest_seq: u64,
}

/// Payload of an agent `error` envelope.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentErrorPayload {
    #[serde(default)]
    pub message: String,
}

/// Encode raw bytes for a `data_b64` field.
pub fn encode_b64(raw: &[u8]) -> String {
    if raw.is_empty() {
        return String::new();
    }
    base64::engine::general_purpose::STANDARD.encode(raw)
}

/// Decode a `data_b64` field; `None` on malformed input.
pub fn decode_b64(data: &str) -> Option<Vec<u8>> {
    base64::engine::general_purpose::STANDARD.decode(data).ok()
}

#[cfg(test)]
#[path = "proto_tests.rs"]
mod tests;
