// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error codes surfaced in `error` envelopes and HTTP responses.
///
/// The string forms are part of the wire contract (operator UIs switch on
/// them), so variants are renamed, never reworded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SessionNotFound,
    ServerOffline,
    DuplicateServer,
    StartSessionSendFailed,
    NoPendingApproval,
    InvalidAction,
    SendQueueFull,
    BadAttachPayload,
    BadActionPayload,
    BadResizePayload,
    UnknownType,
    NoAttachedSession,
    SessionActive,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionNotFound => "session_not_found",
            Self::ServerOffline => "server_offline",
            Self::DuplicateServer => "duplicate_server",
            Self::StartSessionSendFailed => "start_session_send_failed",
            Self::NoPendingApproval => "no_pending_approval",
            Self::InvalidAction => "invalid_action",
            Self::SendQueueFull => "send_queue_full",
            Self::BadAttachPayload => "bad_attach_payload",
            Self::BadActionPayload => "bad_action_payload",
            Self::BadResizePayload => "bad_resize_payload",
            Self::UnknownType => "unknown_type",
            Self::NoAttachedSession => "no_attached_session",
            Self::SessionActive => "session_active",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::SessionNotFound => 404,
            Self::ServerOffline => 503,
            Self::DuplicateServer => 409,
            Self::StartSessionSendFailed => 502,
            Self::NoPendingApproval => 409,
            Self::InvalidAction => 400,
            Self::SendQueueFull => 503,
            Self::BadAttachPayload => 400,
            Self::BadActionPayload => 400,
            Self::BadResizePayload => 400,
            Self::UnknownType => 400,
            Self::NoAttachedSession => 400,
            Self::SessionActive => 409,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for ErrorKind {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
