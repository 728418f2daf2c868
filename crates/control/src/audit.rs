// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only structured audit log, one JSON object per line.
//!
//! Writes are best-effort: a full disk or rotated-away file must never fail
//! the request path, so append errors are swallowed after a warning.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One audit record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditEvent {
    #[serde(default)]
    pub ts_ms: i64,
    pub actor: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_id: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// JSONL audit sink. `None` file (tests) drops every record.
pub struct AuditLog {
    file: Option<Mutex<File>>,
}

impl AuditLog {
    /// Open (or create) the audit file in append mode.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file: Some(Mutex::new(file)) })
    }

    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self { file: None }
    }

    /// Append one record, stamping `ts_ms` if unset.
    pub fn log(&self, mut event: AuditEvent) {
        let Some(ref file) = self.file else {
            return;
        };
        if event.ts_ms == 0 {
            event.ts_ms = crate::plane::now_ms();
        }
        let Ok(mut line) = serde_json::to_string(&event) else {
            return;
        };
        line.push('\n');
        let mut file = file.lock();
        if let Err(e) = file.write_all(line.as_bytes()) {
            tracing::warn!("audit append failed: {e}");
        }
    }
}

#[cfg(test)]
#[path = "audit_tests.rs"]
mod tests;
