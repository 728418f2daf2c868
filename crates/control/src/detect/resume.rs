// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Streaming capture of the session-resume id Claude prints.
//!
//! When the assistant emits `claude --resume <uuid>` (or `claude-code
//! --resume <uuid>`), the control plane records the uuid on the session so a
//! later start can resume the same conversation.

use std::collections::HashMap;

use parking_lot::Mutex;
use regex::Regex;

use super::strip::strip;

const MAX_BUFFER: usize = 4096;

const RESUME_PATTERN: &str =
    r"(?i)\bclaude(?:-code)?\s+--resume\s+([0-9a-f]{8}(?:-[0-9a-f]{4}){3}-[0-9a-f]{12})\b";

/// Stateful per-session matcher for the resume command.
pub struct ResumeDetector {
    buffers: Mutex<HashMap<String, String>>,
    pattern: Option<Regex>,
}

impl Default for ResumeDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ResumeDetector {
    pub fn new() -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            pattern: Regex::new(RESUME_PATTERN).ok(),
        }
    }

    /// Feed one raw chunk. Returns the uuid of the *last* resume command in
    /// the buffer, lowercased, if any is present.
    pub fn feed(&self, session_id: &str, raw: &[u8]) -> Option<String> {
        let clean = strip(raw);
        if clean.is_empty() {
            return None;
        }
        let pattern = self.pattern.as_ref()?;

        let mut buffers = self.buffers.lock();
        let buf = buffers.entry(session_id.to_owned()).or_default();
        buf.push_str(&clean);
        truncate_front(buf, MAX_BUFFER);

        let last = pattern.captures_iter(buf).last()?;
        Some(last.get(1)?.as_str().to_lowercase())
    }

    /// Drop a session's buffer.
    pub fn clear(&self, session_id: &str) {
        self.buffers.lock().remove(session_id);
    }
}

fn truncate_front(buf: &mut String, cap: usize) {
    if buf.len() <= cap {
        return;
    }
    let mut cut = buf.len() - cap;
    while cut < buf.len() && !buf.is_char_boundary(cut) {
        cut += 1;
    }
    buf.drain(..cut);
}

#[cfg(test)]
#[path = "resume_tests.rs"]
mod tests;
