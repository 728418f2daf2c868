// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Streaming approval-prompt detection over stripped PTY text.
//!
//! Each session gets a rolling text buffer so a prompt split across
//! arbitrarily small output chunks still matches once the tail arrives.

use std::collections::HashMap;

use parking_lot::Mutex;
use regex::Regex;

use super::strip::strip;

/// Rolling buffer capacity per session, in bytes of stripped text.
const MAX_BUFFER: usize = 4096;

/// How many trailing lines of the buffer make up the prompt excerpt.
const EXCERPT_LINES: usize = 12;

/// Ordered approval-prompt patterns, checked case-insensitively against the
/// whole rolling buffer.
const PATTERNS: &[&str] = &[
    r"(?i)\b(approve|reject)\b",
    r"(?i)\(y/n\)",
    r"(?i)\[y/n\]",
    r"(?i)\bconfirm\b",
    r"(?i)continue\?",
    // Menu prompt: question followed by a numbered "Yes" within range.
    r"(?is)\bdo\s+you\s+want\s+to\b.{0,800}?\b1[.)]\s*yes\b",
    // Claude Code menu footer.
    r"(?is)\besc\s+to\s+cancel\b.{0,300}?\btab\s+to\s+amend\b",
    // Standalone "Do you want to <verb> ...?" on one line.
    r"(?i)\bdo\s+you\s+want\s+to\s+\w+[^\n?]*\?",
];

/// Stateful per-session prompt matcher.
pub struct PromptDetector {
    buffers: Mutex<HashMap<String, String>>,
    patterns: Vec<Regex>,
}

impl Default for PromptDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptDetector {
    pub fn new() -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            patterns: PATTERNS.iter().filter_map(|p| Regex::new(p).ok()).collect(),
        }
    }

    /// Feed one raw chunk for a session. Returns the prompt excerpt (the
    /// trimmed last [`EXCERPT_LINES`] lines of the buffer) when any pattern
    /// matches.
    pub fn feed(&self, session_id: &str, raw: &[u8]) -> Option<String> {
        let clean = strip(raw);
        if clean.is_empty() {
            return None;
        }

        let mut buffers = self.buffers.lock();
        let buf = buffers.entry(session_id.to_owned()).or_default();
        buf.push_str(&clean);
        truncate_front(buf, MAX_BUFFER);

        if self.patterns.iter().any(|p| p.is_match(buf)) {
            return Some(last_lines(buf, EXCERPT_LINES));
        }
        None
    }

    /// Drop a session's buffer. Called after an approval is raised so the
    /// same prompt text cannot re-trigger, and on session exit.
    pub fn clear(&self, session_id: &str) {
        self.buffers.lock().remove(session_id);
    }

    #[cfg(test)]
    pub(crate) fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}

/// Keep only the trailing `cap` bytes, respecting char boundaries.
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

/// Trimmed last `count` lines of `s`.
fn last_lines(s: &str, count: usize) -> String {
    let lines: Vec<&str> = s.split('\n').collect();
    if lines.len() <= count {
        return s.trim().to_owned();
    }
    lines[lines.len() - count..].join("\n").trim().to_owned()
}

#[cfg(test)]
#[path = "prompt_tests.rs"]
mod tests;
