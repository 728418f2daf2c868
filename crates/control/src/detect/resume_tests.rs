// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

const UUID_A: &str = "550e8400-e29b-41d4-a716-446655440000";
const UUID_B: &str = "123e4567-e89b-42d3-a456-426614174000";

#[test]
fn captures_resume_id() {
    let d = ResumeDetector::new();
    let line = format!("$ claude-code --resume {UUID_A}\n");
    assert_eq!(d.feed("s1", line.as_bytes()).as_deref(), Some(UUID_A));
}

#[test]
fn plain_claude_command_matches() {
    let d = ResumeDetector::new();
    let line = format!("claude --resume {UUID_A}");
    assert_eq!(d.feed("s1", line.as_bytes()).as_deref(), Some(UUID_A));
}

#[test]
fn uppercase_uuid_is_lowercased() {
    let d = ResumeDetector::new();
    let line = format!("claude --resume {}", UUID_A.to_uppercase());
    assert_eq!(d.feed("s1", line.as_bytes()).as_deref(), Some(UUID_A));
}

#[test]
fn last_match_wins() {
    let d = ResumeDetector::new();
    let text = format!("claude --resume {UUID_A}\nclaude --resume {UUID_B}\n");
    assert_eq!(d.feed("s1", text.as_bytes()).as_deref(), Some(UUID_B));
}

#[test]
fn fragmented_across_chunks() {
    let d = ResumeDetector::new();
    assert!(d.feed("s1", b"$ claude-code --res").is_none());
    let tail = format!("ume {UUID_A}\n");
    assert_eq!(d.feed("s1", tail.as_bytes()).as_deref(), Some(UUID_A));
}

#[test]
fn id_hidden_in_escape_sequences() {
    let d = ResumeDetector::new();
    let line = format!("\x1b[1mclaude\x1b[0m --resume \x1b[32m{UUID_A}\x1b[0m");
    assert_eq!(d.feed("s1", line.as_bytes()).as_deref(), Some(UUID_A));
}

#[test]
fn rejects_malformed_uuid() {
    let d = ResumeDetector::new();
    assert!(d.feed("s1", b"claude --resume not-a-uuid").is_none());
    assert!(d.feed("s2", b"claude --resume 550e8400-e29b-41d4-a716").is_none());
}

#[test]
fn clear_drops_buffer() {
    let d = ResumeDetector::new();
    assert!(d.feed("s1", b"claude --res").is_none());
    d.clear("s1");
    let tail = format!("ume {UUID_A}");
    assert!(d.feed("s1", tail.as_bytes()).is_none());
}
