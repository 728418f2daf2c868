// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn read_events(path: &Path) -> Vec<AuditEvent> {
    let contents = std::fs::read_to_string(path).unwrap_or_default();
    contents
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

#[test]
fn appends_one_json_object_per_line() {
    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
    let path = dir.path().join("audit.jsonl");
    let log = AuditLog::open(&path).unwrap_or_else(|e| panic!("open: {e}"));

    log.log(AuditEvent {
        actor: "ui:tok".to_owned(),
        session_id: "s1".to_owned(),
        kind: "term_in".to_owned(),
        meta: Some(serde_json::json!({"size": 4})),
        ..AuditEvent::default()
    });
    log.log(AuditEvent {
        actor: "agent:srv".to_owned(),
        server_id: "srv".to_owned(),
        kind: "register".to_owned(),
        ..AuditEvent::default()
    });

    let events = read_events(&path);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind, "term_in");
    assert_eq!(events[0].session_id, "s1");
    assert_eq!(events[1].kind, "register");
    assert!(events[0].ts_ms > 0, "ts_ms should be stamped");
}

#[test]
fn reopening_appends_rather_than_truncates() {
    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
    let path = dir.path().join("audit.jsonl");
    {
        let log = AuditLog::open(&path).unwrap_or_else(|e| panic!("open: {e}"));
        log.log(AuditEvent { actor: "a".to_owned(), kind: "register".to_owned(), ..AuditEvent::default() });
    }
    {
        let log = AuditLog::open(&path).unwrap_or_else(|e| panic!("open: {e}"));
        log.log(AuditEvent { actor: "b".to_owned(), kind: "resize".to_owned(), ..AuditEvent::default() });
    }
    assert_eq!(read_events(&path).len(), 2);
}

#[test]
fn disabled_sink_drops_everything() {
    let log = AuditLog::disabled();
    // Must not panic or block.
    log.log(AuditEvent { actor: "x".to_owned(), kind: "resize".to_owned(), ..AuditEvent::default() });
}
