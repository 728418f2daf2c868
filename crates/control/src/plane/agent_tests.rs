// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::error::ErrorKind;
use crate::model::{PtyExit, SessionStatus, StartSessionRequest};
use crate::plane::PlaneConfig;
use crate::proto::{decode_b64, encode_b64};
use crate::test_support::{
    connect_subscriber, register_fake_agent, test_plane, test_plane_with, test_register, FakeAgent,
};

async fn start_session(plane: &ControlPlane, agent: &mut FakeAgent) -> String {
    let req = StartSessionRequest {
        server_id: agent.server_id.clone(),
        cwd: "/work".to_owned(),
        ..StartSessionRequest::default()
    };
    let sess = plane
        .create_session("ui:test", &req)
        .await
        .unwrap_or_else(|e| panic!("create_session: {e}"));
    agent.drain(); // swallow start_session
    sess.session_id
}

fn feed(plane: &ControlPlane, server_id: &str, session_id: &str, seq: u64, bytes: &[u8]) {
    plane.handle_pty_out(server_id, session_id, seq, &encode_b64(bytes));
}

fn session(plane: &ControlPlane, session_id: &str) -> crate::model::Session {
    plane
        .sessions(None)
        .into_iter()
        .find(|s| s.session_id == session_id)
        .unwrap_or_else(|| panic!("session {session_id} should exist"))
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let plane = test_plane();
    let _agent = register_fake_agent(&plane, "srv");

    let (handle, _rx) = AgentHandle::channel();
    assert_eq!(
        plane.register_server(&test_register("srv"), handle),
        Err(ErrorKind::DuplicateServer)
    );

    // After the first transport goes away, the id is free again.
    plane.remove_agent("srv");
    let (handle, _rx) = AgentHandle::channel();
    assert_eq!(plane.register_server(&test_register("srv"), handle), Ok(()));
}

#[tokio::test]
async fn pty_out_deduplicates_by_sequence() {
    let plane = test_plane();
    let mut agent = register_fake_agent(&plane, "srv");
    let sid = start_session(&plane, &mut agent).await;

    feed(&plane, "srv", &sid, 1, b"hello ");
    feed(&plane, "srv", &sid, 2, b"world");
    feed(&plane, "srv", &sid, 2, b"dup");
    feed(&plane, "srv", &sid, 1, b"older dup");
    feed(&plane, "srv", &sid, 3, b"!");

    let mut sub = connect_subscriber(&plane, "sub1");
    let (snapshot, latest) = plane.attach_subscriber("sub1", &sid).unwrap();
    assert_eq!(snapshot, b"hello world!".to_vec());
    assert_eq!(latest, 3);
    drop(sub.drain());
}

#[tokio::test]
async fn seq_zero_is_always_accepted() {
    let plane = test_plane();
    let mut agent = register_fake_agent(&plane, "srv");
    let sid = start_session(&plane, &mut agent).await;

    feed(&plane, "srv", &sid, 5, b"abc");
    feed(&plane, "srv", &sid, 0, b"def");
    feed(&plane, "srv", &sid, 0, b"ghi");

    let _sub = connect_subscriber(&plane, "sub1");
    let (snapshot, latest) = plane.attach_subscriber("sub1", &sid).unwrap();
    assert_eq!(snapshot, b"abcdefghi".to_vec());
    assert_eq!(latest, 5);
}

#[tokio::test]
async fn first_output_moves_starting_to_running() {
    let plane = test_plane();
    let mut agent = register_fake_agent(&plane, "srv");
    let sid = start_session(&plane, &mut agent).await;
    let mut sub = connect_subscriber(&plane, "sub1");

    assert_eq!(session(&plane, &sid).status, SessionStatus::Starting);
    feed(&plane, "srv", &sid, 1, b"booting\n");
    assert_eq!(session(&plane, &sid).status, SessionStatus::Running);

    let updates = sub.drain_kind("session_update");
    assert_eq!(updates.len(), 1, "one transition broadcast expected");
}

#[tokio::test]
async fn attached_subscriber_receives_term_out_in_order() {
    let plane = test_plane();
    let mut agent = register_fake_agent(&plane, "srv");
    let sid = start_session(&plane, &mut agent).await;

    let mut sub = connect_subscriber(&plane, "sub1");
    plane.attach_subscriber("sub1", &sid).unwrap();

    feed(&plane, "srv", &sid, 1, b"one");
    feed(&plane, "srv", &sid, 2, b"two");

    let outs = sub.drain_kind("term_out");
    assert_eq!(outs.len(), 2);
    assert_eq!(decode_b64(&outs[0].data_b64).unwrap(), b"one");
    assert_eq!(outs[0].seq, 1);
    assert_eq!(decode_b64(&outs[1].data_b64).unwrap(), b"two");
    assert_eq!(outs[1].seq, 2);
}

#[tokio::test]
async fn unattached_subscriber_gets_no_term_out() {
    let plane = test_plane();
    let mut agent = register_fake_agent(&plane, "srv");
    let sid = start_session(&plane, &mut agent).await;

    let mut sub = connect_subscriber(&plane, "sub1");
    feed(&plane, "srv", &sid, 1, b"data");
    assert!(sub.drain_kind("term_out").is_empty());
}

#[tokio::test]
async fn prompt_output_raises_exactly_one_approval() {
    let plane = test_plane();
    let mut agent = register_fake_agent(&plane, "srv");
    let sid = start_session(&plane, &mut agent).await;
    let mut sub = connect_subscriber(&plane, "sub1");

    feed(&plane, "srv", &sid, 1, b"Do you want to proceed?");
    let sess = session(&plane, &sid);
    assert!(sess.awaiting_approval);
    assert!(!sess.pending_event_id.is_empty());

    let events = plane.session_events(&sid);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, "approval_needed");
    assert_eq!(events[0].event_id, sess.pending_event_id);
    assert!(!events[0].resolved);
    assert!(events[0].prompt_text.contains("Do you want to proceed?"));

    assert_eq!(sub.drain_kind("event").len(), 1);

    // The same bytes again must not raise a second event: detection is
    // frozen while awaiting, and the detector buffer was cleared.
    feed(&plane, "srv", &sid, 2, b"Do you want to proceed?");
    assert_eq!(plane.session_events(&sid).len(), 1);
    assert_eq!(plane.pending_approval_events().len(), 1);
}

#[tokio::test]
async fn approval_detected_across_fragmented_chunks() {
    // Scenario S-2: menu prompt split mid-word and peppered with CSI 1 C.
    let plane = test_plane();
    let mut agent = register_fake_agent(&plane, "srv");
    let sid = start_session(&plane, &mut agent).await;

    feed(&plane, "srv", &sid, 1, b"Do you want to create t");
    assert!(!session(&plane, &sid).awaiting_approval);

    let chunk = "estfile?\r\n\x1b[1C1.\x1b[1CYes\r\n\x1b[1C2.\x1b[1CNo\r\n\x1b[1CEsc\x1b[1Cto\x1b[1Ccancel\x1b[1C\u{b7}\x1b[1CTab\x1b[1Cto\x1b[1Camend";
    feed(&plane, "srv", &sid, 2, chunk.as_bytes());

    let sess = session(&plane, &sid);
    assert!(sess.awaiting_approval);
    let events = plane.session_events(&sid);
    assert_eq!(events.len(), 1);
    assert!(events[0].prompt_text.contains("Do you want to create testfile?"));
    assert!(events[0].prompt_text.contains("Esc to cancel \u{b7} Tab to amend"));
}

#[tokio::test]
async fn prompt_detection_can_be_disabled() {
    let plane = test_plane_with(PlaneConfig { prompt_detection: false, ..PlaneConfig::default() });
    let mut agent = register_fake_agent(&plane, "srv");
    let sid = start_session(&plane, &mut agent).await;

    feed(&plane, "srv", &sid, 1, b"Do you want to proceed?");
    assert!(!session(&plane, &sid).awaiting_approval);
    assert!(plane.session_events(&sid).is_empty());
}

#[tokio::test]
async fn approval_broadcast_attached_only() {
    let plane = test_plane_with(PlaneConfig {
        approval_broadcast: ApprovalBroadcast::Attached,
        ..PlaneConfig::default()
    });
    let mut agent = register_fake_agent(&plane, "srv");
    let sid = start_session(&plane, &mut agent).await;

    let mut attached = connect_subscriber(&plane, "attached");
    plane.attach_subscriber("attached", &sid).unwrap();
    let mut other = connect_subscriber(&plane, "other");

    feed(&plane, "srv", &sid, 1, b"Continue? (y/n)");
    assert_eq!(attached.drain_kind("event").len(), 1);
    assert!(other.drain_kind("event").is_empty());
}

#[tokio::test]
async fn pty_exit_clears_session_and_approval() {
    // Scenario S-4.
    let plane = test_plane();
    let mut agent = register_fake_agent(&plane, "srv");
    let sid = start_session(&plane, &mut agent).await;
    let mut sub = connect_subscriber(&plane, "sub1");

    feed(&plane, "srv", &sid, 1, b"Continue? (y/n)");
    assert!(session(&plane, &sid).awaiting_approval);
    drop(sub.drain());

    plane.handle_pty_exit(
        "srv",
        &sid,
        &PtyExit { exit_code: Some(0), signal: String::new(), reason: "exited".to_owned() },
    );

    let sess = session(&plane, &sid);
    assert_eq!(sess.status, SessionStatus::Exited);
    assert_eq!(sess.exit_code, Some(0));
    assert_eq!(sess.exit_reason, "exited");
    assert!(!sess.awaiting_approval);
    assert!(sess.pending_event_id.is_empty());

    // The orphaned approval is resolved, not left dangling.
    assert!(plane.pending_approval_events().is_empty());
    let events = plane.session_events(&sid);
    assert_eq!(events.len(), 1);
    assert!(events[0].resolved);
    assert_eq!(events[0].actor, "system");

    assert_eq!(sub.drain_kind("session_update").len(), 1);
}

#[tokio::test]
async fn pty_exit_on_terminal_session_is_ignored() {
    let plane = test_plane();
    let mut agent = register_fake_agent(&plane, "srv");
    let sid = start_session(&plane, &mut agent).await;

    plane.handle_agent_error("srv", &sid, "boom");
    assert_eq!(session(&plane, &sid).status, SessionStatus::Error);

    plane.handle_pty_exit("srv", &sid, &PtyExit { exit_code: Some(1), ..PtyExit::default() });
    let sess = session(&plane, &sid);
    assert_eq!(sess.status, SessionStatus::Error, "error is terminal");
    assert_eq!(sess.exit_reason, "boom");
}

#[tokio::test]
async fn transient_not_found_during_start_is_suppressed() {
    // Scenario S-5: a resize racing session start produces a spurious
    // "session not found" that must not kill the session.
    let plane = test_plane();
    let mut agent = register_fake_agent(&plane, "srv");
    let sid = start_session(&plane, &mut agent).await;
    let mut sub = connect_subscriber(&plane, "sub1");
    plane.attach_subscriber("sub1", &sid).unwrap();
    drop(sub.drain());

    plane.handle_agent_error("srv", &sid, "session not found");
    assert_eq!(session(&plane, &sid).status, SessionStatus::Starting);
    assert!(sub.drain().is_empty(), "no broadcast for the suppressed error");

    plane.handle_agent_error("srv", &sid, "boom");
    let sess = session(&plane, &sid);
    assert_eq!(sess.status, SessionStatus::Error);
    assert_eq!(sess.exit_reason, "boom");

    let outs = sub.drain_kind("term_out");
    assert_eq!(outs.len(), 1);
    let note = decode_b64(&outs[0].data_b64).unwrap();
    assert_eq!(note, b"\r\n[agent error] boom\r\n".to_vec());
}

#[tokio::test]
async fn running_session_not_found_error_is_not_suppressed() {
    let plane = test_plane();
    let mut agent = register_fake_agent(&plane, "srv");
    let sid = start_session(&plane, &mut agent).await;
    feed(&plane, "srv", &sid, 1, b"up\n");

    plane.handle_agent_error("srv", &sid, "session not found");
    assert_eq!(session(&plane, &sid).status, SessionStatus::Error);
}

#[tokio::test]
async fn resume_id_is_captured_and_broadcast() {
    // Scenario S-6.
    let plane = test_plane();
    let mut agent = register_fake_agent(&plane, "srv");
    let sid = start_session(&plane, &mut agent).await;
    feed(&plane, "srv", &sid, 1, b"warmup\n");
    let mut sub = connect_subscriber(&plane, "sub1");

    feed(
        &plane,
        "srv",
        &sid,
        2,
        b"$ claude-code --resume 550E8400-E29B-41D4-A716-446655440000\n",
    );

    let sess = session(&plane, &sid);
    assert_eq!(sess.resume_id, "550e8400-e29b-41d4-a716-446655440000");
    assert_eq!(sub.drain_kind("session_update").len(), 1);

    // The same id again is not a change and does not re-broadcast.
    feed(&plane, "srv", &sid, 3, b"$ claude-code --resume 550e8400-e29b-41d4-a716-446655440000\n");
    assert!(sub.drain_kind("session_update").is_empty());
}

#[tokio::test]
async fn pty_out_for_foreign_server_is_dropped() {
    let plane = test_plane();
    let mut agent = register_fake_agent(&plane, "srv");
    let _other = register_fake_agent(&plane, "intruder");
    let sid = start_session(&plane, &mut agent).await;

    feed(&plane, "intruder", &sid, 1, b"spoofed");
    let _sub = connect_subscriber(&plane, "sub1");
    let (snapshot, _) = plane.attach_subscriber("sub1", &sid).unwrap();
    assert!(snapshot.is_empty());
}

#[tokio::test]
async fn rings_do_not_leak_across_sessions() {
    // Property 5.
    let plane = test_plane();
    let mut agent = register_fake_agent(&plane, "srv");
    let sid1 = start_session(&plane, &mut agent).await;
    let sid2 = start_session(&plane, &mut agent).await;

    feed(&plane, "srv", &sid1, 1, b"alpha");
    feed(&plane, "srv", &sid2, 1, b"beta");

    let _sub = connect_subscriber(&plane, "sub1");
    let (snap1, _) = plane.attach_subscriber("sub1", &sid1).unwrap();
    let (snap2, _) = plane.attach_subscriber("sub1", &sid2).unwrap();
    assert_eq!(snap1, b"alpha".to_vec());
    assert_eq!(snap2, b"beta".to_vec());
}

#[tokio::test]
async fn servers_reported_offline_after_staleness_window() {
    let plane = test_plane_with(PlaneConfig {
        offline_after: std::time::Duration::from_millis(0),
        ..PlaneConfig::default()
    });
    let _agent = register_fake_agent(&plane, "srv");

    // last_seen is "now" but the zero threshold makes any age stale.
    std::thread::sleep(std::time::Duration::from_millis(5));
    let servers = plane.servers();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].status, crate::model::ServerStatus::Offline);
}

#[tokio::test]
async fn remove_agent_keeps_server_record_and_sessions() {
    let plane = test_plane();
    let mut agent = register_fake_agent(&plane, "srv");
    let sid = start_session(&plane, &mut agent).await;
    feed(&plane, "srv", &sid, 1, b"up\n");

    plane.remove_agent("srv");

    let servers = plane.servers();
    assert_eq!(servers.len(), 1, "record retained after disconnect");
    assert_eq!(servers[0].status, crate::model::ServerStatus::Offline);
    assert_eq!(session(&plane, &sid).status, SessionStatus::Running, "sessions keep last status");

    let err = plane
        .handle_client_term_in("ui:test", &sid, &encode_b64(b"ls\n"))
        .await
        .unwrap_err();
    assert_eq!(err.downcast_ref::<ErrorKind>(), Some(&ErrorKind::ServerOffline));
}

#[tokio::test]
async fn touch_flips_server_back_online() {
    let plane = test_plane();
    let _agent = register_fake_agent(&plane, "srv");
    plane.remove_agent("srv");
    assert_eq!(plane.servers()[0].status, crate::model::ServerStatus::Offline);

    plane.touch_server("srv");
    assert_eq!(plane.servers()[0].status, crate::model::ServerStatus::Online);
}
