// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for unit and integration tests: in-memory planes, fake
//! agent transports, and subscriber taps.

use tokio::sync::mpsc;

use crate::model::AgentRegister;
use crate::plane::{AgentHandle, ControlPlane, PlaneConfig, Subscriber};
use crate::proto::Envelope;

/// A control plane with the audit sink disabled.
#[allow(clippy::expect_used)]
pub fn test_plane() -> ControlPlane {
    ControlPlane::new(PlaneConfig::default()).expect("plane without audit file cannot fail")
}

/// A control plane with the given config.
#[allow(clippy::expect_used)]
pub fn test_plane_with(cfg: PlaneConfig) -> ControlPlane {
    ControlPlane::new(cfg).expect("test plane config should be valid")
}

/// The receiving half of a fake agent transport.
pub struct FakeAgent {
    pub server_id: String,
    pub rx: mpsc::Receiver<Envelope>,
}

impl FakeAgent {
    /// Drain everything currently queued for the agent.
    pub fn drain(&mut self) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(env) = self.rx.try_recv() {
            out.push(env);
        }
        out
    }

    /// Drain and return the last queued envelope, if any.
    pub fn last(&mut self) -> Option<Envelope> {
        self.drain().pop()
    }
}

/// Register a fake agent for `server_id` and return its receiving end.
#[allow(clippy::expect_used)]
pub fn register_fake_agent(plane: &ControlPlane, server_id: &str) -> FakeAgent {
    let (handle, rx) = AgentHandle::channel();
    plane
        .register_server(&test_register(server_id), handle)
        .expect("fresh server id should register");
    FakeAgent { server_id: server_id.to_owned(), rx }
}

/// A minimal `register` payload for tests.
pub fn test_register(server_id: &str) -> AgentRegister {
    AgentRegister {
        server_id: server_id.to_owned(),
        hostname: "host-1".to_owned(),
        tags: vec!["test".to_owned()],
        os: "linux".to_owned(),
        arch: "x86_64".to_owned(),
        agent_version: "0.4.1".to_owned(),
        allow_roots: vec!["/work".to_owned()],
        claude_path: "claude".to_owned(),
    }
}

/// The receiving half of a connected subscriber.
pub struct TestSubscriber {
    pub id: String,
    pub rx: mpsc::Receiver<Envelope>,
}

impl TestSubscriber {
    pub fn drain(&mut self) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(env) = self.rx.try_recv() {
            out.push(env);
        }
        out
    }

    /// Drain and keep only envelopes of the given type.
    pub fn drain_kind(&mut self, kind: &str) -> Vec<Envelope> {
        self.drain().into_iter().filter(|e| e.kind == kind).collect()
    }
}

/// Register a subscriber with the plane and return its receiving end.
pub fn connect_subscriber(plane: &ControlPlane, id: &str) -> TestSubscriber {
    let (sub, rx) = Subscriber::channel(id.to_owned(), format!("ui:{id}"));
    plane.register_subscriber(sub);
    TestSubscriber { id: id.to_owned(), rx }
}
