// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The control plane: authoritative registry of servers, sessions, session
//! events, hubs, agent transports, and subscribers.
//!
//! All shared state lives behind one `RwLock` that is never held across a
//! channel send: mutations and fan-out collection happen under the lock,
//! delivery happens after release. Ring buffers and detectors carry their
//! own strictly-inner locks.

mod agent;
mod client;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::audit::{AuditEvent, AuditLog};
use crate::detect::{PromptDetector, ResumeDetector};
use crate::error::ErrorKind;
use crate::limiter::RateLimiter;
use crate::model::{Server, ServerStatus, Session, SessionEvent};
use crate::proto::Envelope;
use crate::ring::RingBuffer;

/// Queue depth of one agent transport's outbound channel.
pub const AGENT_SEND_BUFFER: usize = 128;

/// Queue depth of one subscriber's outbound channel.
pub const SUBSCRIBER_SEND_BUFFER: usize = 256;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Who receives freshly-raised approval events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalBroadcast {
    /// Every connected subscriber (default), so operators can triage from lists.
    All,
    /// Only subscribers attached to the session.
    Attached,
}

/// Control-plane tunables. `Default` matches production defaults.
#[derive(Debug, Clone)]
pub struct PlaneConfig {
    pub ring_buffer_bytes: usize,
    pub offline_after: Duration,
    pub heartbeat_interval_ms: u64,
    /// `None` disables the audit sink (tests).
    pub audit_path: Option<PathBuf>,
    pub rate_limit: u32,
    pub rate_window: Duration,
    pub default_grace_ms: i64,
    pub default_kill_ms: i64,
    pub approval_broadcast: ApprovalBroadcast,
    pub prompt_detection: bool,
}

impl Default for PlaneConfig {
    fn default() -> Self {
        Self {
            ring_buffer_bytes: 128 * 1024,
            offline_after: Duration::from_secs(20),
            heartbeat_interval_ms: 5000,
            audit_path: None,
            rate_limit: 1200,
            rate_window: Duration::from_secs(60),
            default_grace_ms: 4000,
            default_kill_ms: 9000,
            approval_broadcast: ApprovalBroadcast::All,
            prompt_detection: true,
        }
    }
}

/// Sending half of an agent transport.
///
/// Sends await channel capacity: backpressure lands on the caller, never on
/// the socket, which the transport's writer task owns. A closed transport
/// fails sends with [`ErrorKind::ServerOffline`].
#[derive(Debug, Clone)]
pub struct AgentHandle {
    tx: mpsc::Sender<Envelope>,
}

impl AgentHandle {
    pub fn new(tx: mpsc::Sender<Envelope>) -> Self {
        Self { tx }
    }

    /// Create a handle plus the receiver its transport writer drains.
    pub fn channel() -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(AGENT_SEND_BUFFER);
        (Self { tx }, rx)
    }

    pub async fn send(&self, env: Envelope) -> Result<(), ErrorKind> {
        self.tx.send(env).await.map_err(|_| ErrorKind::ServerOffline)
    }
}

/// One connected operator UI.
#[derive(Debug)]
pub struct Subscriber {
    pub id: String,
    pub actor: String,
    tx: mpsc::Sender<Envelope>,
    attached: Option<String>,
}

impl Subscriber {
    pub fn new(id: String, actor: String, tx: mpsc::Sender<Envelope>) -> Self {
        Self { id, actor, tx, attached: None }
    }

    /// Create a subscriber plus the receiver its transport writer drains.
    pub fn channel(id: String, actor: String) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_SEND_BUFFER);
        (Self::new(id, actor, tx), rx)
    }

    /// Non-blocking enqueue. A full queue drops the message; the operator UI
    /// resyncs by reattaching against the ring snapshot.
    pub fn send(&self, env: Envelope) -> Result<(), ErrorKind> {
        self.tx.try_send(env).map_err(|_| ErrorKind::SendQueueFull)
    }
}

/// Per-session fan-out point: the ring buffer plus the attached subscribers.
pub(crate) struct SessionHub {
    pub(crate) ring: RingBuffer,
    pub(crate) subscribers: HashSet<String>,
}

impl SessionHub {
    fn new(ring_bytes: usize) -> Self {
        Self { ring: RingBuffer::new(ring_bytes), subscribers: HashSet::new() }
    }
}

#[derive(Default)]
pub(crate) struct PlaneState {
    pub(crate) servers: HashMap<String, Server>,
    pub(crate) sessions: HashMap<String, Session>,
    pub(crate) session_events: HashMap<String, Vec<SessionEvent>>,
    pub(crate) hubs: HashMap<String, SessionHub>,
    pub(crate) agent_conns: HashMap<String, AgentHandle>,
    pub(crate) subscribers: HashMap<String, Subscriber>,
}

/// The control plane. One instance per process, shared by reference with
/// every transport adapter.
pub struct ControlPlane {
    cfg: PlaneConfig,
    pub(crate) state: RwLock<PlaneState>,
    pub(crate) detector: PromptDetector,
    pub(crate) resume: ResumeDetector,
    pub(crate) audit: AuditLog,
    limiter: RateLimiter,
}

impl ControlPlane {
    pub fn new(cfg: PlaneConfig) -> anyhow::Result<Self> {
        let audit = match cfg.audit_path {
            Some(ref path) => AuditLog::open(path)?,
            None => AuditLog::disabled(),
        };
        let limiter = RateLimiter::new(cfg.rate_limit, cfg.rate_window);
        Ok(Self {
            cfg,
            state: RwLock::new(PlaneState::default()),
            detector: PromptDetector::new(),
            resume: ResumeDetector::new(),
            audit,
            limiter,
        })
    }

    pub fn config(&self) -> &PlaneConfig {
        &self.cfg
    }

    /// Fixed-window admission for a transport-composed key.
    pub fn rate_allow(&self, key: &str) -> bool {
        self.limiter.allow(key)
    }

    // -- queries ----------------------------------------------------------

    /// All known servers, sorted by id. A server whose `last_seen_ms` is
    /// older than the offline threshold is reported offline regardless of
    /// its cached status.
    pub fn servers(&self) -> Vec<Server> {
        let now = now_ms();
        let cutoff = self.cfg.offline_after.as_millis() as i64;
        let state = self.state.read();
        let mut items: Vec<Server> = state
            .servers
            .values()
            .map(|s| {
                let mut s = s.clone();
                if now - s.last_seen_ms > cutoff {
                    s.status = ServerStatus::Offline;
                }
                s
            })
            .collect();
        items.sort_by(|a, b| a.server_id.cmp(&b.server_id));
        items
    }

    /// Sessions sorted newest-first, optionally filtered by server.
    pub fn sessions(&self, server_id: Option<&str>) -> Vec<Session> {
        let state = self.state.read();
        let mut items: Vec<Session> = state
            .sessions
            .values()
            .filter(|s| server_id.is_none_or(|id| s.server_id == id))
            .cloned()
            .collect();
        items.sort_by(|a, b| {
            b.created_at_ms
                .cmp(&a.created_at_ms)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        items
    }

    /// Defensive copy of a session's event list.
    pub fn session_events(&self, session_id: &str) -> Vec<SessionEvent> {
        self.state
            .read()
            .session_events
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Unresolved `approval_needed` events across all sessions, newest
    /// first. Replayed to subscribers on connect.
    pub fn pending_approval_events(&self) -> Vec<SessionEvent> {
        let state = self.state.read();
        let mut items: Vec<SessionEvent> = state
            .session_events
            .values()
            .flatten()
            .filter(|e| !e.resolved && e.kind == "approval_needed")
            .cloned()
            .collect();
        items.sort_by(|a, b| b.ts_ms.cmp(&a.ts_ms).then_with(|| a.event_id.cmp(&b.event_id)));
        items
    }

    // -- fan-out ----------------------------------------------------------

    /// Deliver to the subscribers attached to a session. Senders are
    /// collected under the read lock and delivery happens after release.
    pub(crate) fn broadcast_to_attached(&self, session_id: &str, env: &Envelope) {
        let targets: Vec<mpsc::Sender<Envelope>> = {
            let state = self.state.read();
            let Some(hub) = state.hubs.get(session_id) else {
                return;
            };
            hub.subscribers
                .iter()
                .filter_map(|id| state.subscribers.get(id))
                .map(|s| s.tx.clone())
                .collect()
        };
        for tx in targets {
            let _ = tx.try_send(env.clone());
        }
    }

    /// Deliver to every connected subscriber.
    pub(crate) fn broadcast_to_all(&self, env: &Envelope) {
        let targets: Vec<mpsc::Sender<Envelope>> = {
            let state = self.state.read();
            state.subscribers.values().map(|s| s.tx.clone()).collect()
        };
        for tx in targets {
            let _ = tx.try_send(env.clone());
        }
    }

    /// Broadcast the session's current record to all subscribers.
    ///
    /// May be reordered relative to `term_out` under load; consumers
    /// tolerate a `session_update` that lags the stream.
    pub(crate) fn broadcast_session_update(&self, session_id: &str) {
        let env = {
            let state = self.state.read();
            let Some(sess) = state.sessions.get(session_id) else {
                return;
            };
            Envelope::new("session_update", &sess.server_id, session_id).with_data(sess)
        };
        self.broadcast_to_all(&env);
    }

    /// Record an audit event; never fails the caller.
    pub(crate) fn audit_log(&self, event: AuditEvent) {
        self.audit.log(event);
    }
}
