//! # Connection Hub
//!
//! The single authority over the set of live push-channel sessions.
//!
//! ## Core Design Principles:
//!
//! 1.  **One Owner for the Registry**: the session map lives inside one spawned
//!     task. `register`, `unregister` and `broadcast` are commands sent to that
//!     task over an mpsc channel and are applied one at a time, so a broadcast
//!     can never observe a half-registered or half-removed session.
//!
//! 2.  **Shared Fan-out**: a broadcast is serialized once into an `Arc<str>` and
//!     every session queue receives a clone of the same pointer.
//!
//! 3.  **Evict, Never Wait**: each session queue is bounded and only ever fed
//!     with `try_send`. A full queue marks the session as unresponsive; it is
//!     removed on the spot and its queue sender dropped, which closes the queue
//!     and lets the session's writer exit. A stalled client therefore costs at
//!     most one queue worth of memory and never delays anybody else.
//!
//! The hub task has no failure mode of its own. It stops when the last [`Hub`]
//! handle is dropped.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::envelope::Envelope;
use crate::telemetry;

/// Default greeting pushed to every newly registered session.
pub const DEFAULT_WELCOME_TEXT: &str = "Connected to the live update service";

static NEXT_SESSION_SEQ: AtomicU64 = AtomicU64::new(1);

/// # Session Id
///
/// Opaque identifier assigned at connect time, formatted as
/// `YYYYMMDDHHMMSS_<seq>`. The sequence part is process-wide and strictly
/// increasing, so two ids never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Generates the next id.
    pub fn next() -> Self {
        let seq = NEXT_SESSION_SEQ.fetch_add(1, Ordering::Relaxed);
        Self(format!("{}_{}", Utc::now().format("%Y%m%d%H%M%S"), seq))
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// # Session Handle
///
/// What the hub keeps for a registered session: its identity and the only
/// sender of its outbound queue. Dropping the handle closes the queue.
pub struct SessionHandle {
    id: SessionId,
    identity: String,
    outbound: mpsc::Sender<Arc<str>>,
}

impl SessionHandle {
    /// Wraps the sending half of a session's outbound queue.
    pub fn new(id: SessionId, identity: impl Into<String>, outbound: mpsc::Sender<Arc<str>>) -> Self {
        Self {
            id,
            identity: identity.into(),
            outbound,
        }
    }

    /// Session id.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Caller identity the session was opened with.
    pub fn identity(&self) -> &str {
        &self.identity
    }
}

/// Outcome of one broadcast, returned once the hub has applied it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastReport {
    /// Sessions whose queue accepted the message.
    pub delivered: usize,
    /// Sessions removed during this broadcast (queue full or already closed).
    pub evicted: usize,
}

/// Hub construction options.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Text of the welcome envelope.
    pub welcome_text: String,
    /// Capacity of the command channel feeding the hub task.
    pub command_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            welcome_text: DEFAULT_WELCOME_TEXT.to_string(),
            command_buffer: 1024,
        }
    }
}

enum HubCommand {
    Register(SessionHandle),
    Unregister(SessionId),
    Broadcast {
        message: Arc<str>,
        responder: oneshot::Sender<BroadcastReport>,
    },
    Count(oneshot::Sender<usize>),
    Contains(SessionId, oneshot::Sender<bool>),
}

/// # Hub
///
/// Cheap, cloneable handle to the hub task. Every producer and every session
/// holds one.
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::Sender<HubCommand>,
}

impl Hub {
    /// Spawns the hub task on the current Tokio runtime.
    pub fn spawn(config: HubConfig) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.command_buffer.max(1));
        let registry = Registry::new(config.welcome_text);
        let handle = tokio::spawn(registry.run(rx));
        (Self { commands: tx }, handle)
    }

    /// Adds a session. The welcome envelope is queued by the hub itself; a
    /// session whose queue cannot take it is dropped instead of registered.
    pub async fn register(&self, session: SessionHandle) {
        if self.commands.send(HubCommand::Register(session)).await.is_err() {
            warn!("hub stopped, registration dropped");
        }
    }

    /// Removes a session. Removing an absent session is a no-op.
    pub async fn unregister(&self, id: SessionId) {
        if self.commands.send(HubCommand::Unregister(id)).await.is_err() {
            debug!("hub stopped, unregister ignored");
        }
    }

    /// Fans an envelope out to every registered session.
    pub async fn broadcast(&self, envelope: &Envelope) -> BroadcastReport {
        match envelope.to_json() {
            Ok(json) => self.broadcast_raw(Arc::from(json)).await,
            Err(e) => {
                warn!(kind = %envelope.kind, error = %e, "failed to serialize envelope");
                BroadcastReport::default()
            }
        }
    }

    /// Fans an already serialized message out to every registered session.
    pub async fn broadcast_raw(&self, message: Arc<str>) -> BroadcastReport {
        let (responder, rx) = oneshot::channel();
        if self
            .commands
            .send(HubCommand::Broadcast { message, responder })
            .await
            .is_err()
        {
            return BroadcastReport::default();
        }
        rx.await.unwrap_or_default()
    }

    /// Number of registered sessions.
    pub async fn session_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(HubCommand::Count(tx)).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Whether the given session is currently registered.
    pub async fn contains(&self, id: &SessionId) -> bool {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(HubCommand::Contains(id.clone(), tx)).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }
}

/// State owned by the hub task.
struct Registry {
    sessions: HashMap<SessionId, SessionHandle>,
    welcome_text: String,
}

impl Registry {
    fn new(welcome_text: String) -> Self {
        Self {
            sessions: HashMap::new(),
            welcome_text,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<HubCommand>) {
        info!("hub started");
        while let Some(command) = commands.recv().await {
            match command {
                HubCommand::Register(session) => self.register(session),
                HubCommand::Unregister(id) => self.unregister(&id),
                HubCommand::Broadcast { message, responder } => {
                    let report = self.broadcast(&message);
                    let _ = responder.send(report);
                }
                HubCommand::Count(tx) => {
                    let _ = tx.send(self.sessions.len());
                }
                HubCommand::Contains(id, tx) => {
                    let _ = tx.send(self.sessions.contains_key(&id));
                }
            }
        }
        info!("hub stopped");
    }

    fn register(&mut self, session: SessionHandle) {
        let welcome: Arc<str> = match Envelope::welcome(&self.welcome_text).to_json() {
            Ok(json) => Arc::from(json),
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "welcome envelope could not be serialized");
                return;
            }
        };
        if session.outbound.try_send(welcome).is_err() {
            // Dropping the handle closes the queue.
            warn!(session_id = %session.id, "welcome rejected, session torn down");
            counter!(telemetry::WS_EVICTIONS_TOTAL, "reason" => "welcome_rejected").increment(1);
            return;
        }

        counter!(telemetry::WS_CONNECTIONS_TOTAL, "status" => "connected").increment(1);
        let id = session.id.clone();
        let identity = session.identity.clone();
        let _ = self.sessions.insert(id.clone(), session);
        gauge!(telemetry::WS_ACTIVE_CONNECTIONS).set(self.sessions.len() as f64);
        info!(session_id = %id, identity = %identity, total = self.sessions.len(), "session registered");
    }

    fn unregister(&mut self, id: &SessionId) {
        if self.sessions.remove(id).is_some() {
            counter!(telemetry::WS_CONNECTIONS_TOTAL, "status" => "disconnected").increment(1);
            gauge!(telemetry::WS_ACTIVE_CONNECTIONS).set(self.sessions.len() as f64);
            info!(session_id = %id, total = self.sessions.len(), "session unregistered");
        }
    }

    fn broadcast(&mut self, message: &Arc<str>) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        counter!(telemetry::WS_MESSAGES_TOTAL, "type" => "broadcast", "direction" => "outbound")
            .increment(1);

        self.sessions.retain(|id, session| match session.outbound.try_send(Arc::clone(message)) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(session_id = %id, "outbound queue full, evicting session");
                counter!(telemetry::WS_EVICTIONS_TOTAL, "reason" => "queue_full").increment(1);
                report.evicted += 1;
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(session_id = %id, "outbound queue closed, dropping session");
                counter!(telemetry::WS_EVICTIONS_TOTAL, "reason" => "closed").increment(1);
                report.evicted += 1;
                false
            }
        });

        if report.evicted > 0 {
            gauge!(telemetry::WS_ACTIVE_CONNECTIONS).set(self.sessions.len() as f64);
        }
        debug!(delivered = report.delivered, evicted = report.evicted, "broadcast applied");
        report
    }
}
