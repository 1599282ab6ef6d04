//! # Client Session Lifecycle
//!
//! A session is one accepted client connection driven by exactly two tasks:
//!
//! - the **writer** owns the transport's send half and the receiving end of
//!   the session's bounded outbound queue. It forwards queued messages, sends a
//!   ping on every keepalive tick, and emits a close frame once the hub closes
//!   the queue;
//! - the **reader** owns the receive half. Every frame it sees refreshes the
//!   read deadline; silence past the deadline, a transport error, an oversized
//!   message or a close frame ends the session.
//!
//! Both tasks share a `CancellationToken`, so whichever stops first takes the
//! other down with it. The reader is the only task that notifies the hub, which
//! keeps unregistration to exactly once per session.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::envelope::Envelope;
use crate::core::hub::{Hub, SessionHandle, SessionId};
use crate::core::transport::{Frame, TransportError, TransportSink, TransportStream};
use crate::identity::resolve_identity;
use crate::telemetry;

/// # Session Config
///
/// Per-session limits. The defaults keep a half-open connection alive for at
/// most one ping period plus one read deadline.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Capacity of the outbound queue.
    pub queue_capacity: usize,
    /// Interval between liveness probes.
    pub ping_period: Duration,
    /// Maximum silence tolerated from the client.
    pub read_deadline: Duration,
    /// Maximum time a single frame write may take.
    pub write_deadline: Duration,
    /// Largest inbound frame accepted, in bytes.
    pub max_message_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            ping_period: Duration::from_secs(54),
            read_deadline: Duration::from_secs(60),
            write_deadline: Duration::from_secs(10),
            max_message_size: 512,
        }
    }
}

/// Why one half of a session stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The hub closed the outbound queue (unregister or eviction).
    QueueClosed,
    /// The client sent a close frame or the stream ended.
    PeerClosed,
    /// Nothing was read within the read deadline.
    ReadDeadline,
    /// The receive half reported an error.
    ReadFailed(String),
    /// A write failed or exceeded the write deadline.
    WriteFailed(String),
    /// The client violated the protocol (e.g. oversized message).
    Protocol(String),
    /// The sibling task stopped first.
    Cancelled,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::QueueClosed => f.write_str("outbound queue closed"),
            CloseReason::PeerClosed => f.write_str("peer closed"),
            CloseReason::ReadDeadline => f.write_str("read deadline exceeded"),
            CloseReason::ReadFailed(e) => write!(f, "read failed: {e}"),
            CloseReason::WriteFailed(e) => write!(f, "write failed: {e}"),
            CloseReason::Protocol(e) => write!(f, "protocol violation: {e}"),
            CloseReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// # Liveness
///
/// Last successful read and write, stored as milliseconds since the session
/// was created so both tasks can update them without locking.
#[derive(Debug)]
pub struct Liveness {
    origin: Instant,
    last_read_ms: AtomicU64,
    last_write_ms: AtomicU64,
}

impl Liveness {
    /// Starts both clocks now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_read_ms: AtomicU64::new(0),
            last_write_ms: AtomicU64::new(0),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Records a successful read.
    pub fn mark_read(&self) {
        self.last_read_ms.store(self.elapsed_ms(), Ordering::Relaxed);
    }

    /// Records a successful write.
    pub fn mark_write(&self) {
        self.last_write_ms.store(self.elapsed_ms(), Ordering::Relaxed);
    }

    /// Time since the last successful read (or creation).
    pub fn since_read(&self) -> Duration {
        let last = self.last_read_ms.load(Ordering::Relaxed);
        Duration::from_millis(self.elapsed_ms().saturating_sub(last))
    }

    /// Time since the last successful write (or creation).
    pub fn since_write(&self) -> Duration {
        let last = self.last_write_ms.load(Ordering::Relaxed);
        Duration::from_millis(self.elapsed_ms().saturating_sub(last))
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// Handles to the two tasks of a running session.
pub struct SessionTasks {
    /// Id the session was registered under.
    pub id: SessionId,
    /// Shared liveness record.
    pub liveness: Arc<Liveness>,
    /// Reader task; resolves after the hub was notified.
    pub reader: JoinHandle<CloseReason>,
    /// Writer task.
    pub writer: JoinHandle<CloseReason>,
}

/// # Run Session
///
/// Registration entry point, called once per accepted handshake.
///
/// Creates the outbound queue, registers its only sender with the hub (which
/// queues the welcome envelope) and spawns the writer and reader tasks. The
/// session then runs on its own; the returned handles are only needed by
/// callers that want to observe how it ended.
pub async fn run_session<S, R>(
    hub: &Hub,
    sink: S,
    stream: R,
    identity: Option<&str>,
    config: &SessionConfig,
) -> SessionTasks
where
    S: TransportSink,
    R: TransportStream,
{
    let id = SessionId::next();
    let identity = resolve_identity(identity).to_string();
    let (outbound_tx, outbound_rx) = mpsc::channel(config.queue_capacity.max(1));
    let liveness = Arc::new(Liveness::new());
    let cancel = CancellationToken::new();

    hub.register(SessionHandle::new(id.clone(), identity.clone(), outbound_tx)).await;
    debug!(session_id = %id, identity = %identity, "session started");

    let writer = tokio::spawn(write_pump(
        id.clone(),
        sink,
        outbound_rx,
        Arc::clone(&liveness),
        cancel.clone(),
        config.clone(),
    ));
    let reader = tokio::spawn(read_pump(
        id.clone(),
        stream,
        hub.clone(),
        Arc::clone(&liveness),
        cancel,
        config.clone(),
    ));

    SessionTasks {
        id,
        liveness,
        reader,
        writer,
    }
}

async fn send_with_deadline<S: TransportSink>(
    sink: &mut S,
    frame: Frame,
    deadline: Duration,
) -> Result<(), TransportError> {
    match tokio::time::timeout(deadline, sink.send(frame)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::DeadlineExceeded(deadline)),
    }
}

/// # Write Pump
///
/// The only code path that writes to the transport. Exits when the queue is
/// closed, a write fails, or the reader stopped first.
pub async fn write_pump<S: TransportSink>(
    id: SessionId,
    mut sink: S,
    mut outbound: mpsc::Receiver<Arc<str>>,
    liveness: Arc<Liveness>,
    cancel: CancellationToken,
    config: SessionConfig,
) -> CloseReason {
    let mut keepalive = tokio::time::interval_at(Instant::now() + config.ping_period, config.ping_period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break CloseReason::Cancelled,
            next = outbound.recv() => match next {
                Some(message) => {
                    if let Err(e) = send_with_deadline(&mut sink, Frame::Text(message.to_string()), config.write_deadline).await {
                        break CloseReason::WriteFailed(e.to_string());
                    }
                    liveness.mark_write();
                    counter!(telemetry::WS_MESSAGES_TOTAL, "type" => "server", "direction" => "outbound").increment(1);
                }
                None => {
                    // Hub dropped the sender: unregistered or evicted.
                    let _ = send_with_deadline(&mut sink, Frame::Close, config.write_deadline).await;
                    break CloseReason::QueueClosed;
                }
            },
            _ = keepalive.tick() => {
                if let Err(e) = send_with_deadline(&mut sink, Frame::Ping(Vec::new()), config.write_deadline).await {
                    break CloseReason::WriteFailed(e.to_string());
                }
                liveness.mark_write();
            }
        }
    };

    cancel.cancel();
    let _ = tokio::time::timeout(config.write_deadline, sink.close()).await;
    debug!(
        session_id = %id,
        reason = %reason,
        since_write_ms = liveness.since_write().as_millis() as u64,
        "writer stopped"
    );
    reason
}

/// # Read Pump
///
/// Consumes client frames until the session ends, then unregisters it.
pub async fn read_pump<R: TransportStream>(
    id: SessionId,
    mut stream: R,
    hub: Hub,
    liveness: Arc<Liveness>,
    cancel: CancellationToken,
    config: SessionConfig,
) -> CloseReason {
    let reason = loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break CloseReason::Cancelled,
            next = tokio::time::timeout(config.read_deadline, stream.next()) => next,
        };

        let frame = match next {
            Err(_) => break CloseReason::ReadDeadline,
            Ok(None) => break CloseReason::PeerClosed,
            Ok(Some(Err(e))) => break CloseReason::ReadFailed(e.to_string()),
            Ok(Some(Ok(frame))) => frame,
        };
        liveness.mark_read();

        if frame.len() > config.max_message_size {
            break CloseReason::Protocol(format!(
                "message of {} bytes exceeds limit of {}",
                frame.len(),
                config.max_message_size
            ));
        }

        match frame {
            Frame::Close => break CloseReason::PeerClosed,
            Frame::Text(text) => handle_inbound(&id, &text),
            Frame::Binary(_) | Frame::Ping(_) | Frame::Pong(_) => {}
        }
    };

    cancel.cancel();
    hub.unregister(id.clone()).await;

    match &reason {
        CloseReason::ReadDeadline | CloseReason::Protocol(_) | CloseReason::ReadFailed(_) => {
            warn!(session_id = %id, reason = %reason, "session torn down");
            counter!(telemetry::WS_EVICTIONS_TOTAL, "reason" => "transport").increment(1);
        }
        _ => info!(session_id = %id, reason = %reason, "session closed"),
    }
    reason
}

fn handle_inbound(id: &SessionId, text: &str) {
    counter!(telemetry::WS_MESSAGES_TOTAL, "type" => "client", "direction" => "inbound").increment(1);
    match serde_json::from_str::<Envelope>(text) {
        Ok(envelope) => debug!(session_id = %id, kind = %envelope.kind, "client message received"),
        Err(e) => debug!(session_id = %id, error = %e, "undecodable client message ignored"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hub::HubConfig;
    use crate::core::transport::memory;
    use futures_util::FutureExt;
    use serde_json::{Value, json};

    fn text_of(frame: Frame) -> Value {
        match frame {
            Frame::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    async fn next_text(peer: &mut memory::Peer) -> Value {
        loop {
            match peer.from_server.next().await.unwrap() {
                Frame::Ping(_) => continue,
                frame => return text_of(frame),
            }
        }
    }

    #[test]
    fn liveness_tracks_reads_and_writes() {
        let liveness = Liveness::new();
        liveness.mark_read();
        liveness.mark_write();
        assert!(liveness.since_read() < Duration::from_secs(1));
        assert!(liveness.since_write() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn session_receives_welcome_then_broadcasts_in_order() {
        let (hub, _task) = Hub::spawn(HubConfig::default());
        let (sink, stream, mut peer) = memory::pair();
        let tasks = run_session(&hub, sink, stream, Some("reader-1"), &SessionConfig::default()).await;

        assert_eq!(next_text(&mut peer).await["type"], "welcome");
        assert!(hub.contains(&tasks.id).await);

        for m in ["a", "b", "c"] {
            let _ = hub.broadcast(&Envelope::new("note", json!(m))).await;
        }
        for m in ["a", "b", "c"] {
            assert_eq!(next_text(&mut peer).await["data"], m);
        }
    }

    #[tokio::test]
    async fn peer_disconnect_unregisters_and_closes_writer() {
        let (hub, _task) = Hub::spawn(HubConfig::default());
        let (sink, stream, mut peer) = memory::pair();
        let tasks = run_session(&hub, sink, stream, None, &SessionConfig::default()).await;
        assert_eq!(next_text(&mut peer).await["type"], "welcome");

        drop(peer.to_server);
        assert_eq!(tasks.reader.await.unwrap(), CloseReason::PeerClosed);
        assert_eq!(hub.session_count().await, 0);

        let writer = tasks.writer.await.unwrap();
        assert!(matches!(writer, CloseReason::QueueClosed | CloseReason::Cancelled));
    }

    #[tokio::test]
    async fn hub_unregister_sends_close_frame() {
        let (hub, _task) = Hub::spawn(HubConfig::default());
        let (sink, stream, mut peer) = memory::pair();
        let tasks = run_session(&hub, sink, stream, None, &SessionConfig::default()).await;
        assert_eq!(next_text(&mut peer).await["type"], "welcome");

        hub.unregister(tasks.id.clone()).await;
        assert_eq!(tasks.writer.await.unwrap(), CloseReason::QueueClosed);
        assert_eq!(peer.from_server.next().await, Some(Frame::Close));
        assert_eq!(tasks.reader.await.unwrap(), CloseReason::Cancelled);
    }

    #[tokio::test]
    async fn oversized_message_is_a_protocol_violation() {
        let (hub, _task) = Hub::spawn(HubConfig::default());
        let (sink, stream, peer) = memory::pair();
        let config = SessionConfig {
            max_message_size: 16,
            ..SessionConfig::default()
        };
        let tasks = run_session(&hub, sink, stream, None, &config).await;

        peer.to_server.unbounded_send(Ok(Frame::Text("x".repeat(17)))).unwrap();
        assert!(matches!(tasks.reader.await.unwrap(), CloseReason::Protocol(_)));
        assert_eq!(hub.session_count().await, 0);
    }

    #[tokio::test]
    async fn client_messages_keep_session_open() {
        let (hub, _task) = Hub::spawn(HubConfig::default());
        let (sink, stream, peer) = memory::pair();
        let tasks = run_session(&hub, sink, stream, None, &SessionConfig::default()).await;

        peer.to_server
            .unbounded_send(Ok(Frame::Text(r#"{"type":"preferences","data":{}}"#.into())))
            .unwrap();
        peer.to_server.unbounded_send(Ok(Frame::Text("not json".into()))).unwrap();
        tokio::task::yield_now().await;
        assert!(hub.contains(&tasks.id).await);
    }

    #[tokio::test]
    async fn transport_error_tears_session_down() {
        let (hub, _task) = Hub::spawn(HubConfig::default());
        let (sink, stream, peer) = memory::pair();
        let tasks = run_session(&hub, sink, stream, None, &SessionConfig::default()).await;

        peer.to_server
            .unbounded_send(Err(TransportError::Io("connection reset".into())))
            .unwrap();
        assert!(matches!(tasks.reader.await.unwrap(), CloseReason::ReadFailed(_)));
        assert!(!hub.contains(&tasks.id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_is_evicted_after_read_deadline() {
        let (hub, _task) = Hub::spawn(HubConfig::default());
        let (sink, stream, mut peer) = memory::pair();
        let config = SessionConfig::default();
        let tasks = run_session(&hub, sink, stream, None, &config).await;
        assert_eq!(hub.session_count().await, 1);

        tokio::time::sleep(config.ping_period + config.read_deadline).await;
        assert_eq!(hub.session_count().await, 0);
        assert_eq!(tasks.reader.await.unwrap(), CloseReason::ReadDeadline);

        // The writer probed at least once before giving up.
        let mut saw_ping = false;
        while let Some(Some(frame)) = peer.from_server.next().now_or_never() {
            saw_ping |= matches!(frame, Frame::Ping(_));
        }
        assert!(saw_ping);
    }

    #[tokio::test(start_paused = true)]
    async fn responsive_peer_survives_many_keepalive_rounds() {
        let (hub, _task) = Hub::spawn(HubConfig::default());
        let (sink, stream, peer) = memory::pair();
        let config = SessionConfig::default();
        let tasks = run_session(&hub, sink, stream, None, &config).await;

        let memory::Peer { mut from_server, to_server } = peer;
        let _responder = tokio::spawn(async move {
            while let Some(frame) = from_server.next().await {
                if let Frame::Ping(payload) = frame {
                    let _ = to_server.unbounded_send(Ok(Frame::Pong(payload)));
                }
            }
        });

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(hub.contains(&tasks.id).await);
        assert!(tasks.liveness.since_read() <= config.ping_period);
        assert!(tasks.liveness.since_write() <= config.ping_period);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_writer_is_torn_down_after_write_deadline() {
        let (hub, _task) = Hub::spawn(HubConfig::default());
        // Nobody drains the receiver, so writes stall.
        let (tx, _rx) = futures_channel::mpsc::channel::<Frame>(0);
        let sink = tx.sink_map_err(|e| TransportError::Closed(e.to_string()));
        let (_unused_sink, stream, _peer) = memory::pair();
        let config = SessionConfig::default();
        let tasks = run_session(&hub, sink, stream, None, &config).await;

        let _ = hub.broadcast(&Envelope::new("note", json!(1))).await;
        let _ = hub.broadcast(&Envelope::new("note", json!(2))).await;

        tokio::time::sleep(config.write_deadline * 2).await;
        assert!(matches!(tasks.writer.await.unwrap(), CloseReason::WriteFailed(_)));
        assert_eq!(tasks.reader.await.unwrap(), CloseReason::Cancelled);
        assert_eq!(hub.session_count().await, 0);
    }
}
