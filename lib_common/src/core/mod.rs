//! # Core Engine Module
//!
//! The real-time fan-out engine: a single hub that owns the set of live
//! sessions, and the session tasks that move envelopes between the hub and a
//! client transport.
//!
//! ## Core Components:
//!
//! - **`hub`**: the registry owner. Serializes registration, unregistration
//!   and broadcast, and evicts any session whose outbound queue is full.
//!
//! - **`session`**: the reader/writer task pair per client, with keepalive
//!   probing and read/write deadlines.
//!
//! - **`envelope`**: the JSON message shape pushed to clients.
//!
//! - **`transport`**: the `Sink`/`Stream` boundary a session is driven over,
//!   independent of the wire protocol.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// The JSON envelope exchanged with clients.
pub mod envelope;
/// The single owner of the live session set.
pub mod hub;
/// Per-client reader and writer tasks.
pub mod session;
/// The transport halves a session is driven over.
pub mod transport;

// --- Public API Re-exports ---
pub use envelope::{Envelope, StreamStatus, StreamUpdate};
pub use hub::{BroadcastReport, Hub, HubConfig, SessionHandle, SessionId};
pub use session::{CloseReason, Liveness, SessionConfig, SessionTasks, run_session};
pub use transport::{Frame, TransportError, TransportSink, TransportStream};
