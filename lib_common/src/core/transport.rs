//! # Session Transport Boundary
//!
//! The hub never talks to a concrete wire protocol. A session is driven over a
//! pair of halves: a `Sink<Frame>` that only the writer task owns and a
//! `Stream<Item = Result<Frame, TransportError>>` that only the reader task
//! owns. The servers crate adapts an Axum WebSocket to this shape; the tests
//! use in-memory `futures-channel` pairs.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use futures_util::{Sink, Stream};
use thiserror::Error;

/// A single message-framed unit exchanged with a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 application payload.
    Text(String),
    /// Opaque binary payload.
    Binary(Vec<u8>),
    /// Liveness probe. Sent by the writer on every keepalive tick.
    Ping(Vec<u8>),
    /// Liveness acknowledgment.
    Pong(Vec<u8>),
    /// Orderly close of the channel.
    Close,
}

impl Frame {
    /// Size of the frame body in bytes. Control frames count their payload.
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(bytes) | Frame::Ping(bytes) | Frame::Pong(bytes) => bytes.len(),
            Frame::Close => 0,
        }
    }

    /// Whether the frame carries no body.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Faults raised by a transport half.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer or the network dropped the channel.
    #[error("transport closed: {0}")]
    Closed(String),
    /// A send or receive did not complete within its deadline.
    #[error("transport deadline of {0:?} exceeded")]
    DeadlineExceeded(std::time::Duration),
    /// Any other I/O failure reported by the underlying socket.
    #[error("transport I/O error: {0}")]
    Io(String),
}

/// Send half of a session transport. Owned exclusively by the writer task.
pub trait TransportSink: Sink<Frame, Error = TransportError> + Send + Unpin + 'static {}

impl<T> TransportSink for T where T: Sink<Frame, Error = TransportError> + Send + Unpin + 'static {}

/// Receive half of a session transport. Owned exclusively by the reader task.
pub trait TransportStream:
    Stream<Item = Result<Frame, TransportError>> + Send + Unpin + 'static
{
}

impl<T> TransportStream for T where
    T: Stream<Item = Result<Frame, TransportError>> + Send + Unpin + 'static
{
}

#[cfg(test)]
pub(crate) mod memory {
    //! In-memory transport used by the hub and session tests.

    use super::{Frame, TransportError};
    use futures_channel::mpsc;
    use futures_util::{SinkExt, StreamExt};

    /// Client-side ends of an in-memory transport.
    pub struct Peer {
        /// Frames the server wrote.
        pub from_server: mpsc::UnboundedReceiver<Frame>,
        /// Frames the client sends to the server.
        pub to_server: mpsc::UnboundedSender<Result<Frame, TransportError>>,
    }

    /// Build a connected (sink, stream, peer) triple.
    pub fn pair() -> (
        impl super::TransportSink,
        impl super::TransportStream,
        Peer,
    ) {
        let (server_tx, from_server) = mpsc::unbounded::<Frame>();
        let (to_server, server_rx) = mpsc::unbounded::<Result<Frame, TransportError>>();
        let sink = server_tx.sink_map_err(|e| TransportError::Closed(e.to_string()));
        (sink, server_rx, Peer { from_server, to_server })
    }

    #[test]
    fn frame_length() {
        assert_eq!(Frame::Text("abc".into()).len(), 3);
        assert_eq!(Frame::Ping(vec![1, 2]).len(), 2);
        assert!(Frame::Close.is_empty());
    }

    #[tokio::test]
    async fn pair_carries_frames_both_ways() {
        let (mut sink, mut stream, mut peer) = pair();
        sink.send(Frame::Text("down".into())).await.unwrap();
        assert_eq!(peer.from_server.next().await, Some(Frame::Text("down".into())));

        peer.to_server.unbounded_send(Ok(Frame::Text("up".into()))).unwrap();
        let got = stream.next().await.unwrap().unwrap();
        assert_eq!(got, Frame::Text("up".into()));
    }
}
