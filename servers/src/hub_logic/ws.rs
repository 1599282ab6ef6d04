//! # WebSocket Adapter
//!
//! Splits an Axum `WebSocket` into the sink and stream halves a hub session is
//! driven over, translating between `Message` and `Frame`.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt, future};

use lib_common::core::transport::{Frame, TransportError, TransportSink, TransportStream};

pub fn split(socket: WebSocket) -> (impl TransportSink, impl TransportStream) {
    let (sink, stream) = socket.split();

    let sink = sink
        .sink_map_err(|e| TransportError::Io(e.to_string()))
        .with(|frame: Frame| future::ready(Ok::<_, TransportError>(into_message(frame))));

    let stream = stream.map(|next| next.map(from_message).map_err(|e| TransportError::Io(e.to_string())));

    (sink, stream)
}

fn into_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(bytes) => Message::Binary(bytes.into()),
        Frame::Ping(bytes) => Message::Ping(bytes.into()),
        Frame::Pong(bytes) => Message::Pong(bytes.into()),
        Frame::Close => Message::Close(None),
    }
}

fn from_message(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Text(text.as_str().to_owned()),
        Message::Binary(bytes) => Frame::Binary(bytes.to_vec()),
        Message::Ping(bytes) => Frame::Ping(bytes.to_vec()),
        Message::Pong(bytes) => Frame::Pong(bytes.to_vec()),
        Message::Close(_) => Frame::Close,
    }
}
