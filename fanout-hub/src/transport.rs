//! Framed duplex channel consumed by the connection pumps.
//!
//! A transport is handed to the pumps as two halves: a [`Stream`] of
//! [`Inbound`] frames for the inbound pump and a [`Sink`] of [`Outbound`]
//! frames for the outbound pump. Deadlines are applied by the pumps, so any
//! stream/sink pair works; [`split_websocket`] adapts an axum WebSocket.

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt, future};

use crate::error::TransportError;

/// Frames the peer can send us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Data(Vec<u8>),
    Pong,
    Close,
}

/// Frames we send the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Ping,
    Close,
}

impl From<Outbound> for Message {
    fn from(frame: Outbound) -> Self {
        match frame {
            Outbound::Text(text) => Message::Text(text),
            Outbound::Ping => Message::Ping(Vec::new()),
            Outbound::Close => Message::Close(None),
        }
    }
}

/// Splits an upgraded WebSocket into the halves the pumps consume.
///
/// Text and binary messages are both data. Peer pings are answered by the
/// WebSocket layer itself and never surface here.
pub fn split_websocket(
    socket: WebSocket,
) -> (
    impl Stream<Item = Result<Inbound, TransportError>> + Unpin + Send + 'static,
    impl Sink<Outbound, Error = TransportError> + Unpin + Send + 'static,
) {
    let (sink, stream) = socket.split();

    let source = stream.filter_map(|message| future::ready(inbound_frame(message)));
    let sink = sink
        .sink_map_err(TransportError::from)
        .with(|frame: Outbound| future::ready(Ok::<_, TransportError>(Message::from(frame))));

    (source, sink)
}

fn inbound_frame(message: Result<Message, axum::Error>) -> Option<Result<Inbound, TransportError>> {
    match message {
        Ok(Message::Text(text)) => Some(Ok(Inbound::Data(text.into_bytes()))),
        Ok(Message::Binary(bytes)) => Some(Ok(Inbound::Data(bytes))),
        Ok(Message::Pong(_)) => Some(Ok(Inbound::Pong)),
        Ok(Message::Ping(_)) => None,
        Ok(Message::Close(_)) => Some(Ok(Inbound::Close)),
        Err(err) => Some(Err(err.into())),
    }
}
