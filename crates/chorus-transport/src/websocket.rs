//! WebSocket transport over axum's upgraded sockets.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tracing::debug;

use crate::traits::{FrameReader, FrameWriter, Transport, TransportError, WireMessage};

/// An upgraded axum WebSocket.
pub struct WebSocketTransport {
    socket: WebSocket,
    remote_addr: Option<SocketAddr>,
}

impl WebSocketTransport {
    /// Wrap an upgraded socket.
    #[must_use]
    pub fn new(socket: WebSocket) -> Self {
        Self {
            socket,
            remote_addr: None,
        }
    }

    /// Record the peer address for logging.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }
}

impl Transport for WebSocketTransport {
    type Reader = WebSocketReader;
    type Writer = WebSocketWriter;

    fn name(&self) -> &'static str {
        "websocket"
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }

    fn split(self) -> (Self::Reader, Self::Writer) {
        let (sink, stream) = self.socket.split();
        (
            WebSocketReader { stream },
            WebSocketWriter { sink, closed: false },
        )
    }
}

/// Reading half of a [`WebSocketTransport`].
pub struct WebSocketReader {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameReader for WebSocketReader {
    async fn recv(&mut self) -> Result<Option<WireMessage>, TransportError> {
        match self.stream.next().await {
            Some(Ok(message)) => Ok(Some(from_axum(message))),
            Some(Err(e)) => Err(TransportError::ReceiveFailed(e.to_string())),
            None => {
                debug!("WebSocket stream ended");
                Ok(None)
            }
        }
    }
}

/// Writing half of a [`WebSocketTransport`].
pub struct WebSocketWriter {
    sink: SplitSink<WebSocket, Message>,
    closed: bool,
}

#[async_trait]
impl FrameWriter for WebSocketWriter {
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        self.sink
            .send(into_axum(message))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::Other(format!("Failed to close: {e}")))
    }
}

fn from_axum(message: Message) -> WireMessage {
    match message {
        Message::Text(text) => WireMessage::Text(text),
        Message::Binary(data) => WireMessage::Binary(Bytes::from(data)),
        Message::Ping(data) => WireMessage::Ping(Bytes::from(data)),
        Message::Pong(data) => WireMessage::Pong(Bytes::from(data)),
        Message::Close(_) => WireMessage::Close,
    }
}

fn into_axum(message: WireMessage) -> Message {
    match message {
        WireMessage::Text(text) => Message::Text(text),
        WireMessage::Binary(data) => Message::Binary(data.to_vec()),
        WireMessage::Ping(data) => Message::Ping(data.to_vec()),
        WireMessage::Pong(data) => Message::Pong(data.to_vec()),
        WireMessage::Close => Message::Close(None),
    }
}
