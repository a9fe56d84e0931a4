//! WebSocket transport over tokio-tungstenite streams.
//!
//! Used by native clients, load generators and tests that drive a hub over a
//! real WebSocket handshake.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

use crate::traits::{FrameReader, FrameWriter, Transport, TransportError, WireMessage};

/// A tokio-tungstenite WebSocket over any byte stream.
pub struct TungsteniteTransport<S> {
    stream: WebSocketStream<S>,
}

impl<S> TungsteniteTransport<S> {
    /// Wrap an established WebSocket stream.
    #[must_use]
    pub fn new(stream: WebSocketStream<S>) -> Self {
        Self { stream }
    }
}

impl<S> Transport for TungsteniteTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Reader = TungsteniteReader<S>;
    type Writer = TungsteniteWriter<S>;

    fn name(&self) -> &'static str {
        "websocket"
    }

    fn split(self) -> (Self::Reader, Self::Writer) {
        let (sink, stream) = self.stream.split();
        (TungsteniteReader { stream }, TungsteniteWriter { sink })
    }
}

/// Reading half of a [`TungsteniteTransport`].
pub struct TungsteniteReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

#[async_trait]
impl<S> FrameReader for TungsteniteReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn recv(&mut self) -> Result<Option<WireMessage>, TransportError> {
        loop {
            return match self.stream.next().await {
                Some(Ok(Message::Text(text))) => Ok(Some(WireMessage::Text(text))),
                Some(Ok(Message::Binary(data))) => Ok(Some(WireMessage::Binary(Bytes::from(data)))),
                Some(Ok(Message::Ping(data))) => Ok(Some(WireMessage::Ping(Bytes::from(data)))),
                Some(Ok(Message::Pong(data))) => Ok(Some(WireMessage::Pong(Bytes::from(data)))),
                Some(Ok(Message::Close(_))) => Ok(Some(WireMessage::Close)),
                // Raw frames only surface when reading with a custom config.
                Some(Ok(Message::Frame(_))) => continue,
                Some(Err(WsError::ConnectionClosed)) | None => {
                    debug!("WebSocket stream ended");
                    Ok(None)
                }
                Some(Err(e)) => Err(TransportError::ReceiveFailed(e.to_string())),
            };
        }
    }
}

/// Writing half of a [`TungsteniteTransport`].
pub struct TungsteniteWriter<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

#[async_trait]
impl<S> FrameWriter for TungsteniteWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError> {
        let message = match message {
            WireMessage::Text(text) => Message::Text(text),
            WireMessage::Binary(data) => Message::Binary(data.to_vec()),
            WireMessage::Ping(data) => Message::Ping(data.to_vec()),
            WireMessage::Pong(data) => Message::Pong(data.to_vec()),
            WireMessage::Close => Message::Close(None),
        };
        self.sink.send(message).await.map_err(|e| match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::ConnectionClosed,
            other => TransportError::SendFailed(other.to_string()),
        })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::Other(format!("Failed to close: {e}"))),
        }
    }
}
