//! In-memory transport.
//!
//! A [`MemoryTransport`] is the hub side of a duplex pipe; the matching
//! [`MemoryPeer`] plays the client. Used to drive the hub in tests and
//! benchmarks without sockets.

use async_trait::async_trait;
use chorus_protocol::{codec, ClientEnvelope, ProtocolError, ServerEnvelope, WireFormat};
use tokio::sync::mpsc;

use crate::traits::{FrameReader, FrameWriter, Transport, TransportError, WireMessage};

/// Hub side of an in-memory connection.
pub struct MemoryTransport {
    inbound: mpsc::Receiver<WireMessage>,
    outbound: mpsc::Sender<WireMessage>,
}

/// Client side of an in-memory connection.
pub struct MemoryPeer {
    outbound: Option<mpsc::Sender<WireMessage>>,
    inbound: mpsc::Receiver<WireMessage>,
}

impl MemoryTransport {
    /// Create a connected transport/peer pair.
    ///
    /// `capacity` bounds the frames buffered in each direction.
    #[must_use]
    pub fn pair(capacity: usize) -> (MemoryTransport, MemoryPeer) {
        let (to_hub, from_peer) = mpsc::channel(capacity);
        let (to_peer, from_hub) = mpsc::channel(capacity);
        (
            MemoryTransport {
                inbound: from_peer,
                outbound: to_peer,
            },
            MemoryPeer {
                outbound: Some(to_hub),
                inbound: from_hub,
            },
        )
    }
}

impl Transport for MemoryTransport {
    type Reader = MemoryReader;
    type Writer = MemoryWriter;

    fn name(&self) -> &'static str {
        "memory"
    }

    fn split(self) -> (Self::Reader, Self::Writer) {
        (
            MemoryReader { rx: self.inbound },
            MemoryWriter {
                tx: Some(self.outbound),
            },
        )
    }
}

/// Reading half of a [`MemoryTransport`].
pub struct MemoryReader {
    rx: mpsc::Receiver<WireMessage>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn recv(&mut self) -> Result<Option<WireMessage>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

/// Writing half of a [`MemoryTransport`].
pub struct MemoryWriter {
    tx: Option<mpsc::Sender<WireMessage>>,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(message)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}

impl MemoryPeer {
    /// Send a raw message to the hub side.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub side is gone or the peer was closed.
    pub async fn send(&self, message: WireMessage) -> Result<(), TransportError> {
        let tx = self.outbound.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(message)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Encode and send a client envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the hub side is gone.
    pub async fn send_envelope(
        &self,
        envelope: &ClientEnvelope,
        format: WireFormat,
    ) -> Result<(), TransportError> {
        let data = codec::encode_client(envelope, format)?;
        self.send(WireMessage::from_encoded(format, data)?).await
    }

    /// Receive the next raw message, or `None` once the hub side closed.
    pub async fn recv(&mut self) -> Option<WireMessage> {
        self.inbound.recv().await
    }

    /// Receive a message if one is already buffered.
    pub fn try_recv(&mut self) -> Option<WireMessage> {
        self.inbound.try_recv().ok()
    }

    /// Receive the next server envelope, skipping heartbeats.
    ///
    /// Returns `None` once the hub side closed.
    ///
    /// # Errors
    ///
    /// Returns an error if a data frame does not decode.
    pub async fn recv_envelope(&mut self) -> Result<Option<ServerEnvelope>, ProtocolError> {
        while let Some(message) = self.inbound.recv().await {
            match message {
                WireMessage::Text(text) => {
                    return codec::decode_server(text.as_bytes(), WireFormat::Json).map(Some)
                }
                WireMessage::Binary(data) => {
                    return codec::decode_server(&data, WireFormat::MessagePack).map(Some)
                }
                WireMessage::Ping(_) | WireMessage::Pong(_) => continue,
                WireMessage::Close => return Ok(None),
            }
        }
        Ok(None)
    }

    /// Stop sending; the hub side reads end-of-stream.
    pub fn close(&mut self) {
        self.outbound = None;
    }
}
