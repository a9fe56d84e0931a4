//! Transport abstraction traits for Chorus.
//!
//! A transport is one duplex connection that can be split into a reading half
//! and a writing half, so that the hub's connection adapter can read and write
//! concurrently without locking.

use async_trait::async_trait;
use bytes::Bytes;
use chorus_protocol::WireFormat;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] chorus_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// One message on a message-oriented transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Bytes),
    /// Transport-level heartbeat.
    Ping(Bytes),
    /// Heartbeat reply.
    Pong(Bytes),
    /// The peer is closing.
    Close,
}

impl WireMessage {
    /// Wrap an encoded envelope in the frame type its format travels in.
    ///
    /// # Errors
    ///
    /// Returns an error if a JSON payload is not valid UTF-8.
    pub fn from_encoded(format: WireFormat, data: Bytes) -> Result<Self, TransportError> {
        match format {
            WireFormat::Json => String::from_utf8(data.to_vec())
                .map(WireMessage::Text)
                .map_err(|e| TransportError::Other(format!("JSON frame is not UTF-8: {e}"))),
            WireFormat::MessagePack => Ok(WireMessage::Binary(data)),
        }
    }

    /// Size of the frame payload in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            WireMessage::Text(text) => text.len(),
            WireMessage::Binary(data) | WireMessage::Ping(data) | WireMessage::Pong(data) => {
                data.len()
            }
            WireMessage::Close => 0,
        }
    }

    /// Check if the frame payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if this frame carries an envelope.
    #[must_use]
    pub fn is_data(&self) -> bool {
        matches!(self, WireMessage::Text(_) | WireMessage::Binary(_))
    }
}

/// The reading half of a transport.
#[async_trait]
pub trait FrameReader: Send {
    /// Receive the next message.
    ///
    /// Returns `None` if the connection is closed cleanly.
    async fn recv(&mut self) -> Result<Option<WireMessage>, TransportError>;
}

/// The writing half of a transport.
#[async_trait]
pub trait FrameWriter: Send {
    /// Send one message.
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// A duplex connection to one client.
pub trait Transport: Send + 'static {
    /// Reading half.
    type Reader: FrameReader + 'static;
    /// Writing half.
    type Writer: FrameWriter + 'static;

    /// Get the transport name (e.g., "websocket", "memory").
    fn name(&self) -> &'static str;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }

    /// Split into independently usable halves.
    fn split(self) -> (Self::Reader, Self::Writer);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_encoded_picks_frame_type() {
        let json = WireMessage::from_encoded(WireFormat::Json, Bytes::from_static(b"{}")).unwrap();
        assert_eq!(json, WireMessage::Text("{}".to_string()));

        let packed =
            WireMessage::from_encoded(WireFormat::MessagePack, Bytes::from_static(&[0x80])).unwrap();
        assert_eq!(packed, WireMessage::Binary(Bytes::from_static(&[0x80])));
    }

    #[test]
    fn test_invalid_utf8_json_rejected() {
        let result = WireMessage::from_encoded(WireFormat::Json, Bytes::from_static(&[0xff, 0xfe]));
        assert!(result.is_err());
    }

    #[test]
    fn test_message_len() {
        assert_eq!(WireMessage::Text("abc".into()).len(), 3);
        assert!(WireMessage::Close.is_empty());
        assert!(WireMessage::Binary(Bytes::new()).is_data());
        assert!(!WireMessage::Ping(Bytes::new()).is_data());
    }
}
