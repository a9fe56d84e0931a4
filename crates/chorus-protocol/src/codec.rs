//! Codec for encoding and decoding Chorus envelopes.
//!
//! Two wire formats are supported: JSON carried in text frames, and
//! MessagePack (with named fields) carried in binary frames. Both encode the
//! same envelope shape.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::envelope::{ClientEnvelope, ServerEnvelope};

/// Default maximum inbound frame size (64 KiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds the configured maximum size.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Invalid frame data.
    #[error("Invalid frame: {0}")]
    Invalid(String),
}

/// Wire format of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WireFormat {
    /// JSON in text frames.
    #[default]
    #[serde(rename = "json")]
    Json,
    /// MessagePack in binary frames.
    #[serde(rename = "msgpack")]
    MessagePack,
}

impl WireFormat {
    /// Get the format name used in configuration and query strings.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            WireFormat::Json => "json",
            WireFormat::MessagePack => "msgpack",
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WireFormat {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(WireFormat::Json),
            "msgpack" | "messagepack" => Ok(WireFormat::MessagePack),
            other => Err(ProtocolError::Invalid(format!("unknown wire format '{other}'"))),
        }
    }
}

/// Only the discriminator, used to recognise envelopes from newer clients.
#[derive(Deserialize)]
struct Tag {
    #[serde(rename = "type")]
    kind: String,
}

fn to_bytes<T: Serialize>(value: &T, format: WireFormat) -> Result<Bytes, ProtocolError> {
    let data = match format {
        WireFormat::Json => serde_json::to_vec(value)?,
        WireFormat::MessagePack => rmp_serde::to_vec_named(value)?,
    };
    Ok(Bytes::from(data))
}

fn from_slice<T: DeserializeOwned>(data: &[u8], format: WireFormat) -> Result<T, ProtocolError> {
    match format {
        WireFormat::Json => Ok(serde_json::from_slice(data)?),
        WireFormat::MessagePack => Ok(rmp_serde::from_slice(data)?),
    }
}

/// Encode a server envelope.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_server(envelope: &ServerEnvelope, format: WireFormat) -> Result<Bytes, ProtocolError> {
    to_bytes(envelope, format)
}

/// Encode a client envelope.
///
/// # Errors
///
/// Returns an error if serialization fails or the envelope is
/// [`ClientEnvelope::Unknown`], which has no wire form.
pub fn encode_client(envelope: &ClientEnvelope, format: WireFormat) -> Result<Bytes, ProtocolError> {
    if let ClientEnvelope::Unknown(kind) = envelope {
        return Err(ProtocolError::Invalid(format!("cannot encode unknown envelope '{kind}'")));
    }
    to_bytes(envelope, format)
}

/// Decode a client envelope.
///
/// Envelopes whose discriminator is not one of [`ClientEnvelope::KINDS`]
/// decode to [`ClientEnvelope::Unknown`] instead of failing.
///
/// # Errors
///
/// Returns an error if the frame is larger than `max_frame_size`, is not a
/// well-formed envelope, or a known envelope has a malformed payload.
pub fn decode_client(
    data: &[u8],
    format: WireFormat,
    max_frame_size: usize,
) -> Result<ClientEnvelope, ProtocolError> {
    if data.len() > max_frame_size {
        return Err(ProtocolError::FrameTooLarge {
            size: data.len(),
            max: max_frame_size,
        });
    }

    let tag: Tag = from_slice(data, format)?;
    if !ClientEnvelope::KINDS.contains(&tag.kind.as_str()) {
        return Ok(ClientEnvelope::Unknown(tag.kind));
    }

    from_slice(data, format)
}

/// Decode a server envelope.
///
/// # Errors
///
/// Returns an error if the data is not a valid server envelope.
pub fn decode_server(data: &[u8], format: WireFormat) -> Result<ServerEnvelope, ProtocolError> {
    from_slice(data, format)
}

/// Codec holding the inbound frame limit of one connection.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeCodec {
    max_frame_size: usize,
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl EnvelopeCodec {
    /// Create a codec with the given inbound frame limit.
    #[must_use]
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Get the inbound frame limit.
    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Decode an inbound client envelope.
    ///
    /// # Errors
    ///
    /// See [`decode_client`].
    pub fn decode(&self, data: &[u8], format: WireFormat) -> Result<ClientEnvelope, ProtocolError> {
        decode_client(data, format, self.max_frame_size)
    }
}
