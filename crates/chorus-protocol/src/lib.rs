//! # chorus-protocol
//!
//! Wire protocol definitions for the Chorus realtime hub.
//!
//! This crate defines what travels between chat clients and the hub:
//! validated identifiers, the envelope types for each direction, and the
//! codec for the two supported wire formats.
//!
//! ## Envelopes
//!
//! - `join_room` / `leave_room` - Room membership
//! - `chat_message` / `new_message` - Chat content
//! - `typing_status` - Typing indicators
//! - `user_presence` / `online_users` - Presence
//! - `session_invalidated` - Forced logout notice
//!
//! ## Example
//!
//! ```rust
//! use chorus_protocol::{codec, ClientEnvelope, WireFormat};
//!
//! let envelope = ClientEnvelope::chat("alice-bob".parse().unwrap(), "hi");
//!
//! let encoded = codec::encode_client(&envelope, WireFormat::Json).unwrap();
//! let decoded = codec::decode_client(&encoded, WireFormat::Json, 1024).unwrap();
//! assert_eq!(decoded, envelope);
//! ```

pub mod codec;
pub mod envelope;
pub mod ids;

pub use codec::{EnvelopeCodec, ProtocolError, WireFormat, DEFAULT_MAX_FRAME_SIZE};
pub use envelope::{
    ChatMessage, ClientEnvelope, NewMessage, PresenceNotice, PresenceStatus, RoomRef,
    ServerEnvelope, TypingNotice, TypingUpdate,
};
pub use ids::{GroupId, IdError, RoomId, RoomKind, UserId};
