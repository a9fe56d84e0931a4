//! Envelope types for the Chorus protocol.
//!
//! Every frame on the wire is an envelope: a `type` discriminator plus a
//! `payload` object whose fields are camelCase. Client and server speak
//! different sets of envelopes, so each direction has its own enum and a
//! frame is decoded straight into the variant it names.

use crate::ids::{RoomId, UserId};
use serde::{Deserialize, Serialize};

/// Envelopes sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientEnvelope {
    /// Join a room.
    JoinRoom(RoomRef),

    /// Leave a room.
    LeaveRoom(RoomRef),

    /// Send a chat message to a room.
    ChatMessage(ChatMessage),

    /// Signal that the user started or stopped typing.
    TypingStatus(TypingUpdate),

    /// A well-formed envelope with a discriminator this server does not know.
    #[serde(skip)]
    Unknown(String),
}

impl ClientEnvelope {
    /// Discriminators this version decodes.
    pub const KINDS: [&'static str; 4] = ["join_room", "leave_room", "chat_message", "typing_status"];

    /// Get the wire discriminator.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            ClientEnvelope::JoinRoom(_) => "join_room",
            ClientEnvelope::LeaveRoom(_) => "leave_room",
            ClientEnvelope::ChatMessage(_) => "chat_message",
            ClientEnvelope::TypingStatus(_) => "typing_status",
            ClientEnvelope::Unknown(kind) => kind,
        }
    }

    /// Create a `join_room` envelope.
    #[must_use]
    pub fn join(room_id: RoomId) -> Self {
        ClientEnvelope::JoinRoom(RoomRef { room_id })
    }

    /// Create a `leave_room` envelope.
    #[must_use]
    pub fn leave(room_id: RoomId) -> Self {
        ClientEnvelope::LeaveRoom(RoomRef { room_id })
    }

    /// Create a `chat_message` envelope.
    #[must_use]
    pub fn chat(room_id: RoomId, content: impl Into<String>) -> Self {
        ClientEnvelope::ChatMessage(ChatMessage {
            room_id,
            content: content.into(),
        })
    }

    /// Create a `typing_status` envelope.
    #[must_use]
    pub fn typing(room_id: RoomId, is_typing: bool) -> Self {
        ClientEnvelope::TypingStatus(TypingUpdate { room_id, is_typing })
    }
}

/// Payload naming a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRef {
    pub room_id: RoomId,
}

/// Payload of an inbound chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub room_id: RoomId,
    pub content: String,
}

/// Payload of an inbound typing update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingUpdate {
    pub room_id: RoomId,
    pub is_typing: bool,
}

/// Envelopes sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEnvelope {
    /// A chat message posted to a room.
    NewMessage(NewMessage),

    /// Another member's typing state changed.
    TypingStatus(TypingNotice),

    /// A user came online or went offline.
    UserPresence(PresenceNotice),

    /// The receiving connection's session was replaced or revoked.
    SessionInvalidated(SessionInvalidated),

    /// Users online when the connection was established.
    OnlineUsers(OnlineUsers),
}

impl ServerEnvelope {
    /// Get the wire discriminator.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEnvelope::NewMessage(_) => "new_message",
            ServerEnvelope::TypingStatus(_) => "typing_status",
            ServerEnvelope::UserPresence(_) => "user_presence",
            ServerEnvelope::SessionInvalidated(_) => "session_invalidated",
            ServerEnvelope::OnlineUsers(_) => "online_users",
        }
    }

    /// Create a `new_message` envelope.
    #[must_use]
    pub fn new_message(
        room_id: RoomId,
        sender: UserId,
        content: impl Into<String>,
        sent_at: u64,
    ) -> Self {
        ServerEnvelope::NewMessage(NewMessage {
            room_id,
            sender,
            content: content.into(),
            sent_at,
        })
    }

    /// Create a `typing_status` envelope.
    #[must_use]
    pub fn typing(
        room_id: RoomId,
        user_id: UserId,
        is_typing: bool,
        display_name: Option<String>,
        avatar_url: Option<String>,
    ) -> Self {
        ServerEnvelope::TypingStatus(TypingNotice {
            room_id,
            user_id,
            is_typing,
            display_name,
            avatar_url,
        })
    }

    /// Create a `user_presence` envelope.
    #[must_use]
    pub fn presence(user_id: UserId, status: PresenceStatus) -> Self {
        ServerEnvelope::UserPresence(PresenceNotice { user_id, status })
    }

    /// Create a `session_invalidated` envelope.
    #[must_use]
    pub fn session_invalidated(reason: impl Into<String>) -> Self {
        ServerEnvelope::SessionInvalidated(SessionInvalidated {
            reason: reason.into(),
        })
    }

    /// Create an `online_users` envelope.
    #[must_use]
    pub fn online_users(user_ids: Vec<UserId>) -> Self {
        ServerEnvelope::OnlineUsers(OnlineUsers { user_ids })
    }
}

/// Payload of an outbound chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub room_id: RoomId,
    pub sender: UserId,
    pub content: String,
    /// Unix time in milliseconds.
    pub sent_at: u64,
}

/// Payload of an outbound typing notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub is_typing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Online/offline status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Payload of a presence change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceNotice {
    pub user_id: UserId,
    pub status: PresenceStatus,
}

/// Payload of a session invalidation notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInvalidated {
    pub reason: String,
}

/// Payload of the online snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUsers {
    pub user_ids: Vec<UserId>,
}
