//! User, group and room identifiers.
//!
//! Rooms are addressed on the wire by strings (`"alice-bob"`, `"group-7"`,
//! `"global"`). The string is parsed exactly once into a [`RoomId`] and every
//! later decision matches on the variant instead of looking at the string.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum user identifier length.
pub const MAX_USER_ID_LENGTH: usize = 128;

/// Maximum group identifier length.
pub const MAX_GROUP_ID_LENGTH: usize = 128;

/// Prefix of group room identifiers.
pub const GROUP_PREFIX: &str = "group-";

/// Wire name of the global presence room.
pub const GLOBAL_ROOM: &str = "global";

/// Separator between the two users of a direct room.
pub const DIRECT_SEPARATOR: char = '-';

/// User names that would make a room identifier ambiguous.
const RESERVED_USER_IDS: [&str; 2] = ["group", GLOBAL_ROOM];

/// Identifier validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// User identifier is empty.
    #[error("User id cannot be empty")]
    EmptyUserId,

    /// User identifier is too long.
    #[error("User id too long: {0} bytes")]
    UserIdTooLong(usize),

    /// User identifier contains the direct-room separator.
    #[error("User id cannot contain '{DIRECT_SEPARATOR}'")]
    SeparatorInUserId,

    /// User identifier is reserved.
    #[error("User id '{0}' is reserved")]
    ReservedUserId(String),

    /// Group identifier is empty.
    #[error("Group id cannot be empty")]
    EmptyGroupId,

    /// Group identifier is too long.
    #[error("Group id too long: {0} bytes")]
    GroupIdTooLong(usize),

    /// Identifier contains control characters.
    #[error("Identifier contains invalid characters")]
    InvalidCharacters,

    /// A direct room needs two distinct users.
    #[error("Direct room needs two distinct users")]
    SelfDirectRoom,

    /// The room identifier matches no known room kind.
    #[error("Malformed room id: {0}")]
    MalformedRoom(String),
}

fn has_control_chars(value: &str) -> bool {
    value.chars().any(char::is_control)
}

/// An authenticated user's identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Validate and wrap a user identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier is empty, too long, reserved, or
    /// contains the direct-room separator.
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        if id.is_empty() {
            return Err(IdError::EmptyUserId);
        }
        if id.len() > MAX_USER_ID_LENGTH {
            return Err(IdError::UserIdTooLong(id.len()));
        }
        if id.contains(DIRECT_SEPARATOR) {
            return Err(IdError::SeparatorInUserId);
        }
        if has_control_chars(&id) {
            return Err(IdError::InvalidCharacters);
        }
        if RESERVED_USER_IDS.contains(&id.as_str()) {
            return Err(IdError::ReservedUserId(id));
        }
        Ok(Self(id))
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UserId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for UserId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

/// A group's identifier, without the room prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GroupId(String);

impl GroupId {
    /// Validate and wrap a group identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier is empty, too long or contains
    /// control characters.
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        if id.is_empty() {
            return Err(IdError::EmptyGroupId);
        }
        if id.len() > MAX_GROUP_ID_LENGTH {
            return Err(IdError::GroupIdTooLong(id.len()));
        }
        if has_control_chars(&id) {
            return Err(IdError::InvalidCharacters);
        }
        Ok(Self(id))
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for GroupId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<GroupId> for String {
    fn from(id: GroupId) -> Self {
        id.0
    }
}

/// The kind of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomKind {
    Direct,
    Group,
    Global,
}

/// A room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RoomId {
    /// One-to-one chat. `low < high` always holds.
    Direct { low: UserId, high: UserId },
    /// Group chat.
    Group(GroupId),
    /// The room every connection belongs to, used for presence.
    Global,
}

impl RoomId {
    /// Build the direct room between two users, in either order.
    ///
    /// # Errors
    ///
    /// Returns an error if both users are the same.
    pub fn direct(a: UserId, b: UserId) -> Result<Self, IdError> {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Ok(RoomId::Direct { low: a, high: b }),
            std::cmp::Ordering::Greater => Ok(RoomId::Direct { low: b, high: a }),
            std::cmp::Ordering::Equal => Err(IdError::SelfDirectRoom),
        }
    }

    /// Build a group room.
    #[must_use]
    pub fn group(id: GroupId) -> Self {
        RoomId::Group(id)
    }

    /// Get the room kind.
    #[must_use]
    pub fn kind(&self) -> RoomKind {
        match self {
            RoomId::Direct { .. } => RoomKind::Direct,
            RoomId::Group(_) => RoomKind::Group,
            RoomId::Global => RoomKind::Global,
        }
    }

    /// Check if this is the global presence room.
    #[must_use]
    pub fn is_global(&self) -> bool {
        matches!(self, RoomId::Global)
    }

    /// For a direct room, the participant other than `user`.
    ///
    /// Returns `None` for group and global rooms, and for direct rooms that
    /// do not include `user`.
    #[must_use]
    pub fn peer_of(&self, user: &UserId) -> Option<&UserId> {
        match self {
            RoomId::Direct { low, high } if low == user => Some(high),
            RoomId::Direct { low, high } if high == user => Some(low),
            _ => None,
        }
    }

    /// Check whether `user` may join this room.
    ///
    /// Direct rooms admit only their two participants. Group rooms admit
    /// anyone. The global room is managed by the hub and never joined
    /// explicitly.
    #[must_use]
    pub fn admits(&self, user: &UserId) -> bool {
        match self {
            RoomId::Direct { .. } => self.peer_of(user).is_some(),
            RoomId::Group(_) => true,
            RoomId::Global => false,
        }
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomId::Direct { low, high } => write!(f, "{low}{DIRECT_SEPARATOR}{high}"),
            RoomId::Group(id) => write!(f, "{GROUP_PREFIX}{id}"),
            RoomId::Global => f.write_str(GLOBAL_ROOM),
        }
    }
}

impl FromStr for RoomId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == GLOBAL_ROOM {
            return Ok(RoomId::Global);
        }
        if let Some(group) = s.strip_prefix(GROUP_PREFIX) {
            return Ok(RoomId::Group(GroupId::new(group)?));
        }
        let (a, b) = s
            .split_once(DIRECT_SEPARATOR)
            .ok_or_else(|| IdError::MalformedRoom(s.to_string()))?;
        let a = UserId::new(a).map_err(|_| IdError::MalformedRoom(s.to_string()))?;
        let b = UserId::new(b).map_err(|_| IdError::MalformedRoom(s.to_string()))?;
        RoomId::direct(a, b)
    }
}

impl TryFrom<String> for RoomId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.to_string()
    }
}
