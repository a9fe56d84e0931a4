//! Message persistence seam.
//!
//! Chat messages are handed to a [`MessageStore`] before they are fanned
//! out. Persistence is best effort: a failure is logged by the caller and the
//! broadcast still happens.

use async_trait::async_trait;
use chorus_protocol::{GroupId, RoomId, UserId};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Where a chat message is addressed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// A direct message to one user.
    Direct { receiver: UserId },
    /// A message to a group.
    Group { group: GroupId },
}

impl Destination {
    /// Resolve the destination of a message sent by `sender` to `room`.
    ///
    /// Returns `None` for the global room and for direct rooms that do not
    /// include `sender`.
    #[must_use]
    pub fn resolve(room: &RoomId, sender: &UserId) -> Option<Self> {
        match room {
            RoomId::Direct { .. } => room.peer_of(sender).map(|receiver| Destination::Direct {
                receiver: receiver.clone(),
            }),
            RoomId::Group(group) => Some(Destination::Group {
                group: group.clone(),
            }),
            RoomId::Global => None,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Direct { receiver } => write!(f, "user:{receiver}"),
            Destination::Group { group } => write!(f, "group:{group}"),
        }
    }
}

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Persistent message store.
#[async_trait]
pub trait MessageStore: Send + Sync + 'static {
    /// Persist one chat message.
    async fn persist(
        &self,
        sender: &UserId,
        destination: &Destination,
        content: &str,
    ) -> Result<(), StoreError>;
}

/// A store that keeps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

#[async_trait]
impl MessageStore for NullStore {
    async fn persist(&self, _: &UserId, _: &Destination, _: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Current Unix time in milliseconds.
#[must_use]
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
