//! Connection identity and outbound queues.

use bytes::Bytes;
use chorus_protocol::{UserId, WireFormat};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Counter for process-unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next connection ID.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Display metadata attached to typing notices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProfile {
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// An authenticated user, as supplied by the authentication collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub profile: UserProfile,
    /// Token of the session the identity was resolved from, if any.
    pub session: Option<String>,
}

impl Identity {
    /// Create an identity without display metadata.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            profile: UserProfile::default(),
            session: None,
        }
    }

    /// Attach display metadata.
    #[must_use]
    pub fn with_profile(mut self, profile: UserProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Bind the identity to a session token.
    #[must_use]
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }
}

/// Everything the hub knows about one connection besides its queue.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub profile: UserProfile,
    /// Session the connection was authenticated with.
    pub session: Option<String>,
    /// Format of outbound frames.
    pub format: WireFormat,
}

impl ConnectionInfo {
    /// Describe a new connection for `identity`, allocating its ID.
    #[must_use]
    pub fn new(identity: Identity, format: WireFormat) -> Self {
        Self {
            id: ConnectionId::next(),
            user_id: identity.user_id,
            profile: identity.profile,
            session: identity.session,
            format,
        }
    }
}

/// Sending side of a connection's outbound queue. Only the hub holds one.
pub type OutboundSender = mpsc::Sender<Bytes>;

/// Receiving side of a connection's outbound queue, drained by the adapter.
pub type OutboundReceiver = mpsc::Receiver<Bytes>;

/// Create a bounded outbound queue.
#[must_use]
pub fn outbound_queue(capacity: usize) -> (OutboundSender, OutboundReceiver) {
    mpsc::channel(capacity.max(1))
}
