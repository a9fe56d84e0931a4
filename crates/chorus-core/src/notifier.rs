//! Session notifier.
//!
//! The authentication layer uses a [`SessionNotifier`] to tell a user's live
//! connection that its session was replaced or revoked. The notice is
//! advisory; the session record is already gone when it is sent.

use crate::hub::HubHandle;
use async_trait::async_trait;
use chorus_protocol::UserId;
use tracing::warn;

/// Reason sent when a newer login replaces a session.
pub const REASON_REPLACED: &str = "Logged in from another session";

/// Reason sent when a session is explicitly revoked.
pub const REASON_REVOKED: &str = "Session revoked";

/// Pushes forced-logout notices to connected users.
#[async_trait]
pub trait SessionNotifier: Send + Sync {
    /// Tell `user` their session was invalidated.
    async fn notify_session_invalidated(&self, user: &UserId, reason: &str);
}

#[async_trait]
impl SessionNotifier for HubHandle {
    async fn notify_session_invalidated(&self, user: &UserId, reason: &str) {
        if let Err(e) = HubHandle::notify_session_invalidated(self, user.clone(), reason).await {
            warn!(user = %user, error = %e, "Failed to send session notice");
        }
    }
}
