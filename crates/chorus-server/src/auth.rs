//! In-memory sessions.
//!
//! Each user holds at most one session. Logging in again replaces the old
//! session and tells the user's live connection through the
//! [`SessionNotifier`].

use async_trait::async_trait;
use chorus_core::notifier::{REASON_REPLACED, REASON_REVOKED};
use chorus_core::{unix_millis, Identity, SessionNotifier};
use chorus_protocol::UserId;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Resolves connection tokens to identities.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Get the identity behind a token, if the token is valid.
    async fn authenticate(&self, token: &str) -> Option<Identity>;
}

/// A live session.
#[derive(Debug, Clone)]
pub struct Session {
    /// The user, bound to this session's token.
    pub identity: Identity,
    /// Unix time in milliseconds.
    pub created_at: u64,
}

/// Result of a login.
#[derive(Debug, Clone)]
pub struct Login {
    pub token: String,
    /// Token of the user's previous session, now deleted.
    pub replaced: Option<String>,
}

/// Session table keyed by token, with one session per user.
pub struct SessionStore {
    sessions: DashMap<String, Session>,
    tokens: DashMap<UserId, String>,
    notifier: Arc<dyn SessionNotifier>,
}

impl SessionStore {
    /// Create an empty store that notifies through `notifier`.
    #[must_use]
    pub fn new(notifier: Arc<dyn SessionNotifier>) -> Self {
        Self {
            sessions: DashMap::new(),
            tokens: DashMap::new(),
            notifier,
        }
    }

    /// Start a session, replacing any previous session of the same user.
    ///
    /// The stored identity carries the new token, so connections
    /// authenticated with it can be revoked by session.
    pub async fn login(&self, identity: Identity) -> Login {
        let user = identity.user_id.clone();
        let token = Uuid::new_v4().simple().to_string();
        let identity = identity.with_session(token.clone());

        self.sessions.insert(
            token.clone(),
            Session {
                identity,
                created_at: unix_millis(),
            },
        );
        let previous = self.tokens.insert(user.clone(), token.clone());

        if let Some(old) = &previous {
            self.sessions.remove(old);
            info!(user = %user, "Session replaced");
            self.notifier
                .notify_session_invalidated(&user, REASON_REPLACED)
                .await;
        }

        debug!(user = %user, "Session created");
        Login {
            token,
            replaced: previous,
        }
    }

    /// End a session.
    ///
    /// Returns the session's user, or `None` for an unknown token.
    pub async fn logout(&self, token: &str) -> Option<UserId> {
        let (_, session) = self.sessions.remove(token)?;
        let user = session.identity.user_id;
        self.tokens.remove_if(&user, |_, current| current == token);

        let age_ms = unix_millis().saturating_sub(session.created_at);
        info!(user = %user, age_ms, "Session revoked");
        self.notifier
            .notify_session_invalidated(&user, REASON_REVOKED)
            .await;
        Some(user)
    }

    /// Get the number of sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if there are no sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl Authenticator for SessionStore {
    async fn authenticate(&self, token: &str) -> Option<Identity> {
        self.sessions
            .get(token)
            .map(|session| session.identity.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        notices: Mutex<Vec<(UserId, String)>>,
    }

    #[async_trait]
    impl SessionNotifier for RecordingNotifier {
        async fn notify_session_invalidated(&self, user: &UserId, reason: &str) {
            self.notices
                .lock()
                .unwrap()
                .push((user.clone(), reason.to_string()));
        }
    }

    fn identity(name: &str) -> Identity {
        Identity::new(UserId::new(name).unwrap())
    }

    #[tokio::test]
    async fn test_login_and_authenticate() {
        let notifier = Arc::new(RecordingNotifier::default());
        let store = SessionStore::new(notifier.clone());

        let login = store.login(identity("alice")).await;
        assert!(login.replaced.is_none());
        let resolved = store.authenticate(&login.token).await.unwrap();
        assert_eq!(resolved.user_id.as_str(), "alice");
        assert_eq!(resolved.session.as_deref(), Some(login.token.as_str()));
        assert!(store.authenticate("bogus").await.is_none());
        assert!(notifier.notices.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_login_replaces_first() {
        let notifier = Arc::new(RecordingNotifier::default());
        let store = SessionStore::new(notifier.clone());

        let first = store.login(identity("alice")).await;
        let second = store.login(identity("alice")).await;

        assert_eq!(second.replaced.as_deref(), Some(first.token.as_str()));
        assert_ne!(first.token, second.token);
        assert!(store.authenticate(&first.token).await.is_none());
        assert!(store.authenticate(&second.token).await.is_some());
        assert_eq!(store.len(), 1);
        assert_eq!(
            *notifier.notices.lock().unwrap(),
            vec![(UserId::new("alice").unwrap(), REASON_REPLACED.to_string())]
        );
    }

    #[tokio::test]
    async fn test_logout() {
        let notifier = Arc::new(RecordingNotifier::default());
        let store = SessionStore::new(notifier.clone());

        let login = store.login(identity("bob")).await;
        assert_eq!(store.logout(&login.token).await.unwrap().as_str(), "bob");
        assert!(store.logout(&login.token).await.is_none());
        assert!(store.is_empty());
        assert!(store.authenticate(&login.token).await.is_none());

        // A fresh login is not a replacement
        assert!(store.login(identity("bob")).await.replaced.is_none());
        assert_eq!(notifier.notices.lock().unwrap().len(), 1);
    }
}
