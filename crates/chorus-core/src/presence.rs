//! Presence tracking for Chorus.
//!
//! Presence records which users are online and which of their connections
//! currently represents them. A user with several connections is tracked
//! through exactly one; when it goes away the hub hands presence over to a
//! remaining connection instead of announcing the user offline.

use crate::connection::ConnectionId;
use chorus_protocol::UserId;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Presence state for a single user.
#[derive(Debug, Clone)]
pub struct PresenceState {
    /// Connection currently representing the user.
    pub connection: ConnectionId,
    /// When the user came online.
    pub since: Instant,
}

impl PresenceState {
    fn new(connection: ConnectionId) -> Self {
        Self {
            connection,
            since: Instant::now(),
        }
    }

    /// Time since the user came online.
    #[must_use]
    pub fn online_for(&self) -> Duration {
        self.since.elapsed()
    }
}

/// Online users and their tracked connections.
#[derive(Debug, Default)]
pub struct PresenceTable {
    users: HashMap<UserId, PresenceState>,
}

impl PresenceTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of online users.
    #[must_use]
    pub fn count(&self) -> usize {
        self.users.len()
    }

    /// Check if presence is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Check if a user is online.
    #[must_use]
    pub fn is_online(&self, user: &UserId) -> bool {
        self.users.contains_key(user)
    }

    /// Get the connection tracked for a user.
    #[must_use]
    pub fn tracked(&self, user: &UserId) -> Option<ConnectionId> {
        self.users.get(user).map(|state| state.connection)
    }

    /// Mark a user online through `connection`.
    ///
    /// Returns `true` if the user was offline. An already online user keeps
    /// their original `since` but is now tracked through `connection`.
    pub fn mark_online(&mut self, user: &UserId, connection: ConnectionId) -> bool {
        match self.users.get_mut(user) {
            Some(state) => {
                debug!(user = %user, from = %state.connection, to = %connection, "Presence: replaced connection");
                state.connection = connection;
                false
            }
            None => {
                debug!(user = %user, connection = %connection, "Presence: user online");
                self.users.insert(user.clone(), PresenceState::new(connection));
                true
            }
        }
    }

    /// Move a user's presence to another connection.
    ///
    /// Returns `false` if the user is not online.
    pub fn hand_over(&mut self, user: &UserId, connection: ConnectionId) -> bool {
        match self.users.get_mut(user) {
            Some(state) => {
                debug!(user = %user, from = %state.connection, to = %connection, "Presence: handed over");
                state.connection = connection;
                true
            }
            None => false,
        }
    }

    /// Remove a user from presence.
    pub fn remove(&mut self, user: &UserId) -> Option<PresenceState> {
        let state = self.users.remove(user)?;
        debug!(user = %user, online_for = ?state.online_for(), "Presence: user offline");
        Some(state)
    }

    /// Get all online users.
    #[must_use]
    pub fn online_users(&self) -> Vec<UserId> {
        self.users.keys().cloned().collect()
    }

    /// Get all online users except one.
    #[must_use]
    pub fn online_users_except(&self, user: &UserId) -> Vec<UserId> {
        self.users.keys().filter(|u| *u != user).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    #[test]
    fn test_presence_online_offline() {
        let mut presence = PresenceTable::new();
        let conn = ConnectionId::next();

        assert!(presence.mark_online(&user("alice"), conn));
        assert!(presence.is_online(&user("alice")));
        assert_eq!(presence.tracked(&user("alice")), Some(conn));
        assert_eq!(presence.count(), 1);

        assert!(presence.remove(&user("alice")).is_some());
        assert!(!presence.is_online(&user("alice")));
        assert!(presence.remove(&user("alice")).is_none());
    }

    #[test]
    fn test_second_connection_replaces_tracked() {
        let mut presence = PresenceTable::new();
        let first = ConnectionId::next();
        let second = ConnectionId::next();

        let before = Instant::now();
        assert!(presence.mark_online(&user("alice"), first));
        let after = Instant::now();

        assert!(!presence.mark_online(&user("alice"), second));
        assert_eq!(presence.tracked(&user("alice")), Some(second));
        assert_eq!(presence.count(), 1);

        // Still online since the first connection
        let state = presence.remove(&user("alice")).unwrap();
        assert_eq!(state.connection, second);
        assert!(state.since >= before && state.since <= after);
    }

    #[test]
    fn test_hand_over_requires_online_user() {
        let mut presence = PresenceTable::new();
        let conn = ConnectionId::next();

        assert!(!presence.hand_over(&user("bob"), conn));

        presence.mark_online(&user("bob"), ConnectionId::next());
        assert!(presence.hand_over(&user("bob"), conn));
        assert_eq!(presence.tracked(&user("bob")), Some(conn));
    }

    #[test]
    fn test_online_users_except() {
        let mut presence = PresenceTable::new();
        presence.mark_online(&user("alice"), ConnectionId::next());
        presence.mark_online(&user("bob"), ConnectionId::next());

        let mut others = presence.online_users_except(&user("alice"));
        others.sort();
        assert_eq!(others, vec![user("bob")]);
        assert_eq!(presence.online_users().len(), 2);
    }
}
