//! Room membership bookkeeping.
//!
//! Rooms are named sets of connections. A [`RoomTable`] keeps both directions
//! of the membership relation (room → members and connection → rooms) and
//! updates them together, so the two views never disagree. Rooms exist only
//! while they have members.

use crate::connection::ConnectionId;
use chorus_protocol::RoomId;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// A room and its current members.
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    members: HashSet<ConnectionId>,
}

impl Room {
    fn new(id: RoomId) -> Self {
        Self {
            id,
            members: HashSet::new(),
        }
    }

    /// Get the room identifier.
    #[must_use]
    pub fn id(&self) -> &RoomId {
        &self.id
    }

    /// Get the number of members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Check if a connection is a member.
    #[must_use]
    pub fn contains(&self, connection: ConnectionId) -> bool {
        self.members.contains(&connection)
    }

    /// Iterate over the members.
    pub fn members(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.members.iter().copied()
    }

    /// Check if the room has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Result of adding a connection to a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The connection was added.
    Joined,
    /// The connection was already a member; nothing changed.
    AlreadyMember,
}

/// Both directions of the room membership relation.
#[derive(Debug, Default)]
pub struct RoomTable {
    rooms: HashMap<RoomId, Room>,
    memberships: HashMap<ConnectionId, HashSet<RoomId>>,
}

impl RoomTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room, creating the room if absent.
    pub fn join(&mut self, connection: ConnectionId, room: RoomId) -> JoinOutcome {
        let rooms = self.memberships.entry(connection).or_default();
        if !rooms.insert(room.clone()) {
            return JoinOutcome::AlreadyMember;
        }

        self.rooms
            .entry(room.clone())
            .or_insert_with(|| {
                debug!(room = %room, "Creating room");
                Room::new(room)
            })
            .members
            .insert(connection);

        JoinOutcome::Joined
    }

    /// Remove a connection from one room, deleting the room if it empties.
    ///
    /// Returns `true` if the connection was a member.
    pub fn leave(&mut self, connection: ConnectionId, room: &RoomId) -> bool {
        let Some(rooms) = self.memberships.get_mut(&connection) else {
            return false;
        };
        if !rooms.remove(room) {
            return false;
        }
        if rooms.is_empty() {
            self.memberships.remove(&connection);
        }
        self.detach(connection, room);
        true
    }

    /// Remove a connection from every room it belongs to.
    ///
    /// Returns the rooms it left.
    pub fn remove_connection(&mut self, connection: ConnectionId) -> Vec<RoomId> {
        let Some(rooms) = self.memberships.remove(&connection) else {
            return Vec::new();
        };
        for room in &rooms {
            self.detach(connection, room);
        }
        rooms.into_iter().collect()
    }

    fn detach(&mut self, connection: ConnectionId, room: &RoomId) {
        if let Entry::Occupied(mut entry) = self.rooms.entry(room.clone()) {
            entry.get_mut().members.remove(&connection);
            if entry.get().is_empty() {
                entry.remove();
                debug!(room = %room, "Deleted empty room");
            }
        }
    }

    /// Look up a room.
    #[must_use]
    pub fn get(&self, room: &RoomId) -> Option<&Room> {
        self.rooms.get(room)
    }

    /// Check if a room exists.
    #[must_use]
    pub fn contains_room(&self, room: &RoomId) -> bool {
        self.rooms.contains_key(room)
    }

    /// Check if a connection is a member of a room.
    #[must_use]
    pub fn is_member(&self, connection: ConnectionId, room: &RoomId) -> bool {
        self.memberships
            .get(&connection)
            .is_some_and(|rooms| rooms.contains(room))
    }

    /// Get the rooms a connection belongs to.
    #[must_use]
    pub fn rooms_of(&self, connection: ConnectionId) -> Vec<RoomId> {
        self.memberships
            .get(&connection)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Count a connection's rooms other than the global room.
    #[must_use]
    pub fn joined_room_count(&self, connection: ConnectionId) -> usize {
        self.memberships
            .get(&connection)
            .map(|rooms| rooms.iter().filter(|room| !room.is_global()).count())
            .unwrap_or(0)
    }

    /// Get the number of rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Check that both directions agree and no room is empty.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let rooms_ok = self.rooms.iter().all(|(id, room)| {
            !room.is_empty()
                && room.id() == id
                && room.members().all(|conn| self.is_member(conn, id))
        });
        let memberships_ok = self.memberships.iter().all(|(conn, rooms)| {
            !rooms.is_empty()
                && rooms
                    .iter()
                    .all(|id| self.rooms.get(id).is_some_and(|room| room.contains(*conn)))
        });
        rooms_ok && memberships_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(id: &str) -> RoomId {
        id.parse().unwrap()
    }

    #[test]
    fn test_join_creates_room() {
        let mut table = RoomTable::new();
        let conn = ConnectionId::next();

        assert_eq!(
            table.join(conn, room("group-7")),
            JoinOutcome::Joined
        );
        assert!(table.contains_room(&room("group-7")));
        assert_eq!(table.get(&room("group-7")).unwrap().member_count(), 1);

        assert_eq!(table.join(conn, room("A-B")), JoinOutcome::Joined);
        assert_eq!(table.rooms_of(conn).len(), 2);
        assert!(table.is_consistent());
    }

    #[test]
    fn test_join_is_idempotent() {
        let mut table = RoomTable::new();
        let conn = ConnectionId::next();

        table.join(conn, room("group-7"));
        assert_eq!(table.join(conn, room("group-7")), JoinOutcome::AlreadyMember);
        assert_eq!(table.get(&room("group-7")).unwrap().member_count(), 1);
        assert_eq!(table.rooms_of(conn).len(), 1);
    }

    #[test]
    fn test_leave_deletes_empty_room() {
        let mut table = RoomTable::new();
        let a = ConnectionId::next();
        let b = ConnectionId::next();

        table.join(a, room("group-7"));
        table.join(b, room("group-7"));

        assert!(table.leave(a, &room("group-7")));
        assert!(table.contains_room(&room("group-7")));

        assert!(table.leave(b, &room("group-7")));
        assert!(!table.contains_room(&room("group-7")));

        // Leaving twice is a no-op
        assert!(!table.leave(b, &room("group-7")));
        assert!(table.is_consistent());
    }

    #[test]
    fn test_remove_connection_leaves_everything() {
        let mut table = RoomTable::new();
        let a = ConnectionId::next();
        let b = ConnectionId::next();

        table.join(a, RoomId::Global);
        table.join(a, room("group-1"));
        table.join(a, room("group-2"));
        table.join(b, RoomId::Global);

        let mut left = table.remove_connection(a);
        left.sort_by_key(ToString::to_string);
        assert_eq!(left.len(), 3);

        assert!(!table.contains_room(&room("group-1")));
        assert!(!table.contains_room(&room("group-2")));
        assert!(table.contains_room(&RoomId::Global));
        assert!(table.rooms_of(a).is_empty());
        assert!(table.remove_connection(a).is_empty());
        assert!(table.is_consistent());
    }

    #[test]
    fn test_joined_room_count_excludes_global() {
        let mut table = RoomTable::new();
        let conn = ConnectionId::next();

        table.join(conn, RoomId::Global);
        assert_eq!(table.joined_room_count(conn), 0);
        table.join(conn, room("group-1"));
        assert_eq!(table.joined_room_count(conn), 1);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Join(usize, usize),
            Leave(usize, usize),
            Remove(usize),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (0..6usize, 0..4usize).prop_map(|(conn, room)| Op::Join(conn, room)),
                (0..6usize, 0..4usize).prop_map(|(conn, room)| Op::Leave(conn, room)),
                (0..6usize).prop_map(Op::Remove),
            ]
        }

        proptest! {
            #[test]
            fn membership_stays_symmetric(ops in proptest::collection::vec(op(), 0..200)) {
                let mut table = RoomTable::new();
                let conns: Vec<_> = (0..6).map(|_| ConnectionId::next()).collect();
                let rooms = [room("group-a"), room("group-b"), room("a-b"), RoomId::Global];

                for op in ops {
                    match op {
                        Op::Join(conn, target) => {
                            let was_member = table.is_member(conns[conn], &rooms[target]);
                            let outcome = table.join(conns[conn], rooms[target].clone());
                            prop_assert_eq!(outcome == JoinOutcome::AlreadyMember, was_member);
                        }
                        Op::Leave(conn, target) => {
                            let was_member = table.is_member(conns[conn], &rooms[target]);
                            prop_assert_eq!(table.leave(conns[conn], &rooms[target]), was_member);
                        }
                        Op::Remove(conn) => {
                            let before = table.rooms_of(conns[conn]).len();
                            prop_assert_eq!(table.remove_connection(conns[conn]).len(), before);
                            prop_assert!(table.rooms_of(conns[conn]).is_empty());
                        }
                    }
                    prop_assert!(table.is_consistent());
                }
            }
        }
    }
}
