//! The room registry.
//!
//! All room and presence state lives inside a single [`Hub`] task. Other
//! tasks talk to it through a cloneable [`HubHandle`], which funnels every
//! request into one bounded channel; requests are therefore applied in the
//! order they were submitted, system wide.
//!
//! The hub holds the only sender of each connection's outbound queue.
//! Removing a member drops that sender, which closes the queue and ends the
//! connection's writer. A queue can therefore only be closed once.

use crate::connection::{ConnectionId, ConnectionInfo, OutboundSender};
use crate::presence::PresenceTable;
use crate::room::{JoinOutcome, RoomTable};
use bytes::Bytes;
use chorus_protocol::{codec, PresenceStatus, ProtocolError, RoomId, ServerEnvelope, UserId, WireFormat};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// The hub task has stopped.
    #[error("Hub is not running")]
    Closed,
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of the request channel.
    pub request_capacity: usize,
    /// Maximum rooms per connection, not counting the global room.
    pub max_rooms_per_connection: usize,
    /// How many revoked session tokens to remember for refusing late attaches.
    pub revoked_session_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            request_capacity: 4096,
            max_rooms_per_connection: 100,
            revoked_session_capacity: 4096,
        }
    }
}

/// Point-in-time hub statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub rooms: usize,
    pub connections: usize,
    pub online_users: usize,
    /// Slow consumers removed since start.
    pub evictions: u64,
}

/// Requests processed by the hub task.
#[derive(Debug)]
enum HubRequest {
    Attach {
        connection: ConnectionInfo,
        queue: OutboundSender,
    },
    Register {
        connection: ConnectionId,
        room: RoomId,
    },
    Leave {
        connection: ConnectionId,
        room: RoomId,
    },
    Unregister {
        connection: ConnectionId,
    },
    Broadcast {
        room: RoomId,
        envelope: ServerEnvelope,
        exclude: Option<ConnectionId>,
    },
    NotifySessionInvalidated {
        user: UserId,
        reason: String,
    },
    RevokeSession {
        user: UserId,
        session: String,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
    RoomMembers {
        room: RoomId,
        reply: oneshot::Sender<Vec<ConnectionId>>,
    },
    RoomsOf {
        connection: ConnectionId,
        reply: oneshot::Sender<Vec<RoomId>>,
    },
    OnlineUsers {
        reply: oneshot::Sender<Vec<UserId>>,
    },
}

/// Handle to a running hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    requests: mpsc::Sender<HubRequest>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl HubHandle {
    async fn send(&self, request: HubRequest) -> Result<(), HubError> {
        self.requests.send(request).await.map_err(|_| HubError::Closed)
    }

    async fn query<T>(
        &self,
        request: impl FnOnce(oneshot::Sender<T>) -> HubRequest,
    ) -> Result<T, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(request(reply)).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Register a new connection in the global room, handing its outbound
    /// queue to the hub.
    ///
    /// The connection receives an `online_users` snapshot. If its user was
    /// offline, every other connection receives `user_presence: online`.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn attach(&self, connection: ConnectionInfo, queue: OutboundSender) -> Result<(), HubError> {
        self.send(HubRequest::Attach { connection, queue }).await
    }

    /// Add an attached connection to a room, creating the room if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn register(&self, connection: ConnectionId, room: RoomId) -> Result<(), HubError> {
        self.send(HubRequest::Register { connection, room }).await
    }

    /// Remove a connection from one room.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn leave(&self, connection: ConnectionId, room: RoomId) -> Result<(), HubError> {
        self.send(HubRequest::Leave { connection, room }).await
    }

    /// Remove a connection from every room and from presence, closing its
    /// outbound queue. Unregistering twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn unregister(&self, connection: ConnectionId) -> Result<(), HubError> {
        self.send(HubRequest::Unregister { connection }).await
    }

    /// Unregister without awaiting, for use from `Drop`.
    ///
    /// Falls back to a spawned send if the request channel is full.
    pub fn unregister_detached(&self, connection: ConnectionId) {
        match self.requests.try_send(HubRequest::Unregister { connection }) {
            Ok(()) => {}
            Err(TrySendError::Full(request)) => match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let requests = self.requests.clone();
                    runtime.spawn(async move {
                        let _ = requests.send(request).await;
                    });
                }
                Err(_) => warn!(connection = %connection, "No runtime to unregister connection"),
            },
            // Hub is gone and dropped every queue with it.
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Send an envelope to every member of a room except `exclude`.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn broadcast(
        &self,
        room: RoomId,
        envelope: ServerEnvelope,
        exclude: Option<ConnectionId>,
    ) -> Result<(), HubError> {
        self.send(HubRequest::Broadcast {
            room,
            envelope,
            exclude,
        })
        .await
    }

    /// Send a typing notice from `sender` to the rest of a room.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn broadcast_typing(
        &self,
        room: RoomId,
        sender: &ConnectionInfo,
        is_typing: bool,
    ) -> Result<(), HubError> {
        let envelope = ServerEnvelope::typing(
            room.clone(),
            sender.user_id.clone(),
            is_typing,
            sender.profile.display_name.clone(),
            sender.profile.avatar_url.clone(),
        );
        self.broadcast(room, envelope, Some(sender.id)).await
    }

    /// Queue a `session_invalidated` notice on the user's tracked connection.
    ///
    /// The notice is dropped if the user is offline or the queue is full.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn notify_session_invalidated(
        &self,
        user: UserId,
        reason: impl Into<String>,
    ) -> Result<(), HubError> {
        self.send(HubRequest::NotifySessionInvalidated {
            user,
            reason: reason.into(),
        })
        .await
    }

    /// Unregister every connection opened with `session` and refuse any
    /// later attach that carries it.
    ///
    /// Requests submitted earlier, such as a session notice, are already on
    /// the queues and are written before the connections close.
    ///
    /// A connection authenticated just before the session was deleted may
    /// reach the hub after this request; it is turned away on attach.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn revoke_session(&self, user: UserId, session: impl Into<String>) -> Result<(), HubError> {
        self.send(HubRequest::RevokeSession {
            user,
            session: session.into(),
        })
        .await
    }

    /// Get hub statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn stats(&self) -> Result<HubStats, HubError> {
        self.query(|reply| HubRequest::Stats { reply }).await
    }

    /// Get the members of a room; empty if the room does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn room_members(&self, room: RoomId) -> Result<Vec<ConnectionId>, HubError> {
        self.query(|reply| HubRequest::RoomMembers { room, reply }).await
    }

    /// Get the rooms a connection belongs to.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn rooms_of(&self, connection: ConnectionId) -> Result<Vec<RoomId>, HubError> {
        self.query(|reply| HubRequest::RoomsOf { connection, reply }).await
    }

    /// Get the online users.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn online_users(&self) -> Result<Vec<UserId>, HubError> {
        self.query(|reply| HubRequest::OnlineUsers { reply }).await
    }

    /// Stop the hub task. Every outbound queue is closed.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Check if the hub task has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }
}

/// A registered connection.
#[derive(Debug)]
struct Member {
    info: ConnectionInfo,
    queue: OutboundSender,
}

/// Why a member could not take a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Undelivered {
    /// The queue is full.
    Slow,
    /// The receiver is gone; its unregister is still in flight.
    Closed,
}

/// Recently revoked session tokens, oldest first out.
#[derive(Debug, Default)]
struct RevokedSessions {
    tokens: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl RevokedSessions {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ..Default::default()
        }
    }

    fn insert(&mut self, session: String) {
        if !self.tokens.insert(session.clone()) {
            return;
        }
        self.order.push_back(session);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.tokens.remove(&oldest);
            }
        }
    }

    fn contains(&self, session: &str) -> bool {
        self.tokens.contains(session)
    }
}

/// Serializes an envelope at most once per wire format.
struct EncodedCache<'a> {
    envelope: &'a ServerEnvelope,
    json: Option<Bytes>,
    msgpack: Option<Bytes>,
    encodes: usize,
}

impl<'a> EncodedCache<'a> {
    fn new(envelope: &'a ServerEnvelope) -> Self {
        Self {
            envelope,
            json: None,
            msgpack: None,
            encodes: 0,
        }
    }

    fn get(&mut self, format: WireFormat) -> Result<Bytes, ProtocolError> {
        let slot = match format {
            WireFormat::Json => &mut self.json,
            WireFormat::MessagePack => &mut self.msgpack,
        };
        if let Some(frame) = slot {
            return Ok(frame.clone());
        }
        let frame = codec::encode_server(self.envelope, format)?;
        self.encodes += 1;
        *slot = Some(frame.clone());
        Ok(frame)
    }
}

/// The hub task state.
pub struct Hub {
    config: HubConfig,
    members: HashMap<ConnectionId, Member>,
    connections_by_user: HashMap<UserId, BTreeSet<ConnectionId>>,
    rooms: RoomTable,
    presence: PresenceTable,
    revoked: RevokedSessions,
    evictions: u64,
}

impl Hub {
    /// Create an empty hub.
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        Self {
            members: HashMap::new(),
            connections_by_user: HashMap::new(),
            rooms: RoomTable::new(),
            presence: PresenceTable::new(),
            revoked: RevokedSessions::new(config.revoked_session_capacity),
            evictions: 0,
            config,
        }
    }

    /// Spawn the hub task on the current runtime.
    #[must_use]
    pub fn spawn(config: HubConfig) -> (HubHandle, JoinHandle<()>) {
        let (requests, rx) = mpsc::channel(config.request_capacity.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let hub = Hub::new(config);
        let task = tokio::spawn(hub.run(rx, shutdown_rx));
        (
            HubHandle {
                requests,
                shutdown: Arc::new(shutdown),
            },
            task,
        )
    }

    async fn run(mut self, mut requests: mpsc::Receiver<HubRequest>, mut shutdown: watch::Receiver<bool>) {
        info!(config = ?self.config, "Hub started");

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                request = requests.recv() => match request {
                    Some(request) => self.handle(request),
                    None => break,
                },
            }
        }

        info!(
            connections = self.members.len(),
            rooms = self.rooms.room_count(),
            "Hub stopped"
        );
    }

    fn handle(&mut self, request: HubRequest) {
        match request {
            HubRequest::Attach { connection, queue } => self.attach(connection, queue),
            HubRequest::Register { connection, room } => self.register(connection, room),
            HubRequest::Leave { connection, room } => self.leave(connection, &room),
            HubRequest::Unregister { connection } => self.unregister(connection),
            HubRequest::Broadcast {
                room,
                envelope,
                exclude,
            } => self.broadcast(&room, &envelope, exclude),
            HubRequest::NotifySessionInvalidated { user, reason } => {
                self.notify_session_invalidated(&user, reason);
            }
            HubRequest::RevokeSession { user, session } => self.revoke_session(&user, session),
            HubRequest::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            HubRequest::RoomMembers { room, reply } => {
                let members = self
                    .rooms
                    .get(&room)
                    .map(|room| room.members().collect())
                    .unwrap_or_default();
                let _ = reply.send(members);
            }
            HubRequest::RoomsOf { connection, reply } => {
                let _ = reply.send(self.rooms.rooms_of(connection));
            }
            HubRequest::OnlineUsers { reply } => {
                let _ = reply.send(self.presence.online_users());
            }
        }
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            rooms: self.rooms.room_count(),
            connections: self.members.len(),
            online_users: self.presence.count(),
            evictions: self.evictions,
        }
    }

    fn attach(&mut self, info: ConnectionInfo, queue: OutboundSender) {
        let id = info.id;
        if self.members.contains_key(&id) {
            warn!(connection = %id, "Connection already attached");
            return;
        }
        if let Some(session) = info.session.as_deref() {
            if self.revoked.contains(session) {
                // Dropping the queue ends the connection's writer
                info!(connection = %id, user = %info.user_id, "Refused attach with revoked session");
                return;
            }
        }
        let user = info.user_id.clone();

        let mut others = self.presence.online_users_except(&user);
        others.sort();
        let snapshot = ServerEnvelope::online_users(others);
        match codec::encode_server(&snapshot, info.format) {
            Ok(frame) => {
                if queue.try_send(frame).is_err() {
                    debug!(connection = %id, "Dropped online snapshot");
                }
            }
            Err(e) => warn!(connection = %id, error = %e, "Failed to encode online snapshot"),
        }

        self.connections_by_user.entry(user.clone()).or_default().insert(id);
        self.members.insert(id, Member { info, queue });
        self.rooms.join(id, RoomId::Global);

        debug!(connection = %id, user = %user, "Attached");

        if self.presence.mark_online(&user, id) {
            let online = ServerEnvelope::presence(user, PresenceStatus::Online);
            self.broadcast(&RoomId::Global, &online, Some(id));
        }
    }

    fn register(&mut self, connection: ConnectionId, room: RoomId) {
        if !self.members.contains_key(&connection) {
            debug!(connection = %connection, room = %room, "Register for unknown connection");
            return;
        }
        if !room.is_global()
            && !self.rooms.is_member(connection, &room)
            && self.rooms.joined_room_count(connection) >= self.config.max_rooms_per_connection
        {
            warn!(
                connection = %connection,
                room = %room,
                max = self.config.max_rooms_per_connection,
                "Room limit reached"
            );
            return;
        }

        match self.rooms.join(connection, room.clone()) {
            JoinOutcome::Joined => debug!(
                connection = %connection,
                room = %room,
                members = self.rooms.get(&room).map_or(0, |r| r.member_count()),
                "Joined room"
            ),
            JoinOutcome::AlreadyMember => {
                trace!(connection = %connection, room = %room, "Already in room");
            }
        }
    }

    fn leave(&mut self, connection: ConnectionId, room: &RoomId) {
        if room.is_global() {
            warn!(connection = %connection, "Refusing to leave the global room");
            return;
        }
        if self.rooms.leave(connection, room) {
            debug!(connection = %connection, room = %room, "Left room");
        }
    }

    fn unregister(&mut self, connection: ConnectionId) {
        if let Some((_, undelivered)) = self.remove(connection) {
            self.evict(undelivered);
        }
    }

    /// Remove a connection from rooms, presence and the member table.
    ///
    /// Returns the removed connection and any members that could not take the
    /// resulting offline notice.
    fn remove(
        &mut self,
        connection: ConnectionId,
    ) -> Option<(ConnectionInfo, Vec<(ConnectionId, Undelivered)>)> {
        let Member { info, queue } = self.members.remove(&connection)?;
        drop(queue);

        let rooms = self.rooms.remove_connection(connection);
        let user = &info.user_id;

        let remaining = match self.connections_by_user.get_mut(user) {
            Some(connections) => {
                connections.remove(&connection);
                let next = connections.iter().next_back().copied();
                if next.is_none() {
                    self.connections_by_user.remove(user);
                }
                next
            }
            None => None,
        };

        let mut undelivered = Vec::new();
        if self.presence.tracked(user) == Some(connection) {
            match remaining {
                Some(next) => {
                    self.presence.hand_over(user, next);
                }
                None => {
                    self.presence.remove(user);
                    let offline = ServerEnvelope::presence(user.clone(), PresenceStatus::Offline);
                    undelivered = self.deliver(&RoomId::Global, &offline, None);
                }
            }
        }

        debug!(connection = %connection, user = %user, rooms = rooms.len(), "Unregistered");
        Some((info, undelivered))
    }

    /// Unregister members that could not take a frame, including any that
    /// fail while the removed ones are announced offline.
    ///
    /// Only full queues count as evictions. A closed queue belongs to a
    /// connection that already ended.
    fn evict(&mut self, mut undelivered: Vec<(ConnectionId, Undelivered)>) {
        while let Some((connection, cause)) = undelivered.pop() {
            let Some((info, more)) = self.remove(connection) else {
                continue;
            };
            match cause {
                Undelivered::Slow => {
                    self.evictions += 1;
                    info!(connection = %connection, user = %info.user_id, "Disconnected slow consumer");
                }
                Undelivered::Closed => {
                    debug!(connection = %connection, user = %info.user_id, "Removed closed connection");
                }
            }
            undelivered.extend(more);
        }
    }

    fn broadcast(&mut self, room: &RoomId, envelope: &ServerEnvelope, exclude: Option<ConnectionId>) {
        let undelivered = self.deliver(room, envelope, exclude);
        self.evict(undelivered);
    }

    /// Enqueue an envelope on every member of a room except `exclude`.
    ///
    /// Never blocks. Returns the members whose queues were full or closed.
    fn deliver(
        &self,
        room: &RoomId,
        envelope: &ServerEnvelope,
        exclude: Option<ConnectionId>,
    ) -> Vec<(ConnectionId, Undelivered)> {
        let mut undelivered = Vec::new();
        let Some(entry) = self.rooms.get(room) else {
            trace!(room = %room, kind = envelope.kind(), "Broadcast to absent room");
            return undelivered;
        };

        let mut cache = EncodedCache::new(envelope);
        let mut delivered = 0usize;
        for connection in entry.members() {
            if Some(connection) == exclude {
                continue;
            }
            let Some(member) = self.members.get(&connection) else {
                continue;
            };
            let frame = match cache.get(member.info.format) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(room = %room, kind = envelope.kind(), error = %e, "Failed to encode envelope");
                    continue;
                }
            };
            match member.queue.try_send(frame) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => undelivered.push((connection, Undelivered::Slow)),
                Err(TrySendError::Closed(_)) => undelivered.push((connection, Undelivered::Closed)),
            }
        }

        trace!(
            room = %room,
            kind = envelope.kind(),
            recipients = delivered,
            undelivered = undelivered.len(),
            encodes = cache.encodes,
            "Broadcast"
        );
        undelivered
    }

    fn notify_session_invalidated(&self, user: &UserId, reason: String) {
        let Some(member) = self
            .presence
            .tracked(user)
            .and_then(|connection| self.members.get(&connection))
        else {
            debug!(user = %user, "Session notice for offline user");
            return;
        };

        let notice = ServerEnvelope::session_invalidated(reason);
        match codec::encode_server(&notice, member.info.format) {
            Ok(frame) => {
                if member.queue.try_send(frame).is_err() {
                    debug!(connection = %member.info.id, user = %user, "Dropped session notice");
                }
            }
            Err(e) => warn!(user = %user, error = %e, "Failed to encode session notice"),
        }
    }

    fn revoke_session(&mut self, user: &UserId, session: String) {
        let connections: Vec<_> = self
            .connections_by_user
            .get(user)
            .into_iter()
            .flatten()
            .copied()
            .filter(|connection| {
                self.members
                    .get(connection)
                    .is_some_and(|member| member.info.session.as_deref() == Some(session.as_str()))
            })
            .collect();

        debug!(user = %user, connections = connections.len(), "Revoking session");
        self.revoked.insert(session);
        for connection in connections {
            self.unregister(connection);
        }
    }
}
