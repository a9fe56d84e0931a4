//! Shared fixtures for the Chorus benchmarks.

use chorus_core::{handle_connection, AdapterConfig, HubHandle, Identity, MessageStore, NullStore};
use chorus_protocol::{GroupId, RoomId, ServerEnvelope, UserId, WireFormat};
use chorus_transport::{MemoryPeer, MemoryTransport};
use std::sync::Arc;

/// User `user{i}`.
///
/// # Panics
///
/// Never for the generated names.
#[must_use]
pub fn user(i: usize) -> UserId {
    UserId::new(format!("user{i}")).expect("generated user ids are valid")
}

/// Group room `group-{name}`.
///
/// # Panics
///
/// Panics if `name` is not a valid group id.
#[must_use]
pub fn group_room(name: &str) -> RoomId {
    RoomId::group(GroupId::new(name).expect("valid group id"))
}

/// Adapter settings without a practical rate limit.
#[must_use]
pub fn unlimited() -> AdapterConfig {
    AdapterConfig {
        messages_per_second: 1_000_000,
        message_burst: 1_000_000,
        outbound_capacity: 4096,
        ..AdapterConfig::default()
    }
}

/// Connect an in-memory client and consume its `online_users` snapshot.
///
/// # Panics
///
/// Panics if the hub does not answer with a snapshot.
pub async fn connect(hub: &HubHandle, user_id: UserId, format: WireFormat) -> MemoryPeer {
    let (transport, mut peer) = MemoryTransport::pair(1024);
    let store: Arc<dyn MessageStore> = Arc::new(NullStore);
    tokio::spawn(handle_connection(
        transport,
        Identity::new(user_id),
        format,
        hub.clone(),
        store,
        unlimited(),
    ));
    match peer.recv_envelope().await {
        Ok(Some(ServerEnvelope::OnlineUsers(_))) => peer,
        other => panic!("expected online_users, got {other:?}"),
    }
}

/// Next envelope that is not a presence change.
///
/// # Panics
///
/// Panics if a frame does not decode.
pub async fn next_content(peer: &mut MemoryPeer) -> Option<ServerEnvelope> {
    loop {
        match peer.recv_envelope().await.expect("decodable frame") {
            Some(ServerEnvelope::UserPresence(_)) => continue,
            other => return other,
        }
    }
}
