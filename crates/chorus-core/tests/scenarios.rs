//! End-to-end conversations over in-memory transports.

use chorus_core::{
    handle_connection, AdapterConfig, Hub, HubConfig, HubHandle, Identity, MessageStore, NullStore,
    SessionNotifier, UserProfile,
};
use chorus_protocol::{codec, ClientEnvelope, PresenceStatus, RoomId, ServerEnvelope, UserId, WireFormat};
use chorus_transport::{MemoryPeer, MemoryTransport, WireMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn user(id: &str) -> UserId {
    UserId::new(id).unwrap()
}

fn room(id: &str) -> RoomId {
    id.parse().unwrap()
}

struct Client {
    peer: MemoryPeer,
}

impl Client {
    async fn connect(hub: &HubHandle, identity: Identity) -> Self {
        let (transport, peer) = MemoryTransport::pair(64);
        let store: Arc<dyn MessageStore> = Arc::new(NullStore);
        tokio::spawn(handle_connection(
            transport,
            identity,
            WireFormat::Json,
            hub.clone(),
            store,
            AdapterConfig::default(),
        ));
        let mut client = Client { peer };
        assert!(matches!(client.next().await, Some(ServerEnvelope::OnlineUsers(_))));
        client
    }

    async fn send(&self, envelope: ClientEnvelope) {
        self.peer
            .send_envelope(&envelope, WireFormat::Json)
            .await
            .unwrap();
    }

    async fn next(&mut self) -> Option<ServerEnvelope> {
        timeout(Duration::from_secs(5), self.peer.recv_envelope())
            .await
            .expect("timed out waiting for envelope")
            .unwrap()
    }

    /// Next envelope that is not a presence change.
    async fn next_content(&mut self) -> Option<ServerEnvelope> {
        loop {
            match self.next().await {
                Some(ServerEnvelope::UserPresence(_)) => continue,
                other => return other,
            }
        }
    }

    /// Assert nothing but presence changes arrived so far.
    fn assert_no_content(&mut self) {
        while let Some(message) = self.peer.try_recv() {
            if let Some(envelope) = decode(&message) {
                assert!(
                    matches!(envelope, ServerEnvelope::UserPresence(_)),
                    "unexpected {envelope:?}"
                );
            }
        }
    }
}

fn decode(message: &WireMessage) -> Option<ServerEnvelope> {
    match message {
        WireMessage::Text(text) => Some(codec::decode_server(text.as_bytes(), WireFormat::Json).unwrap()),
        _ => None,
    }
}

async fn settle(hub: &HubHandle) {
    hub.stats().await.unwrap();
    tokio::task::yield_now().await;
}

#[tokio::test]
async fn direct_message_reaches_peer_only() {
    let (hub, _task) = Hub::spawn(HubConfig::default());
    let mut a = Client::connect(&hub, Identity::new(user("A"))).await;
    let mut b = Client::connect(&hub, Identity::new(user("B"))).await;

    a.send(ClientEnvelope::join(room("A-B"))).await;
    b.send(ClientEnvelope::join(room("B-A"))).await;
    wait_for_members(&hub, "A-B", 2).await;

    a.send(ClientEnvelope::chat(room("A-B"), "hi")).await;

    match b.next_content().await {
        Some(ServerEnvelope::NewMessage(message)) => {
            assert_eq!(message.content, "hi");
            assert_eq!(message.sender, user("A"));
            assert_eq!(message.room_id, room("A-B"));
        }
        other => panic!("unexpected {other:?}"),
    }

    settle(&hub).await;
    a.assert_no_content();
}

#[tokio::test]
async fn second_login_invalidates_first_session() {
    let (hub, _task) = Hub::spawn(HubConfig::default());
    let mut first = Client::connect(&hub, Identity::new(user("A")).with_session("first")).await;

    // The authentication layer deleted the old session and notifies
    let notifier: Arc<dyn SessionNotifier> = Arc::new(hub.clone());
    notifier
        .notify_session_invalidated(&user("A"), "Logged in from another session")
        .await;
    hub.revoke_session(user("A"), "first").await.unwrap();

    let mut notices = 0;
    while let Some(envelope) = first.next().await {
        match envelope {
            ServerEnvelope::SessionInvalidated(notice) => {
                assert_eq!(notice.reason, "Logged in from another session");
                notices += 1;
            }
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(notices, 1);

    // The new login connects normally
    let _second = Client::connect(&hub, Identity::new(user("A")).with_session("second")).await;
    assert_eq!(hub.online_users().await.unwrap(), vec![user("A")]);
}

#[tokio::test]
async fn revoked_session_cannot_attach_late() {
    let (hub, _task) = Hub::spawn(HubConfig::default());
    let mut watcher = Client::connect(&hub, Identity::new(user("B"))).await;

    // Logged out between authentication and the adapter's attach
    hub.revoke_session(user("A"), "stale").await.unwrap();

    let (transport, mut peer) = MemoryTransport::pair(64);
    let store: Arc<dyn MessageStore> = Arc::new(NullStore);
    let connection = tokio::spawn(handle_connection(
        transport,
        Identity::new(user("A")).with_session("stale"),
        WireFormat::Json,
        hub.clone(),
        store,
        AdapterConfig::default(),
    ));

    // No snapshot: the queue is closed and the adapter ends
    let ended = timeout(Duration::from_secs(5), peer.recv_envelope())
        .await
        .expect("timed out waiting for close");
    assert!(ended.unwrap().is_none());
    connection.await.unwrap();

    settle(&hub).await;
    assert_eq!(hub.online_users().await.unwrap(), vec![user("B")]);
    watcher.assert_no_content();
}

#[tokio::test]
async fn group_message_before_and_after_join() {
    let (hub, _task) = Hub::spawn(HubConfig::default());
    let a = Client::connect(&hub, Identity::new(user("A"))).await;
    let mut b = Client::connect(&hub, Identity::new(user("B"))).await;

    a.send(ClientEnvelope::join(room("group-7"))).await;
    wait_for_members(&hub, "group-7", 1).await;

    // Alone in the room: nobody to deliver to, no error
    a.send(ClientEnvelope::chat(room("group-7"), "anyone?")).await;
    // Frames are handled in order, so this join lands after the chat
    a.send(ClientEnvelope::join(room("group-8"))).await;
    wait_for_members(&hub, "group-8", 1).await;
    settle(&hub).await;
    b.assert_no_content();

    b.send(ClientEnvelope::join(room("group-7"))).await;
    wait_for_members(&hub, "group-7", 2).await;

    a.send(ClientEnvelope::chat(room("group-7"), "welcome")).await;
    match b.next_content().await {
        Some(ServerEnvelope::NewMessage(message)) => {
            assert_eq!(message.content, "welcome");
            assert_eq!(message.room_id, room("group-7"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn typing_indicator_reaches_peer_only() {
    let (hub, _task) = Hub::spawn(HubConfig::default());
    let identity = Identity::new(user("A")).with_profile(UserProfile {
        display_name: Some("Ada".into()),
        avatar_url: Some("https://example.com/a.png".into()),
    });
    let mut a = Client::connect(&hub, identity).await;
    let mut b = Client::connect(&hub, Identity::new(user("B"))).await;

    a.send(ClientEnvelope::join(room("A-B"))).await;
    b.send(ClientEnvelope::join(room("A-B"))).await;
    wait_for_members(&hub, "A-B", 2).await;

    a.send(ClientEnvelope::typing(room("A-B"), true)).await;

    match b.next_content().await {
        Some(ServerEnvelope::TypingStatus(notice)) => {
            assert_eq!(notice.user_id, user("A"));
            assert!(notice.is_typing);
            assert_eq!(notice.display_name.as_deref(), Some("Ada"));
        }
        other => panic!("unexpected {other:?}"),
    }

    settle(&hub).await;
    a.assert_no_content();
}

#[tokio::test]
async fn disconnect_announces_offline_once() {
    let (hub, _task) = Hub::spawn(HubConfig::default());
    let mut a = Client::connect(&hub, Identity::new(user("A"))).await;
    let mut b = Client::connect(&hub, Identity::new(user("B"))).await;

    assert_eq!(
        a.next().await,
        Some(ServerEnvelope::presence(user("B"), PresenceStatus::Online))
    );

    b.peer.close();
    assert!(b.next().await.is_none());

    assert_eq!(
        a.next().await,
        Some(ServerEnvelope::presence(user("B"), PresenceStatus::Offline))
    );
    settle(&hub).await;
    assert!(a.peer.try_recv().is_none());
}

async fn wait_for_members(hub: &HubHandle, room_id: &str, count: usize) {
    timeout(Duration::from_secs(5), async {
        while hub.room_members(room(room_id)).await.unwrap().len() < count {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("timed out waiting for members");
}
