//! # chorus-core
//!
//! Room registry, presence and connection handling for the Chorus realtime
//! hub.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Hub** - Single-task broker owning rooms, presence and outbound queues
//! - **Room** - Membership tables for direct, group and global rooms
//! - **Presence** - Which users are online, through which connection
//! - **Adapter** - Drives one transport: decode, dispatch, heartbeat
//! - **Store** - Persistence seam for chat messages
//! - **Notifier** - Forced-logout notices for the authentication layer
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  requests  ┌─────────────┐     ┌─────────────┐
//! │   Adapter   │───────────▶│     Hub     │────▶│    Rooms    │
//! └─────────────┘            └─────────────┘     └─────────────┘
//!        ▲                      │      │
//!        │   outbound queue     │      ▼
//!        └──────────────────────┘ ┌─────────────┐
//!                                 │  Presence   │
//!                                 └─────────────┘
//! ```

pub mod adapter;
pub mod connection;
pub mod hub;
pub mod notifier;
pub mod presence;
pub mod room;
pub mod store;

pub use adapter::{handle_connection, Adapter, AdapterConfig, AdapterError};
pub use connection::{ConnectionId, ConnectionInfo, Identity, UserProfile};
pub use hub::{Hub, HubConfig, HubError, HubHandle, HubStats};
pub use notifier::SessionNotifier;
pub use presence::{PresenceState, PresenceTable};
pub use room::{JoinOutcome, Room, RoomTable};
pub use store::{unix_millis, Destination, MessageStore, NullStore, StoreError};
