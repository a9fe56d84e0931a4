//! # chorus-transport
//!
//! Transport abstraction layer for the Chorus realtime hub.
//!
//! This crate provides a unified interface over the duplex connections the
//! hub serves:
//!
//! - **WebSocket (axum)** - Sockets upgraded by the HTTP layer
//! - **WebSocket (tungstenite)** - Native clients and tests
//! - **Memory** - In-process pipes for tests and benchmarks
//!
//! ## Transport Abstraction
//!
//! Every transport splits into a [`FrameReader`] and a [`FrameWriter`], so
//! the hub's connection adapter can read and write concurrently.
//!
//! ```rust,ignore
//! use chorus_transport::{FrameReader, Transport};
//!
//! async fn drain(transport: impl Transport) {
//!     let (mut reader, _writer) = transport.split();
//!     while let Ok(Some(message)) = reader.recv().await {
//!         // Process message
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;
pub mod websocket;

#[cfg(feature = "tungstenite")]
pub mod tungstenite;

pub use memory::{MemoryPeer, MemoryTransport};
pub use traits::{FrameReader, FrameWriter, Transport, TransportError, WireMessage};
pub use websocket::WebSocketTransport;

#[cfg(feature = "tungstenite")]
pub use tungstenite::TungsteniteTransport;
