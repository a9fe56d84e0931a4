//! Connection adapter.
//!
//! An [`Adapter`] drives one transport for its whole life. It runs an inbound
//! loop (read, decode, dispatch to the hub) and an outbound loop (drain the
//! outbound queue onto the wire, send heartbeats) in the same task. Whichever
//! loop ends first ends the connection, and the connection is unregistered
//! from the hub on every exit path, including cancellation.

use crate::connection::{outbound_queue, ConnectionId, ConnectionInfo, Identity, OutboundReceiver};
use crate::hub::{HubError, HubHandle};
use crate::store::{unix_millis, Destination, MessageStore};
use bytes::Bytes;
use chorus_protocol::{
    ChatMessage, ClientEnvelope, EnvelopeCodec, ProtocolError, RoomRef, ServerEnvelope,
    TypingUpdate, WireFormat, DEFAULT_MAX_FRAME_SIZE,
};
use chorus_transport::{FrameReader, FrameWriter, Transport, TransportError, WireMessage};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// Adapter errors. Each one ends the connection.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Transport failure.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Malformed, oversized or otherwise invalid frame.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Chat content over the configured limit.
    #[error("Message content too long: {len} bytes (max {max})")]
    ContentTooLong { len: usize, max: usize },

    /// No frame arrived within the read timeout.
    #[error("No frame received for {0:?}")]
    ReadTimeout(Duration),

    /// The hub stopped.
    #[error("Hub error: {0}")]
    Hub(#[from] HubError),
}

impl AdapterError {
    /// Check if the client sent something invalid.
    #[must_use]
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            AdapterError::Protocol(_) | AdapterError::ContentTooLong { .. }
        )
    }
}

/// Adapter configuration.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Maximum inbound frame size in bytes.
    pub max_frame_size: usize,
    /// Maximum chat content length in bytes.
    pub max_content_length: usize,
    /// Heartbeat period; must be shorter than `read_timeout`.
    pub heartbeat_interval: Duration,
    /// Close the connection if nothing is read for this long.
    pub read_timeout: Duration,
    /// Outbound queue capacity in frames.
    pub outbound_capacity: usize,
    /// Sustained rate of chat and typing frames.
    pub messages_per_second: u32,
    /// Burst allowance above the sustained rate.
    pub message_burst: u32,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_content_length: 4096,
            heartbeat_interval: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            outbound_capacity: 256,
            messages_per_second: 10,
            message_burst: 20,
        }
    }
}

/// Last read and write times of a connection, in milliseconds since it
/// started.
struct Liveness {
    epoch: Instant,
    last_read: AtomicU64,
    last_write: AtomicU64,
}

impl Liveness {
    fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_read: AtomicU64::new(0),
            last_write: AtomicU64::new(0),
        }
    }

    fn now(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn touch_read(&self) {
        self.last_read.store(self.now(), Ordering::Relaxed);
    }

    fn touch_write(&self) {
        self.last_write.store(self.now(), Ordering::Relaxed);
    }

    /// True if either direction was quiet for `period`.
    fn idle(&self, period: Duration) -> bool {
        let now = self.now();
        let period = period.as_millis() as u64;
        let quiet = |last: &AtomicU64| now.saturating_sub(last.load(Ordering::Relaxed)) >= period;
        quiet(&self.last_read) || quiet(&self.last_write)
    }
}

/// Unregisters a connection when dropped.
struct UnregisterGuard {
    hub: HubHandle,
    connection: ConnectionId,
}

impl Drop for UnregisterGuard {
    fn drop(&mut self) {
        self.hub.unregister_detached(self.connection);
    }
}

/// Drives one connection.
pub struct Adapter {
    info: ConnectionInfo,
    hub: HubHandle,
    store: Arc<dyn MessageStore>,
    codec: EnvelopeCodec,
    limiter: DefaultDirectRateLimiter,
    config: AdapterConfig,
}

impl Adapter {
    /// Create an adapter for an authenticated user.
    #[must_use]
    pub fn new(
        identity: Identity,
        format: WireFormat,
        hub: HubHandle,
        store: Arc<dyn MessageStore>,
        config: AdapterConfig,
    ) -> Self {
        let rate = NonZeroU32::new(config.messages_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.message_burst).unwrap_or(rate);
        Self {
            info: ConnectionInfo::new(identity, format),
            hub,
            store,
            codec: EnvelopeCodec::new(config.max_frame_size),
            limiter: RateLimiter::direct(Quota::per_second(rate).allow_burst(burst)),
            config,
        }
    }

    /// Get the connection ID.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.info.id
    }

    /// Get the connection description.
    #[must_use]
    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Attach to the hub and serve the transport until it closes.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the connection. The connection is
    /// unregistered either way.
    pub async fn run<T: Transport>(self, transport: T) -> Result<(), AdapterError> {
        let name = transport.name();
        let remote = transport.remote_addr();
        let (reader, mut writer) = transport.split();

        let (queue, frames) = outbound_queue(self.config.outbound_capacity);
        self.hub.attach(self.info.clone(), queue).await?;
        let _guard = UnregisterGuard {
            hub: self.hub.clone(),
            connection: self.info.id,
        };

        debug!(
            connection = %self.info.id,
            user = %self.info.user_id,
            transport = name,
            remote = remote.as_deref().unwrap_or("-"),
            format = %self.info.format,
            "Connection started"
        );

        let liveness = Liveness::new();
        let (pongs_tx, pongs_rx) = mpsc::channel(4);

        let result = tokio::select! {
            result = self.inbound(reader, &liveness, pongs_tx) => result,
            result = outbound(
                &mut writer,
                frames,
                pongs_rx,
                &liveness,
                self.config.heartbeat_interval,
                self.info.format,
            ) => result,
        };

        if let Err(e) = writer.close().await {
            trace!(connection = %self.info.id, error = %e, "Close failed");
        }
        result
    }

    async fn inbound<R: FrameReader>(
        &self,
        mut reader: R,
        liveness: &Liveness,
        pongs: mpsc::Sender<Bytes>,
    ) -> Result<(), AdapterError> {
        let read_timeout = self.config.read_timeout;
        loop {
            let message = timeout(read_timeout, reader.recv())
                .await
                .map_err(|_| AdapterError::ReadTimeout(read_timeout))??;
            liveness.touch_read();

            let (data, format) = match message {
                Some(WireMessage::Text(text)) => (Bytes::from(text), WireFormat::Json),
                Some(WireMessage::Binary(data)) => (data, WireFormat::MessagePack),
                Some(WireMessage::Ping(data)) => {
                    let _ = pongs.try_send(data);
                    continue;
                }
                Some(WireMessage::Pong(_)) => continue,
                Some(WireMessage::Close) | None => return Ok(()),
            };

            let envelope = self.codec.decode(&data, format)?;
            trace!(connection = %self.info.id, kind = envelope.kind(), "Received");
            self.dispatch(envelope).await?;
        }
    }

    async fn dispatch(&self, envelope: ClientEnvelope) -> Result<(), AdapterError> {
        let user = &self.info.user_id;
        match envelope {
            ClientEnvelope::JoinRoom(RoomRef { room_id }) => {
                if !room_id.admits(user) {
                    warn!(connection = %self.info.id, user = %user, room = %room_id, "Rejected join");
                    return Ok(());
                }
                self.hub.register(self.info.id, room_id).await?;
            }
            ClientEnvelope::LeaveRoom(RoomRef { room_id }) => {
                if room_id.is_global() {
                    warn!(connection = %self.info.id, "Rejected leave of the global room");
                    return Ok(());
                }
                self.hub.leave(self.info.id, room_id).await?;
            }
            ClientEnvelope::ChatMessage(message) => self.chat(message).await?,
            ClientEnvelope::TypingStatus(TypingUpdate { room_id, is_typing }) => {
                if !room_id.admits(user) {
                    warn!(connection = %self.info.id, room = %room_id, "Rejected typing notice");
                    return Ok(());
                }
                if self.allow("typing_status") {
                    self.hub.broadcast_typing(room_id, &self.info, is_typing).await?;
                }
            }
            ClientEnvelope::Unknown(kind) => {
                debug!(connection = %self.info.id, kind = %kind, "Ignoring unknown envelope");
            }
        }
        Ok(())
    }

    async fn chat(&self, message: ChatMessage) -> Result<(), AdapterError> {
        let ChatMessage { room_id, content } = message;
        let user = &self.info.user_id;

        let max = self.config.max_content_length;
        if content.len() > max {
            return Err(AdapterError::ContentTooLong {
                len: content.len(),
                max,
            });
        }
        let Some(destination) = Destination::resolve(&room_id, user) else {
            warn!(connection = %self.info.id, room = %room_id, "Rejected chat message");
            return Ok(());
        };
        if content.trim().is_empty() {
            debug!(connection = %self.info.id, room = %room_id, "Ignoring empty chat message");
            return Ok(());
        }
        if !self.allow("chat_message") {
            return Ok(());
        }

        if let Err(e) = self.store.persist(user, &destination, &content).await {
            warn!(
                connection = %self.info.id,
                destination = %destination,
                error = %e,
                "Failed to persist message"
            );
        }

        let envelope = ServerEnvelope::new_message(room_id.clone(), user.clone(), content, unix_millis());
        self.hub.broadcast(room_id, envelope, Some(self.info.id)).await?;
        Ok(())
    }

    fn allow(&self, kind: &str) -> bool {
        let allowed = self.limiter.check().is_ok();
        if !allowed {
            warn!(connection = %self.info.id, user = %self.info.user_id, kind, "Rate limited");
        }
        allowed
    }
}

async fn outbound<W: FrameWriter>(
    writer: &mut W,
    mut queue: OutboundReceiver,
    mut pongs: mpsc::Receiver<Bytes>,
    liveness: &Liveness,
    heartbeat: Duration,
    format: WireFormat,
) -> Result<(), AdapterError> {
    let mut ticker = interval_at(Instant::now() + heartbeat, heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = queue.recv() => match frame {
                Some(data) => {
                    writer.send(WireMessage::from_encoded(format, data)?).await?;
                    liveness.touch_write();
                }
                // Unregistered by the hub
                None => return Ok(()),
            },
            Some(data) = pongs.recv() => {
                writer.send(WireMessage::Pong(data)).await?;
            }
            _ = ticker.tick() => {
                if liveness.idle(heartbeat) {
                    writer.send(WireMessage::Ping(Bytes::new())).await?;
                    liveness.touch_write();
                }
            }
        }
    }
}

/// Serve one authenticated connection until it closes.
///
/// The connection joins the global room first. Errors end only this
/// connection and are logged here.
pub async fn handle_connection<T: Transport>(
    transport: T,
    identity: Identity,
    format: WireFormat,
    hub: HubHandle,
    store: Arc<dyn MessageStore>,
    config: AdapterConfig,
) {
    let adapter = Adapter::new(identity, format, hub, store, config);
    let connection = adapter.id();
    let user = adapter.info().user_id.clone();

    match adapter.run(transport).await {
        Ok(()) => debug!(connection = %connection, user = %user, "Connection closed"),
        Err(e) if e.is_protocol() => {
            warn!(connection = %connection, user = %user, error = %e, "Closed after protocol error");
        }
        Err(e) => debug!(connection = %connection, user = %user, error = %e, "Connection ended"),
    }
}
