//! Metrics collection and export for Chorus.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chorus_core::{Destination, HubHandle, HubStats};
use chorus_transport::{FrameReader, FrameWriter, Transport, TransportError, WireMessage};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "chorus_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "chorus_connections_active";
    pub const MESSAGES_TOTAL: &str = "chorus_messages_total";
    pub const MESSAGES_BYTES: &str = "chorus_messages_bytes";
    pub const ROOMS_ACTIVE: &str = "chorus_rooms_active";
    pub const ONLINE_USERS: &str = "chorus_online_users";
    pub const EVICTIONS: &str = "chorus_slow_consumer_evictions";
    pub const PERSISTED_TOTAL: &str = "chorus_messages_persisted_total";
    pub const REJECTED_TOTAL: &str = "chorus_requests_rejected_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of frames processed");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of frames processed");
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of non-empty rooms");
    metrics::describe_gauge!(names::ONLINE_USERS, "Current number of online users");
    metrics::describe_gauge!(
        names::EVICTIONS,
        "Slow consumers disconnected since server start"
    );
    metrics::describe_counter!(names::PERSISTED_TOTAL, "Chat messages persisted");
    metrics::describe_counter!(names::REJECTED_TOTAL, "HTTP requests rejected");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(host: &str, port: u16) -> Result<()> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("Invalid metrics address {host}:{port}"))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a frame.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record a persisted chat message.
pub fn record_persisted(destination: &Destination) {
    let kind = match destination {
        Destination::Direct { .. } => "direct",
        Destination::Group { .. } => "group",
    };
    counter!(names::PERSISTED_TOTAL, "destination" => kind).increment(1);
}

/// Record a rejected HTTP request.
pub fn record_rejected(reason: &'static str) {
    counter!(names::REJECTED_TOTAL, "reason" => reason).increment(1);
}

/// Publish hub statistics.
pub fn set_hub_stats(stats: HubStats) {
    gauge!(names::ROOMS_ACTIVE).set(stats.rooms as f64);
    gauge!(names::ONLINE_USERS).set(stats.online_users as f64);
    gauge!(names::EVICTIONS).set(stats.evictions as f64);
}

/// Poll hub statistics every `every` until the hub stops.
pub fn spawn_stats_refresher(hub: HubHandle, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match hub.stats().await {
                Ok(stats) => set_hub_stats(stats),
                Err(_) => {
                    debug!("Hub stopped, stats refresher exiting");
                    break;
                }
            }
        }
    })
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

/// A transport that counts the data frames passing through it.
pub struct Metered<T>(pub T);

impl<T: Transport> Transport for Metered<T> {
    type Reader = MeteredReader<T::Reader>;
    type Writer = MeteredWriter<T::Writer>;

    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn remote_addr(&self) -> Option<String> {
        self.0.remote_addr()
    }

    fn split(self) -> (Self::Reader, Self::Writer) {
        let (reader, writer) = self.0.split();
        (MeteredReader(reader), MeteredWriter(writer))
    }
}

/// Reading half of a [`Metered`] transport.
pub struct MeteredReader<R>(R);

#[async_trait]
impl<R: FrameReader> FrameReader for MeteredReader<R> {
    async fn recv(&mut self) -> Result<Option<WireMessage>, TransportError> {
        let message = self.0.recv().await?;
        if let Some(message) = &message {
            if message.is_data() {
                record_message(message.len(), "inbound");
            }
        }
        Ok(message)
    }
}

/// Writing half of a [`Metered`] transport.
pub struct MeteredWriter<W>(W);

#[async_trait]
impl<W: FrameWriter> FrameWriter for MeteredWriter<W> {
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError> {
        let len = message.is_data().then(|| message.len());
        self.0.send(message).await?;
        if let Some(len) = len {
            record_message(len, "outbound");
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.0.close().await
    }
}
