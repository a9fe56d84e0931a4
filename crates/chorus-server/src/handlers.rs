//! HTTP and WebSocket handlers for the Chorus server.
//!
//! Sessions are created over HTTP; the returned token authenticates the
//! WebSocket upgrade. Everything after the upgrade is handled by the hub's
//! connection adapter.

use crate::auth::{Authenticator, SessionStore};
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard, Metered};
use crate::store::MemoryStore;
use anyhow::{Context, Result};
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chorus_core::{
    handle_connection, unix_millis, Destination, Hub, HubError, HubHandle, Identity,
    MessageStore, UserProfile,
};
use chorus_protocol::{IdError, RoomId, ServerEnvelope, UserId, WireFormat};
use chorus_transport::WebSocketTransport;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// How often hub statistics are copied into the metrics gauges.
const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Shared server state.
pub struct AppState {
    /// The running hub.
    pub hub: HubHandle,
    /// Login sessions.
    pub sessions: SessionStore,
    /// Persisted chat messages.
    pub store: Arc<MemoryStore>,
    /// Server configuration.
    pub config: Config,
    connections: Arc<AtomicUsize>,
}

impl AppState {
    /// Create new app state around a running hub.
    #[must_use]
    pub fn new(config: Config, hub: HubHandle) -> Self {
        Self {
            sessions: SessionStore::new(Arc::new(hub.clone())),
            hub,
            store: Arc::new(MemoryStore::default()),
            config,
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Get the number of open WebSocket connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }

    /// Reserve a connection slot, unless `max_connections` is reached.
    fn acquire_slot(&self) -> Option<ConnectionSlot> {
        let max = self.config.limits.max_connections;
        self.connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count < max).then_some(count + 1)
            })
            .ok()
            .map(|_| ConnectionSlot(self.connections.clone()))
    }
}

/// A reserved connection slot, released on drop.
struct ConnectionSlot(Arc<AtomicUsize>);

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Request errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request is malformed.
    #[error("{0}")]
    BadRequest(String),

    /// Missing or unknown session token.
    #[error("Invalid or missing session token")]
    Unauthorized,

    /// The session does not exist.
    #[error("Session not found")]
    NotFound,

    /// Chat content exceeds the configured limit.
    #[error("Content too long: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    /// `max_connections` is reached.
    #[error("Too many connections")]
    AtCapacity,

    /// The hub has stopped.
    #[error(transparent)]
    Hub(#[from] HubError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::AtCapacity | ApiError::Hub(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Unauthorized => "unauthorized",
            ApiError::NotFound => "not_found",
            ApiError::PayloadTooLarge { .. } => "too_large",
            ApiError::AtCapacity => "at_capacity",
            ApiError::Hub(_) => "hub_closed",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        metrics::record_rejected(self.reason());
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/sessions", post(login_handler))
        .route("/sessions/:token", delete(logout_handler))
        .route("/rooms/:room_id/messages", post(post_message_handler))
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until Ctrl+C.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let (hub, hub_task) = Hub::spawn(config.hub_config());
    let state = Arc::new(AppState::new(config.clone(), hub.clone()));

    if config.metrics.enabled {
        metrics::start_metrics_server(&config.host, config.metrics.port)?;
        metrics::spawn_stats_refresher(hub.clone(), STATS_INTERVAL);
    }

    let app = router(state);

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Chorus server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Shutting down hub");
    hub.shutdown();
    hub_task.await.context("Hub task panicked")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

/// Body of `POST /sessions`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub user_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Response of `POST /sessions`.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

/// Create a session, replacing the user's previous one.
async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<(StatusCode, Json<LoginResponse>), ApiError> {
    let user = UserId::new(request.user_id).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let identity = Identity::new(user.clone()).with_profile(UserProfile {
        display_name: request.display_name,
        avatar_url: request.avatar_url,
    });

    let login = state.sessions.login(identity).await;
    let replaced = login.replaced.is_some();
    if let Some(old) = login.replaced {
        state.hub.revoke_session(user.clone(), old).await?;
    }

    info!(user = %user, replaced, "Login");
    Ok((StatusCode::CREATED, Json(LoginResponse { token: login.token })))
}

/// Delete a session and close its connections.
async fn logout_handler(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user = state
        .sessions
        .logout(&token)
        .await
        .ok_or(ApiError::NotFound)?;
    state.hub.revoke_session(user.clone(), token).await?;

    info!(user = %user, "Logout");
    Ok(StatusCode::NO_CONTENT)
}

/// Query string of the WebSocket upgrade.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
    /// `json` or `msgpack`.
    pub format: Option<String>,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<WsQuery>,
) -> Result<Response, ApiError> {
    let token = query.token.ok_or(ApiError::Unauthorized)?;
    let identity = state
        .sessions
        .authenticate(&token)
        .await
        .ok_or_else(|| {
            debug!(addr = %addr, "Rejected upgrade with unknown token");
            ApiError::Unauthorized
        })?;

    let format = match query.format {
        Some(format) => format
            .parse::<WireFormat>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        None => state.config.transport.default_format,
    };

    let slot = state.acquire_slot().ok_or_else(|| {
        warn!(addr = %addr, "Connection limit reached");
        ApiError::AtCapacity
    })?;

    debug!(addr = %addr, user = %identity.user_id, format = %format.as_str(), "WebSocket upgrade");

    let max_frame_size = state.config.limits.max_frame_size;
    Ok(ws
        .max_message_size(max_frame_size)
        .on_upgrade(move |socket| async move {
            let _slot = slot;

            // The session may have ended while the upgrade was in flight
            let Some(current) = state.sessions.authenticate(&token).await else {
                debug!(addr = %addr, user = %identity.user_id, "Session ended before upgrade completed");
                return;
            };
            let _metrics_guard = ConnectionMetricsGuard::new();

            let transport = Metered(WebSocketTransport::new(socket).with_remote_addr(addr));
            let store: Arc<dyn MessageStore> = state.store.clone();
            handle_connection(
                transport,
                current,
                format,
                state.hub.clone(),
                store,
                state.config.adapter_config(),
            )
            .await;
        }))
}

/// Body of `POST /rooms/:room_id/messages`.
#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub sender: String,
    pub content: String,
}

/// Persist a message and deliver it to every member of the room.
async fn post_message_handler(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Json(request): Json<PostMessageRequest>,
) -> Result<StatusCode, ApiError> {
    let room: RoomId = room_id
        .parse()
        .map_err(|e: IdError| ApiError::BadRequest(e.to_string()))?;
    let sender = UserId::new(request.sender).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let max = state.config.limits.max_content_length;
    if request.content.len() > max {
        return Err(ApiError::PayloadTooLarge {
            len: request.content.len(),
            max,
        });
    }
    if request.content.trim().is_empty() {
        return Err(ApiError::BadRequest("Content is empty".into()));
    }

    let destination = Destination::resolve(&room, &sender).ok_or_else(|| {
        ApiError::BadRequest(format!("{sender} cannot send messages to {room}"))
    })?;

    if let Err(e) = state
        .store
        .persist(&sender, &destination, &request.content)
        .await
    {
        warn!(room = %room, error = %e, "Failed to persist message");
    }

    let envelope = ServerEnvelope::new_message(room.clone(), sender, request.content, unix_millis());
    state.hub.broadcast(room.clone(), envelope, None).await?;

    debug!(room = %room, destination = %destination, "Server message accepted");
    Ok(StatusCode::ACCEPTED)
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.hub.stats().await {
        Ok(stats) => Json(serde_json::json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "rooms": stats.rooms,
            "connections": stats.connections,
            "onlineUsers": stats.online_users,
            "sessions": state.sessions.len(),
            "storedMessages": state.store.message_count(),
        }))
        .into_response(),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "unavailable",
                "version": env!("CARGO_PKG_VERSION"),
            })),
        )
            .into_response(),
    }
}
