//! Connection handlers for the Beacon server.
//!
//! This module owns the connection lifecycle: credential handshake,
//! presence registration, the per-connection frame loop, and the internal
//! relay endpoint the message store calls after persisting a message.

use crate::auth::{SessionEntry, SessionTable};
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use beacon_core::{
    generate_connection_id, Authenticator, ConnectionRegistry, MessageBroadcaster,
    PresenceTracker, PresenceTransition, TypingChannel,
};
use beacon_protocol::{codec, codes, ChatMessage, Frame, UserId, PROTOCOL_VERSION};
use bytes::BytesMut;
use futures_util::{stream::SplitStream, SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Shared server state.
pub struct AppState {
    /// Live connection send handles.
    pub registry: Arc<ConnectionRegistry>,
    /// Online/offline derivation.
    pub presence: PresenceTracker,
    /// Ephemeral per-pair typing state.
    pub typing: TypingChannel,
    /// Fan-out of store-persisted messages.
    pub broadcaster: MessageBroadcaster,
    /// Sessions announced by the auth service; validates handshakes.
    pub sessions: Arc<SessionTable>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config, sessions: Arc<SessionTable>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            broadcaster: MessageBroadcaster::new(Arc::clone(&registry)),
            registry,
            presence: PresenceTracker::new(),
            typing: TypingChannel::new(),
            sessions,
            config,
        }
    }

    /// Whether another connection fits under the configured cap.
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.registry.len() < self.config.limits.max_connections
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config, sessions: Arc<SessionTable>) -> Result<()> {
    let ws_path = config.websocket_path.clone();
    let addr = config.bind_addr()?;

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            warn!("Failed to start metrics server: {}", e);
        }
    }

    let state = Arc::new(AppState::new(config, sessions));
    let app = router(state);

    let listener = TcpListener::bind(addr).await?;

    info!("Beacon server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, ws_path);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the HTTP router over shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let ws_path = state.config.websocket_path.clone();
    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/internal/relay", post(relay_handler))
        .route("/internal/notify", post(notify_handler))
        .route("/internal/sessions", post(session_announce_handler))
        .route("/internal/sessions/revoke", post(session_revoke_handler))
        .with_state(state)
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Relay endpoint for the message store's write path.
///
/// The store calls this once per message, strictly after its own commit;
/// the server never decides whether to persist. The response reports how
/// many live connections the message reached (possibly zero).
async fn relay_handler(
    State(state): State<Arc<AppState>>,
    Json(message): Json<ChatMessage>,
) -> impl IntoResponse {
    let delivered = state.broadcaster.relay(&message);
    metrics::record_relay(delivered);
    Json(serde_json::json!({ "delivered": delivered }))
}

/// Out-of-band notification payload.
#[derive(Debug, Deserialize)]
struct NotifyRequest {
    user_id: UserId,
    message: String,
    #[serde(default)]
    icon: Option<String>,
}

/// Notification endpoint for other platform services.
async fn notify_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NotifyRequest>,
) -> impl IntoResponse {
    let delivered = state
        .broadcaster
        .notify(&request.user_id, &request.message, request.icon);
    Json(serde_json::json!({ "delivered": delivered }))
}

/// Session announcement from the auth service.
async fn session_announce_handler(
    State(state): State<Arc<AppState>>,
    Json(entry): Json<SessionEntry>,
) -> impl IntoResponse {
    state.sessions.insert(entry.token, entry.user_id);
    Json(serde_json::json!({ "status": "ok" }))
}

/// Session revocation payload.
#[derive(Debug, Deserialize)]
struct RevokeRequest {
    token: String,
}

/// Session revocation from the auth service. Open connections stay up;
/// the credential just stops working for future handshakes.
async fn session_revoke_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RevokeRequest>,
) -> impl IntoResponse {
    let revoked = state.sessions.revoke(&request.token);
    Json(serde_json::json!({ "revoked": revoked }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Why a handshake was rejected before any connection existed.
enum HandshakeReject {
    Auth(beacon_core::AuthError),
    NotConnect,
    Malformed,
    Version(u8),
    Capacity,
    Timeout,
    TransportClosed,
}

impl HandshakeReject {
    fn as_frame(&self) -> Option<Frame> {
        match self {
            HandshakeReject::Auth(error) => {
                Some(Frame::error(codes::AUTH_FAILED, error.to_string()))
            }
            HandshakeReject::NotConnect => Some(Frame::error(
                codes::HANDSHAKE_EXPECTED,
                "First frame must be connect",
            )),
            HandshakeReject::Malformed => Some(Frame::error(
                codes::HANDSHAKE_EXPECTED,
                "Malformed handshake frame",
            )),
            HandshakeReject::Version(version) => Some(Frame::error(
                codes::VERSION_MISMATCH,
                format!("Unsupported protocol version {version}"),
            )),
            HandshakeReject::Capacity => Some(Frame::error(
                codes::SERVER_FULL,
                "Connection limit reached",
            )),
            HandshakeReject::Timeout | HandshakeReject::TransportClosed => None,
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            HandshakeReject::Auth(_) => "auth",
            HandshakeReject::NotConnect => "not_connect",
            HandshakeReject::Malformed => "malformed",
            HandshakeReject::Version(_) => "version",
            HandshakeReject::Capacity => "capacity",
            HandshakeReject::Timeout => "timeout",
            HandshakeReject::TransportClosed => "closed",
        }
    }
}

/// Handle a WebSocket connection end to end.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut read_buffer = BytesMut::with_capacity(4096);

    // Credential handshake. Until it succeeds no connection exists: nothing
    // is registered and no identity can be adopted later.
    let user_id = match handshake(&state, &mut receiver, &mut read_buffer).await {
        Ok(user_id) => user_id,
        Err(reject) => {
            metrics::record_handshake_failure(reject.reason());
            if let Some(frame) = reject.as_frame() {
                if let Ok(data) = codec::encode(&frame) {
                    let _ = sender.send(Message::Binary(data.to_vec())).await;
                }
            }
            let _ = sender.close().await;
            return;
        }
    };

    let _metrics_guard = ConnectionMetricsGuard::new();
    let connection_id = generate_connection_id();
    debug!(connection = %connection_id, user = %user_id, "Handshake complete");

    let mut outbound = state.registry.insert(&connection_id, user_id.clone());

    // Confirm the handshake before any pushed event can race it.
    let connected = Frame::connected(
        &connection_id,
        state.config.timing.heartbeat_interval_ms as u32,
    );
    if let Ok(data) = codec::encode(&connected) {
        if sender.send(Message::Binary(data.to_vec())).await.is_err() {
            state.registry.remove(&connection_id);
            return;
        }
    }

    // Presence: only the 0 -> 1 boundary is announced, system-wide.
    if let Some(PresenceTransition::Online(user)) =
        state.presence.register(&user_id, &connection_id)
    {
        state
            .registry
            .broadcast_except(&connection_id, &Frame::online(&user));
        metrics::record_presence_transition("online");
    }
    metrics::set_online_users(state.presence.online_count());

    // Frame loop. The heartbeat timer probes the client at the advertised
    // interval and drops the connection once inbound traffic stops for the
    // configured timeout, so a silently dead peer cannot hold its registry
    // entry and presence count.
    let heartbeat = Duration::from_millis(state.config.timing.heartbeat_interval_ms);
    let idle_timeout = Duration::from_millis(state.config.timing.heartbeat_timeout_ms);
    let mut heartbeat_timer =
        tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);
    let mut last_inbound = tokio::time::Instant::now();

    loop {
        tokio::select! {
            biased;

            // Deliver queued outbound frames.
            frame = outbound.recv() => {
                match frame {
                    Some(frame) => {
                        if let Ok(data) = codec::encode(&frame) {
                            if sender.send(Message::Binary(data.to_vec())).await.is_err() {
                                break;
                            }
                        }
                    }
                    None => break,
                }
            }

            _ = heartbeat_timer.tick() => {
                match keepalive_step(last_inbound.elapsed(), idle_timeout) {
                    KeepaliveStep::Disconnect => {
                        warn!(connection = %connection_id, "No inbound traffic within heartbeat timeout, closing");
                        metrics::record_error("idle_timeout");
                        break;
                    }
                    KeepaliveStep::Ping => {
                        if let Ok(data) = codec::encode(&Frame::ping()) {
                            if sender.send(Message::Binary(data.to_vec())).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }

            // Receive from WebSocket.
            msg = receiver.next() => {
                if msg.is_some() {
                    last_inbound = tokio::time::Instant::now();
                }
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        if data.len() > state.config.limits.max_message_size {
                            warn!(connection = %connection_id, size = data.len(), "Oversized message, closing");
                            metrics::record_error("oversized");
                            break;
                        }
                        read_buffer.extend_from_slice(&data);

                        loop {
                            match codec::decode_from(&mut read_buffer) {
                                Ok(Some(frame)) => {
                                    handle_frame(&frame, &connection_id, &user_id, &state);
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    warn!(connection = %connection_id, error = %e, "Protocol error");
                                    metrics::record_error("protocol");
                                    read_buffer.clear();
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        // Treat text as binary
                        read_buffer.extend_from_slice(text.as_bytes());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Cleanup. Removing the registry entry first stops further delivery
    // attempts immediately; persistence that already happened in the store
    // is untouched.
    let lifetime_ms = state
        .registry
        .age_of(&connection_id)
        .map(|age| age.as_millis() as u64)
        .unwrap_or_default();
    state.registry.remove(&connection_id);
    if let Some(PresenceTransition::Offline(user)) =
        state.presence.deregister(&user_id, &connection_id)
    {
        state
            .registry
            .broadcast_except(&connection_id, &Frame::offline(&user));
        metrics::record_presence_transition("offline");
    }
    metrics::set_online_users(state.presence.online_count());

    debug!(connection = %connection_id, user = %user_id, lifetime_ms, "Disconnected");
}

/// Decision taken by the heartbeat timer on each tick.
#[derive(Debug, PartialEq, Eq)]
enum KeepaliveStep {
    /// Probe the client with a protocol ping.
    Ping,
    /// No inbound traffic within the timeout; drop the connection.
    Disconnect,
}

fn keepalive_step(idle_for: Duration, idle_timeout: Duration) -> KeepaliveStep {
    if idle_for >= idle_timeout {
        KeepaliveStep::Disconnect
    } else {
        KeepaliveStep::Ping
    }
}

/// Await and validate the Connect frame on a fresh channel.
async fn handshake(
    state: &Arc<AppState>,
    receiver: &mut SplitStream<WebSocket>,
    read_buffer: &mut BytesMut,
) -> Result<UserId, HandshakeReject> {
    let timeout = Duration::from_millis(state.config.timing.handshake_timeout_ms);
    let deadline = tokio::time::Instant::now() + timeout;

    let frame = loop {
        match codec::decode_from(read_buffer) {
            Ok(Some(frame)) => break frame,
            Ok(None) => {}
            Err(_) => return Err(HandshakeReject::Malformed),
        }

        let msg = tokio::time::timeout_at(deadline, receiver.next())
            .await
            .map_err(|_| HandshakeReject::Timeout)?;

        match msg {
            Some(Ok(Message::Binary(data))) => read_buffer.extend_from_slice(&data),
            Some(Ok(Message::Text(text))) => read_buffer.extend_from_slice(text.as_bytes()),
            Some(Ok(Message::Close(_))) | None => return Err(HandshakeReject::TransportClosed),
            Some(Ok(_)) => continue,
            Some(Err(_)) => return Err(HandshakeReject::TransportClosed),
        }
    };

    let Frame::Connect { version, token } = frame else {
        return Err(HandshakeReject::NotConnect);
    };
    if version != PROTOCOL_VERSION {
        return Err(HandshakeReject::Version(version));
    }
    if !state.has_capacity() {
        return Err(HandshakeReject::Capacity);
    }

    state
        .sessions
        .authenticate(&token)
        .await
        .map_err(HandshakeReject::Auth)
}

/// Handle one decoded frame from an authenticated connection.
fn handle_frame(frame: &Frame, connection_id: &str, user_id: &str, state: &Arc<AppState>) {
    match frame {
        // Sender identity always comes from the handshake, never the frame.
        Frame::TypingStart { receiver_id, .. } => {
            state.typing.signal(user_id, receiver_id, now_ms());
            state
                .registry
                .send_to_user(receiver_id, &Frame::typing_start(user_id, receiver_id));
            metrics::record_typing_signal("start");
        }

        Frame::TypingStop { receiver_id, .. } => {
            state.typing.stop(user_id, receiver_id);
            state
                .registry
                .send_to_user(receiver_id, &Frame::typing_stop(user_id, receiver_id));
            metrics::record_typing_signal("stop");
        }

        Frame::Ping { timestamp } => {
            state.registry.send(connection_id, Frame::pong(*timestamp));
        }

        Frame::Connect { .. } => {
            debug!(connection = %connection_id, "Connect frame (already connected)");
        }

        other => {
            warn!(
                connection = %connection_id,
                frame_type = ?other.frame_type(),
                "Unexpected frame type"
            );
            metrics::record_error("unexpected_frame");
            state.registry.send(
                connection_id,
                Frame::error(
                    codes::UNEXPECTED_FRAME,
                    format!("Frame type {:?} is not accepted from clients", other.frame_type()),
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_client::store::testing::MemoryStore;
    use beacon_client::{ConversationAggregator, Ingest, MessageStore};
    use beacon_core::AuthError;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn test_state() -> Arc<AppState> {
        let sessions = Arc::new(SessionTable::new());
        sessions.insert("tok-alice", "alice");
        sessions.insert("tok-bob", "bob");
        Arc::new(AppState::new(Config::default(), sessions))
    }

    fn drain(rx: &mut UnboundedReceiver<Frame>) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn test_sessions_reject_unknown_token() {
        let state = test_state();
        assert_eq!(
            state.sessions.authenticate("bogus").await.unwrap_err(),
            AuthError::InvalidToken
        );
        assert_eq!(
            state.sessions.authenticate("tok-alice").await.unwrap(),
            "alice"
        );
    }

    #[tokio::test]
    async fn test_typing_frames_relay_with_forced_sender() {
        let state = test_state();
        let _alice = state.registry.insert("a1", "alice");
        let mut bob = state.registry.insert("b1", "bob");

        // A forged sender id in the frame is ignored.
        let forged = Frame::typing_start("mallory", "bob");
        handle_frame(&forged, "a1", "alice", &state);

        assert_eq!(drain(&mut bob), vec![Frame::typing_start("alice", "bob")]);
        assert!(state.typing.is_active("alice", "bob", now_ms()));

        handle_frame(&Frame::typing_stop("", "bob"), "a1", "alice", &state);
        assert_eq!(drain(&mut bob), vec![Frame::typing_stop("alice", "bob")]);
        assert!(!state.typing.is_active("alice", "bob", now_ms()));
    }

    #[tokio::test]
    async fn test_connection_cap_enforced_at_handshake() {
        let sessions = Arc::new(SessionTable::new());
        sessions.insert("tok-alice", "alice");
        let mut config = Config::default();
        config.limits.max_connections = 1;
        let state = Arc::new(AppState::new(config, sessions));

        assert!(state.has_capacity());
        let _a1 = state.registry.insert("a1", "alice");
        assert!(!state.has_capacity());

        // A rejected handshake reports the cap to the client.
        assert_eq!(
            HandshakeReject::Capacity.as_frame(),
            Some(Frame::error(codes::SERVER_FULL, "Connection limit reached"))
        );
        assert_eq!(HandshakeReject::Capacity.reason(), "capacity");

        // Closing a connection frees the slot.
        state.registry.remove("a1");
        assert!(state.has_capacity());
    }

    #[test]
    fn test_keepalive_disconnects_once_timeout_elapses() {
        let timeout = Duration::from_millis(90_000);

        assert_eq!(
            keepalive_step(Duration::from_millis(89_999), timeout),
            KeepaliveStep::Ping
        );
        assert_eq!(
            keepalive_step(Duration::from_millis(90_000), timeout),
            KeepaliveStep::Disconnect
        );
        assert_eq!(
            keepalive_step(Duration::ZERO, timeout),
            KeepaliveStep::Ping
        );
    }

    #[tokio::test]
    async fn test_unexpected_frame_answered_with_error() {
        let state = test_state();
        let mut alice = state.registry.insert("a1", "alice");

        // Presence frames are server-push only.
        handle_frame(&Frame::online("mallory"), "a1", "alice", &state);

        let frames = drain(&mut alice);
        assert_eq!(frames.len(), 1);
        assert!(
            matches!(&frames[0], Frame::Error { code, .. } if *code == codes::UNEXPECTED_FRAME)
        );
    }

    #[tokio::test]
    async fn test_ping_answered_on_own_connection() {
        let state = test_state();
        let mut alice = state.registry.insert("a1", "alice");

        handle_frame(&Frame::Ping { timestamp: Some(7) }, "a1", "alice", &state);
        assert_eq!(drain(&mut alice), vec![Frame::pong(Some(7))]);
    }

    /// User A (two open connections) sends "hi" to offline user B; B later
    /// connects and catches up from the store.
    #[tokio::test]
    async fn test_end_to_end_offline_receiver_scenario() {
        let state = test_state();

        // A's two devices connect and come online once.
        let mut a1 = state.registry.insert("a1", "alice");
        let mut a2 = state.registry.insert("a2", "alice");
        assert!(matches!(
            state.presence.register("alice", "a1"),
            Some(PresenceTransition::Online(_))
        ));
        assert!(state.presence.register("alice", "a2").is_none());

        // A persists "hi" via the store; the store's write path relays.
        let store = MemoryStore::new("alice");
        store.set_now(1_000);
        let m1 = store.send("bob", "hi").await.unwrap();
        let delivered = state.broadcaster.relay(&m1);

        // Both of A's connections get exactly one copy; B has none open.
        assert_eq!(delivered, 2);
        assert_eq!(drain(&mut a1), vec![Frame::message_new(m1.clone())]);
        assert_eq!(drain(&mut a2), vec![Frame::message_new(m1.clone())]);

        // B connects: exactly one online(B) system-wide, seen by A only.
        let _b1 = state.registry.insert("b1", "bob");
        if let Some(PresenceTransition::Online(user)) = state.presence.register("bob", "b1") {
            state.registry.broadcast_except("b1", &Frame::online(&user));
        } else {
            panic!("expected online transition");
        }
        assert_eq!(drain(&mut a1), vec![Frame::online("bob")]);
        assert_eq!(drain(&mut a2), vec![Frame::online("bob")]);

        // B's history fetch includes m1 unread.
        let bob_store = MemoryStore::new("bob");
        bob_store.seed(m1.clone());
        let history = bob_store.history("alice").await.unwrap();

        let mut inbox = ConversationAggregator::new("bob");
        inbox.ingest_history("alice", history);
        assert_eq!(inbox.unread("alice"), 1);

        // A late duplicate relay of m1 changes nothing.
        assert_eq!(inbox.ingest_live(&m1), Ingest::Duplicate);
        assert_eq!(inbox.unread("alice"), 1);
        assert_eq!(inbox.messages("alice").len(), 1);
    }
}
