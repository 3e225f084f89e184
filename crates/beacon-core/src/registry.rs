//! Connection registry for Beacon.
//!
//! The registry owns the send side of every live connection. All delivery
//! paths (message relay, typing signals, presence broadcast) go through it,
//! and every send is best effort: a connection that closed concurrently is
//! skipped, never an error that aborts delivery to other targets.

use beacon_protocol::{ConnectionId, Frame, UserId};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Monotonic suffix so connection ids stay unique within one nanosecond.
static CONN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a fresh connection id. Ids are never reused across reconnects.
#[must_use]
pub fn generate_connection_id() -> ConnectionId {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let counter = CONN_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("conn_{timestamp:x}_{counter:x}")
}

/// The send half of one live, authenticated connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Owning user. A connection without an authenticated user never exists.
    pub user_id: UserId,
    /// When the handshake completed, milliseconds since the Unix epoch.
    pub opened_at: u64,
    /// Outbound frame queue drained by the connection's writer task.
    outbound: mpsc::UnboundedSender<Frame>,
}

/// Registry of live connections, keyed by connection id.
///
/// Entries are inserted only after a successful credential handshake and
/// removed as soon as the connection closes, so a removed connection stops
/// receiving delivery attempts immediately.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionHandle>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an authenticated connection.
    ///
    /// Returns the receive half of the outbound queue; the caller's writer
    /// task drains it onto the transport.
    pub fn insert(
        &self,
        connection_id: &str,
        user_id: impl Into<UserId>,
    ) -> mpsc::UnboundedReceiver<Frame> {
        let (tx, rx) = mpsc::unbounded_channel();
        let user_id = user_id.into();
        let opened_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        debug!(connection = %connection_id, user = %user_id, "Connection registered");
        self.connections.insert(
            connection_id.to_string(),
            ConnectionHandle {
                user_id,
                opened_at,
                outbound: tx,
            },
        );
        rx
    }

    /// Remove a connection. Further sends to it become no-ops.
    pub fn remove(&self, connection_id: &str) -> Option<UserId> {
        let removed = self.connections.remove(connection_id);
        if removed.is_some() {
            debug!(connection = %connection_id, "Connection removed");
        }
        removed.map(|(_, handle)| handle.user_id)
    }

    /// Send a frame to one connection, best effort.
    ///
    /// Returns `false` if the connection is gone or its writer task has shut
    /// down; the caller carries on regardless.
    pub fn send(&self, connection_id: &str, frame: Frame) -> bool {
        match self.connections.get(connection_id) {
            Some(handle) => handle.outbound.send(frame).is_ok(),
            None => {
                trace!(connection = %connection_id, "Send to unknown connection dropped");
                false
            }
        }
    }

    /// Send a frame to every open connection owned by a user.
    ///
    /// Returns the number of connections that accepted the frame.
    pub fn send_to_user(&self, user_id: &str, frame: &Frame) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .filter(|entry| entry.outbound.send(frame.clone()).is_ok())
            .count()
    }

    /// Broadcast a frame to every connection except the named one.
    ///
    /// Used for system-wide presence transitions.
    pub fn broadcast_except(&self, connection_id: &str, frame: &Frame) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.key() != connection_id)
            .filter(|entry| entry.outbound.send(frame.clone()).is_ok())
            .count()
    }

    /// Connection ids currently owned by a user.
    #[must_use]
    pub fn connections_of(&self, user_id: &str) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// How long a connection has been open, if it still is.
    #[must_use]
    pub fn age_of(&self, connection_id: &str) -> Option<Duration> {
        self.connections.get(connection_id).map(|handle| {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64;
            Duration::from_millis(now.saturating_sub(handle.opened_at))
        })
    }

    /// The user owning a connection, if it is still open.
    #[must_use]
    pub fn owner_of(&self, connection_id: &str) -> Option<UserId> {
        self.connections
            .get(connection_id)
            .map(|handle| handle.user_id.clone())
    }

    /// Number of open connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether the registry has no open connections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Whether a connection is open.
    #[must_use]
    pub fn contains(&self, connection_id: &str) -> bool {
        self.connections.contains_key(connection_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_connection_id_unique() {
        let a = generate_connection_id();
        let b = generate_connection_id();
        assert_ne!(a, b);
        assert!(a.starts_with("conn_"));
    }

    #[tokio::test]
    async fn test_insert_send_remove() {
        let registry = ConnectionRegistry::new();
        let mut rx = registry.insert("c1", "alice");

        assert!(registry.contains("c1"));
        assert_eq!(registry.owner_of("c1").as_deref(), Some("alice"));

        assert!(registry.send("c1", Frame::ping()));
        assert_eq!(rx.recv().await.unwrap(), Frame::ping());

        assert_eq!(registry.remove("c1").as_deref(), Some("alice"));
        assert!(!registry.send("c1", Frame::ping()));
    }

    #[tokio::test]
    async fn test_send_to_user_hits_all_devices() {
        let registry = ConnectionRegistry::new();
        let mut rx1 = registry.insert("c1", "alice");
        let mut rx2 = registry.insert("c2", "alice");
        let mut rx3 = registry.insert("c3", "bob");

        let delivered = registry.send_to_user("alice", &Frame::ping());
        assert_eq!(delivered, 2);
        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped_is_noop() {
        let registry = ConnectionRegistry::new();
        let rx = registry.insert("c1", "alice");
        drop(rx);

        // Writer task gone: send reports failure but does not panic or error.
        assert!(!registry.send("c1", Frame::ping()));
        assert_eq!(registry.send_to_user("alice", &Frame::ping()), 0);
    }

    #[tokio::test]
    async fn test_age_of_tracks_open_connections_only() {
        let registry = ConnectionRegistry::new();
        let _rx = registry.insert("c1", "alice");

        assert!(registry.age_of("c1").is_some());
        assert!(registry.age_of("missing").is_none());

        registry.remove("c1");
        assert!(registry.age_of("c1").is_none());
    }

    #[tokio::test]
    async fn test_broadcast_except_skips_origin() {
        let registry = ConnectionRegistry::new();
        let mut rx1 = registry.insert("c1", "alice");
        let mut rx2 = registry.insert("c2", "bob");

        let delivered = registry.broadcast_except("c1", &Frame::online("alice"));
        assert_eq!(delivered, 1);
        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.recv().await.unwrap(), Frame::online("alice"));
    }
}
