//! Message fan-out for Beacon.
//!
//! The broadcaster pushes an already-persisted message to every open
//! connection owned by the sender and the receiver, so the sender's other
//! devices see their own outgoing message without a reload. It never
//! persists anything: the external message store is the single writer of
//! record and calls [`MessageBroadcaster::relay`] only after its own commit.

use crate::registry::ConnectionRegistry;
use beacon_protocol::{ChatMessage, Frame, UserId};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Fans persisted messages out to both parties' live connections.
#[derive(Debug, Clone)]
pub struct MessageBroadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl MessageBroadcaster {
    /// Create a broadcaster over the shared connection registry.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Relay one persisted message to the sender's and receiver's open
    /// connections.
    ///
    /// Each connection is targeted at most once even when sender and
    /// receiver are the same user. Sends are best effort and never block:
    /// a connection closing concurrently with the fan-out is skipped and
    /// delivery to the other party proceeds. Returns the number of
    /// connections that accepted the frame.
    pub fn relay(&self, message: &ChatMessage) -> usize {
        let mut targets: BTreeSet<String> = BTreeSet::new();
        targets.extend(self.registry.connections_of(&message.sender_id));
        targets.extend(self.registry.connections_of(&message.receiver_id));

        let frame = Frame::message_new(message.clone());
        let delivered = targets
            .iter()
            .filter(|conn_id| self.registry.send(conn_id, frame.clone()))
            .count();

        debug!(
            message = %message.id,
            sender = %message.sender_id,
            receiver = %message.receiver_id,
            targets = targets.len(),
            delivered,
            "Relayed message"
        );
        delivered
    }

    /// Push an opaque notification to one user's open connections.
    pub fn notify(&self, user_id: &UserId, message: &str, icon: Option<String>) -> usize {
        let delivered = self
            .registry
            .send_to_user(user_id, &Frame::notification(message, icon));
        debug!(user = %user_id, delivered, "Delivered notification");
        delivered
    }
}
