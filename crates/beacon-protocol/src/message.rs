//! Chat message and conversation types.
//!
//! Messages are owned by the external message store; Beacon only observes
//! and relays them after the store confirms persistence.

use serde::{Deserialize, Serialize};

/// Opaque user identifier issued by the auth service.
pub type UserId = String;

/// Opaque message identifier issued by the message store.
pub type MessageId = String;

/// Identifier for one live connection, issued by the server at handshake.
pub type ConnectionId = String;

/// A persisted direct message between two users.
///
/// Immutable once persisted except for `read`, which transitions
/// false -> true exactly once and only on the receiver's behalf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Store-issued unique identifier.
    pub id: MessageId,
    /// Sending user.
    pub sender_id: UserId,
    /// Receiving user.
    pub receiver_id: UserId,
    /// Message body.
    pub content: String,
    /// Persistence timestamp, milliseconds since the Unix epoch.
    pub created_at: u64,
    /// Whether the receiver has read the message.
    #[serde(default)]
    pub read: bool,
}

impl ChatMessage {
    /// Create a new unread message.
    #[must_use]
    pub fn new(
        id: impl Into<MessageId>,
        sender_id: impl Into<UserId>,
        receiver_id: impl Into<UserId>,
        content: impl Into<String>,
        created_at: u64,
    ) -> Self {
        Self {
            id: id.into(),
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            content: content.into(),
            created_at,
            read: false,
        }
    }

    /// The conversation peer from `me`'s point of view.
    #[must_use]
    pub fn peer_of(&self, me: &str) -> &str {
        if self.sender_id == me {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }
}

/// Per-peer inbox entry: last message and unread count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// The conversation peer.
    pub peer_id: UserId,
    /// Most recent message in the conversation, if any.
    pub last_message: Option<ChatMessage>,
    /// Messages from the peer not yet marked read.
    pub unread: usize,
}
