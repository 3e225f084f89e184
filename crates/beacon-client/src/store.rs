//! Message store seam.
//!
//! The external store is the single writer of message records: clients
//! request persistence here and the realtime layer only ever relays what
//! the store has already committed. A send that fails at the store was
//! therefore never broadcast, and the caller may retry with the same
//! content.

use async_trait::async_trait;
use beacon_protocol::{ChatMessage, ConversationSummary, MessageId, UserId};
use thiserror::Error;
use tracing::warn;

/// Message store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected the request.
    #[error("Store rejected request: {0}")]
    Rejected(String),
}

/// Request/response contract of the external message store.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a new message to a receiver. On success the store relays it
    /// to both parties' live connections; on failure nothing was broadcast.
    async fn send(&self, receiver_id: &str, content: &str) -> Result<ChatMessage, StoreError>;

    /// Mark a message read. Idempotent: marking an already-read message is
    /// a no-op, not an error.
    async fn mark_read(&self, message_id: &str) -> Result<(), StoreError>;

    /// Full message history with one peer.
    async fn history(&self, peer_id: &str) -> Result<Vec<ChatMessage>, StoreError>;

    /// Server-side conversation summaries, for bootstrapping the inbox.
    async fn conversations(&self) -> Result<Vec<ConversationSummary>, StoreError>;
}

/// Acknowledge a batch of locally-read messages against the store.
///
/// Failures are logged and swallowed: the local unread state is already
/// consistent, and the idempotent mark-read can be retried on the next
/// occasion.
pub async fn acknowledge_read<S: MessageStore + ?Sized>(store: &S, message_ids: &[MessageId]) {
    for message_id in message_ids {
        if let Err(error) = store.mark_read(message_id).await {
            warn!(message = %message_id, %error, "mark-read failed, will retry later");
        }
    }
}

pub mod testing {
    //! In-memory store for tests and local development.

    use super::*;
    use std::sync::Mutex;

    /// Store state shared behind a mutex; test-only, contention-free.
    #[derive(Debug, Default)]
    struct Inner {
        messages: Vec<ChatMessage>,
        next_id: u64,
        now_ms: u64,
        /// When set, `send` fails without persisting.
        fail_sends: bool,
    }

    /// In-memory [`MessageStore`] acting on behalf of one user.
    #[derive(Debug)]
    pub struct MemoryStore {
        me: UserId,
        inner: Mutex<Inner>,
    }

    impl MemoryStore {
        /// Create a store view for `me`.
        #[must_use]
        pub fn new(me: impl Into<UserId>) -> Self {
            Self {
                me: me.into(),
                inner: Mutex::new(Inner::default()),
            }
        }

        /// Advance the store's virtual clock.
        pub fn set_now(&self, now_ms: u64) {
            self.inner.lock().unwrap().now_ms = now_ms;
        }

        /// Make subsequent sends fail before persisting.
        pub fn fail_sends(&self, fail: bool) {
            self.inner.lock().unwrap().fail_sends = fail;
        }

        /// Seed a persisted message directly, as another client would.
        pub fn seed(&self, message: ChatMessage) {
            self.inner.lock().unwrap().messages.push(message);
        }

        /// Number of persisted messages.
        #[must_use]
        pub fn len(&self) -> usize {
            self.inner.lock().unwrap().messages.len()
        }

        /// Whether nothing was persisted.
        #[must_use]
        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }
    }

    #[async_trait]
    impl MessageStore for MemoryStore {
        async fn send(&self, receiver_id: &str, content: &str) -> Result<ChatMessage, StoreError> {
            let mut inner = self.inner.lock().unwrap();
            if inner.fail_sends {
                return Err(StoreError::Unavailable("injected failure".into()));
            }

            inner.next_id += 1;
            let message = ChatMessage::new(
                format!("m{}", inner.next_id),
                self.me.clone(),
                receiver_id,
                content,
                inner.now_ms,
            );
            inner.messages.push(message.clone());
            Ok(message)
        }

        async fn mark_read(&self, message_id: &str) -> Result<(), StoreError> {
            let mut inner = self.inner.lock().unwrap();
            for message in &mut inner.messages {
                if message.id == message_id {
                    message.read = true;
                }
            }
            Ok(())
        }

        async fn history(&self, peer_id: &str) -> Result<Vec<ChatMessage>, StoreError> {
            let inner = self.inner.lock().unwrap();
            let mut messages: Vec<ChatMessage> = inner
                .messages
                .iter()
                .filter(|message| {
                    (message.sender_id == self.me && message.receiver_id == peer_id)
                        || (message.sender_id == peer_id && message.receiver_id == self.me)
                })
                .cloned()
                .collect();
            messages.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
            Ok(messages)
        }

        async fn conversations(&self) -> Result<Vec<ConversationSummary>, StoreError> {
            use std::collections::BTreeMap;

            let inner = self.inner.lock().unwrap();
            let mut by_peer: BTreeMap<String, (Option<ChatMessage>, usize)> = BTreeMap::new();
            for message in &inner.messages {
                let peer = message.peer_of(&self.me).to_string();
                let entry = by_peer.entry(peer.clone()).or_default();
                if message.sender_id == peer && !message.read {
                    entry.1 += 1;
                }
                let newer = entry
                    .0
                    .as_ref()
                    .map(|last| message.created_at >= last.created_at)
                    .unwrap_or(true);
                if newer {
                    entry.0 = Some(message.clone());
                }
            }

            Ok(by_peer
                .into_iter()
                .map(|(peer_id, (last_message, unread))| ConversationSummary {
                    peer_id,
                    last_message,
                    unread,
                })
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MemoryStore;
    use super::*;

    #[tokio::test]
    async fn test_send_persists_and_assigns_id() {
        let store = MemoryStore::new("alice");
        store.set_now(1_000);

        let message = store.send("bob", "hi").await.unwrap();
        assert_eq!(message.sender_id, "alice");
        assert_eq!(message.receiver_id, "bob");
        assert_eq!(message.created_at, 1_000);
        assert!(!message.read);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_send_persists_nothing() {
        let store = MemoryStore::new("alice");
        store.fail_sends(true);

        assert!(store.send("bob", "hi").await.is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_mark_read_idempotent() {
        let store = MemoryStore::new("alice");
        let message = store.send("bob", "hi").await.unwrap();

        store.mark_read(&message.id).await.unwrap();
        store.mark_read(&message.id).await.unwrap();
        store.mark_read("unknown").await.unwrap();
    }

    #[tokio::test]
    async fn test_history_scoped_to_peer() {
        let store = MemoryStore::new("alice");
        store.send("bob", "to bob").await.unwrap();
        store.send("carol", "to carol").await.unwrap();
        store.seed(beacon_protocol::ChatMessage::new(
            "x1", "bob", "alice", "from bob", 5,
        ));

        let history = store.history("bob").await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history
            .iter()
            .all(|message| message.peer_of("alice") == "bob"));
    }

    #[tokio::test]
    async fn test_acknowledge_read_swallows_failures() {
        let store = MemoryStore::new("alice");
        let message = store.send("bob", "hi").await.unwrap();

        // Unknown ids do not fail the batch.
        acknowledge_read(&store, &[message.id, "unknown".to_string()]).await;
    }
}
