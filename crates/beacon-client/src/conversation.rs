//! Per-peer inbox aggregation.
//!
//! The aggregator folds the store's history snapshots and the live relay
//! stream into one view per conversation peer. The two sources overlap by
//! design (a message can arrive via relay and again in a later history
//! fetch), so everything merges by message id and is positioned by
//! timestamp, not arrival order.

use beacon_protocol::{ChatMessage, ConversationSummary, MessageId, UserId};
use std::collections::{BTreeMap, HashMap};
use tracing::trace;

/// Outcome of feeding one live message to the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingest {
    /// New message inserted into the peer's conversation.
    Inserted {
        /// Conversation peer the message belongs to.
        peer: UserId,
        /// The message was from the focused peer and was marked read
        /// locally; the caller should fire the store's idempotent
        /// mark-read for it.
        auto_read: bool,
    },
    /// Message id already known; nothing changed except a possible
    /// read-flag upgrade.
    Duplicate,
}

/// One side of a conversation as observed by this client.
#[derive(Debug, Default)]
struct Conversation {
    /// Messages ordered by (timestamp, id); the id tie-breaker keeps
    /// same-millisecond messages stable.
    ordered: BTreeMap<(u64, MessageId), ChatMessage>,
    /// Messages from the peer not yet marked read.
    unread: usize,
}

impl Conversation {
    fn last_message(&self) -> Option<&ChatMessage> {
        self.ordered.values().next_back()
    }
}

/// Folds history snapshots and live relays into per-peer summaries.
///
/// All operations are from the point of view of one local user (`me`).
#[derive(Debug)]
pub struct ConversationAggregator {
    me: UserId,
    focused: Option<UserId>,
    conversations: HashMap<UserId, Conversation>,
    /// message id -> (peer, sort key), the dedup index across sources.
    index: HashMap<MessageId, (UserId, (u64, MessageId))>,
}

impl ConversationAggregator {
    /// Create an aggregator for the local user.
    #[must_use]
    pub fn new(me: impl Into<UserId>) -> Self {
        Self {
            me: me.into(),
            focused: None,
            conversations: HashMap::new(),
            index: HashMap::new(),
        }
    }

    /// The local user this view belongs to.
    #[must_use]
    pub fn me(&self) -> &str {
        &self.me
    }

    /// Mark a conversation as the currently-open one (or none).
    ///
    /// Returns the ids of currently-unread messages from that peer; the
    /// caller should acknowledge them against the store. They are marked
    /// read locally right away so the unread badge clears without waiting
    /// on the network.
    pub fn set_focus(&mut self, peer: Option<UserId>) -> Vec<MessageId> {
        self.focused = peer;

        let Some(peer) = self.focused.clone() else {
            return Vec::new();
        };
        let Some(conversation) = self.conversations.get_mut(&peer) else {
            return Vec::new();
        };

        let mut acked = Vec::new();
        for message in conversation.ordered.values_mut() {
            if message.sender_id == peer && !message.read {
                message.read = true;
                conversation.unread -= 1;
                acked.push(message.id.clone());
            }
        }
        acked
    }

    /// Ingest a bulk history snapshot for one peer, e.g. on conversation
    /// open. Messages already known from the live stream are merged, with
    /// the read flag only ever upgraded.
    pub fn ingest_history(&mut self, peer: &str, messages: Vec<ChatMessage>) {
        for message in messages {
            self.merge(peer.to_string(), message);
        }
    }

    /// Ingest one live message from the relay stream.
    pub fn ingest_live(&mut self, message: &ChatMessage) -> Ingest {
        let peer = message.peer_of(&self.me).to_string();

        if self.index.contains_key(&message.id) {
            trace!(message = %message.id, "Duplicate delivery discarded");
            self.merge(peer, message.clone());
            return Ingest::Duplicate;
        }

        let mut message = message.clone();
        let incoming = message.sender_id == peer;
        let auto_read =
            incoming && !message.read && self.focused.as_deref() == Some(peer.as_str());
        if auto_read {
            message.read = true;
        }

        self.merge(peer.clone(), message);
        Ingest::Inserted { peer, auto_read }
    }

    /// Mark one message read. Monotonic: true stays true, and repeat calls
    /// are no-ops. Unknown ids are ignored.
    pub fn mark_read(&mut self, message_id: &str) {
        let Some((peer, key)) = self.index.get(message_id).cloned() else {
            return;
        };
        let Some(conversation) = self.conversations.get_mut(&peer) else {
            return;
        };
        if let Some(message) = conversation.ordered.get_mut(&key) {
            if !message.read {
                message.read = true;
                if message.sender_id == peer {
                    conversation.unread -= 1;
                }
            }
        }
    }

    /// Unread count for one peer.
    #[must_use]
    pub fn unread(&self, peer: &str) -> usize {
        self.conversations
            .get(peer)
            .map(|conversation| conversation.unread)
            .unwrap_or(0)
    }

    /// The peer's messages in non-decreasing timestamp order.
    #[must_use]
    pub fn messages(&self, peer: &str) -> Vec<&ChatMessage> {
        self.conversations
            .get(peer)
            .map(|conversation| conversation.ordered.values().collect())
            .unwrap_or_default()
    }

    /// One summary per peer, most recent activity first.
    #[must_use]
    pub fn summaries(&self) -> Vec<ConversationSummary> {
        let mut summaries: Vec<ConversationSummary> = self
            .conversations
            .iter()
            .map(|(peer, conversation)| ConversationSummary {
                peer_id: peer.clone(),
                last_message: conversation.last_message().cloned(),
                unread: conversation.unread,
            })
            .collect();

        summaries.sort_by_key(|summary| {
            std::cmp::Reverse(
                summary
                    .last_message
                    .as_ref()
                    .map(|message| message.created_at)
                    .unwrap_or(0),
            )
        });
        summaries
    }

    /// Insert or merge one message into a peer's conversation, keeping the
    /// dedup index and unread counter consistent.
    fn merge(&mut self, peer: UserId, message: ChatMessage) {
        let conversation = self.conversations.entry(peer.clone()).or_default();

        if let Some((_, key)) = self.index.get(&message.id) {
            // Known id: a read flag may only be upgraded, never cleared.
            if let Some(existing) = conversation.ordered.get_mut(key) {
                if message.read && !existing.read {
                    existing.read = true;
                    if existing.sender_id == peer {
                        conversation.unread -= 1;
                    }
                }
            }
            return;
        }

        let key = (message.created_at, message.id.clone());
        if message.sender_id == peer && !message.read {
            conversation.unread += 1;
        }
        self.index.insert(message.id.clone(), (peer, key.clone()));
        conversation.ordered.insert(key, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_peer(id: &str, ts: u64) -> ChatMessage {
        ChatMessage::new(id, "bob", "alice", format!("msg {id}"), ts)
    }

    fn from_me(id: &str, ts: u64) -> ChatMessage {
        ChatMessage::new(id, "alice", "bob", format!("msg {id}"), ts)
    }

    #[test]
    fn test_live_then_history_dedup() {
        let mut agg = ConversationAggregator::new("alice");

        assert_eq!(
            agg.ingest_live(&from_peer("m1", 100)),
            Ingest::Inserted {
                peer: "bob".into(),
                auto_read: false
            }
        );
        agg.ingest_history("bob", vec![from_peer("m1", 100), from_peer("m2", 50)]);

        assert_eq!(agg.messages("bob").len(), 2);
        assert_eq!(agg.unread("bob"), 2);
    }

    #[test]
    fn test_live_twice_is_duplicate() {
        let mut agg = ConversationAggregator::new("alice");
        let msg = from_peer("m1", 100);

        assert!(matches!(agg.ingest_live(&msg), Ingest::Inserted { .. }));
        assert_eq!(agg.ingest_live(&msg), Ingest::Duplicate);

        // One rendered message, one unread contribution.
        assert_eq!(agg.messages("bob").len(), 1);
        assert_eq!(agg.unread("bob"), 1);
    }

    #[test]
    fn test_timestamp_order_not_arrival_order() {
        let mut agg = ConversationAggregator::new("alice");
        agg.ingest_live(&from_peer("late", 200));
        agg.ingest_live(&from_peer("early", 100));
        agg.ingest_live(&from_me("mine", 150));

        let ids: Vec<&str> = agg
            .messages("bob")
            .iter()
            .map(|message| message.id.as_str())
            .collect();
        assert_eq!(ids, vec!["early", "mine", "late"]);
    }

    #[test]
    fn test_mark_read_monotonic_and_idempotent() {
        let mut agg = ConversationAggregator::new("alice");
        agg.ingest_live(&from_peer("m1", 100));
        agg.ingest_live(&from_peer("m2", 200));
        assert_eq!(agg.unread("bob"), 2);

        agg.mark_read("m1");
        assert_eq!(agg.unread("bob"), 1);
        agg.mark_read("m1");
        agg.mark_read("m1");
        assert_eq!(agg.unread("bob"), 1);
        agg.mark_read("unknown");
        assert_eq!(agg.unread("bob"), 1);
    }

    #[test]
    fn test_read_history_does_not_unread() {
        let mut agg = ConversationAggregator::new("alice");
        agg.ingest_live(&from_peer("m1", 100));
        agg.mark_read("m1");

        // Store snapshot lags behind: same message still flagged unread.
        agg.ingest_history("bob", vec![from_peer("m1", 100)]);
        assert_eq!(agg.unread("bob"), 0);
    }

    #[test]
    fn test_focused_conversation_auto_reads() {
        let mut agg = ConversationAggregator::new("alice");
        assert!(agg.set_focus(Some("bob".into())).is_empty());

        match agg.ingest_live(&from_peer("m1", 100)) {
            Ingest::Inserted { auto_read, .. } => assert!(auto_read),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(agg.unread("bob"), 0);

        // Own outgoing messages never auto-read.
        match agg.ingest_live(&from_me("m2", 200)) {
            Ingest::Inserted { auto_read, .. } => assert!(!auto_read),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_set_focus_acknowledges_backlog() {
        let mut agg = ConversationAggregator::new("alice");
        agg.ingest_live(&from_peer("m1", 100));
        agg.ingest_live(&from_peer("m2", 200));
        agg.ingest_live(&from_me("m3", 300));

        let mut acked = agg.set_focus(Some("bob".into()));
        acked.sort();
        assert_eq!(acked, vec!["m1".to_string(), "m2".to_string()]);
        assert_eq!(agg.unread("bob"), 0);
    }

    #[test]
    fn test_late_message_before_read_one_keeps_read_state() {
        let mut agg = ConversationAggregator::new("alice");
        agg.ingest_live(&from_peer("m2", 200));
        agg.mark_read("m2");

        // A live message timestamped before an already-read one: read state
        // is per-message, not positional.
        agg.ingest_live(&from_peer("m1", 100));
        assert_eq!(agg.unread("bob"), 1);
        let ids: Vec<&str> = agg
            .messages("bob")
            .iter()
            .map(|message| message.id.as_str())
            .collect();
        assert_eq!(ids, vec!["m1", "m2"]);
        assert!(agg.messages("bob")[1].read);
    }

    #[test]
    fn test_summaries_sorted_by_recency() {
        let mut agg = ConversationAggregator::new("alice");
        agg.ingest_live(&ChatMessage::new("m1", "bob", "alice", "hi", 100));
        agg.ingest_live(&ChatMessage::new("m2", "carol", "alice", "yo", 300));
        agg.ingest_live(&ChatMessage::new("m3", "bob", "alice", "again", 200));

        let summaries = agg.summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].peer_id, "carol");
        assert_eq!(summaries[1].peer_id, "bob");
        assert_eq!(summaries[1].unread, 2);
        assert_eq!(
            summaries[1].last_message.as_ref().map(|m| m.id.as_str()),
            Some("m3")
        );
    }
}
