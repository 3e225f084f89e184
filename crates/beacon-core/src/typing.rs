//! Server-side typing indicator channel.
//!
//! Typing state is ephemeral and keyed by the ordered (sender, receiver)
//! pair, so pairs never contend with each other. The server relays raw
//! start/stop signals to the receiver's connections; expiry is a
//! presentation-layer contract applied by consumers (see
//! `beacon_client::typing`). The map here only remembers the last signal
//! time so stale pairs can be pruned and inspected.

use beacon_protocol::{timing::TYPING_TTL, UserId};
use dashmap::DashMap;
use tracing::trace;

/// Ordered (sender, receiver) pair.
pub type TypingKey = (UserId, UserId);

/// Ephemeral per-pair typing state.
#[derive(Debug, Default)]
pub struct TypingChannel {
    /// (sender, receiver) -> last signal, milliseconds since the Unix epoch.
    signals: DashMap<TypingKey, u64>,
}

impl TypingChannel {
    /// Create an empty channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start or refresh the typing window for a pair.
    pub fn signal(&self, sender_id: &str, receiver_id: &str, now_ms: u64) {
        trace!(sender = %sender_id, receiver = %receiver_id, "Typing signal");
        self.signals
            .insert((sender_id.to_string(), receiver_id.to_string()), now_ms);
    }

    /// Clear the typing window early.
    ///
    /// Returns `true` if a window was active. Clearing an absent pair is a
    /// no-op; the TTL already covers the lost-stop case.
    pub fn stop(&self, sender_id: &str, receiver_id: &str) -> bool {
        self.signals
            .remove(&(sender_id.to_string(), receiver_id.to_string()))
            .is_some()
    }

    /// Whether the pair's window is still live at `now_ms`.
    #[must_use]
    pub fn is_active(&self, sender_id: &str, receiver_id: &str, now_ms: u64) -> bool {
        self.signals
            .get(&(sender_id.to_string(), receiver_id.to_string()))
            .map(|last| now_ms.saturating_sub(*last) <= TYPING_TTL.as_millis() as u64)
            .unwrap_or(false)
    }

    /// Drop every pair whose window expired before `now_ms`.
    ///
    /// Returns the number of pairs removed.
    pub fn prune(&self, now_ms: u64) -> usize {
        let ttl_ms = TYPING_TTL.as_millis() as u64;
        let before = self.signals.len();
        self.signals
            .retain(|_, last| now_ms.saturating_sub(*last) <= ttl_ms);
        before - self.signals.len()
    }

    /// Number of live pairs (including possibly-stale ones not yet pruned).
    #[must_use]
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    /// Whether no pair is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL_MS: u64 = 3_000;

    #[test]
    fn test_signal_and_expiry() {
        let channel = TypingChannel::new();
        channel.signal("alice", "bob", 1_000);

        assert!(channel.is_active("alice", "bob", 1_000 + TTL_MS));
        assert!(!channel.is_active("alice", "bob", 1_001 + TTL_MS));
        // Direction matters: bob -> alice was never signalled.
        assert!(!channel.is_active("bob", "alice", 1_500));
    }

    #[test]
    fn test_refresh_extends_window() {
        let channel = TypingChannel::new();
        channel.signal("alice", "bob", 1_000);
        channel.signal("alice", "bob", 3_000);

        assert!(channel.is_active("alice", "bob", 3_000 + TTL_MS));
    }

    #[test]
    fn test_explicit_stop() {
        let channel = TypingChannel::new();
        channel.signal("alice", "bob", 1_000);

        assert!(channel.stop("alice", "bob"));
        assert!(!channel.is_active("alice", "bob", 1_001));
        // Repeat stop is a no-op.
        assert!(!channel.stop("alice", "bob"));
    }

    #[test]
    fn test_prune_drops_only_stale_pairs() {
        let channel = TypingChannel::new();
        channel.signal("alice", "bob", 0);
        channel.signal("carol", "bob", 5_000);

        assert_eq!(channel.prune(6_000), 1);
        assert!(!channel.is_active("alice", "bob", 6_000));
        assert!(channel.is_active("carol", "bob", 6_000));
        assert_eq!(channel.len(), 1);
    }
}
