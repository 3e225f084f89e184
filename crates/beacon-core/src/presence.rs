//! Presence tracking for Beacon.
//!
//! Presence is derived state: a user is online iff they own at least one
//! open connection. Only the 0 -> 1 and 1 -> 0 count boundaries produce
//! transition events; a second device joining or one of several leaving
//! emits nothing.
//!
//! All mutations funnel through [`PresenceTracker::register`] and
//! [`PresenceTracker::deregister`]; no other component touches the map.

use beacon_protocol::{ConnectionId, UserId};
use dashmap::DashMap;
use std::collections::HashSet;
use tracing::debug;

/// An online/offline boundary crossing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceTransition {
    /// First connection opened for the user.
    Online(UserId),
    /// Last connection closed for the user.
    Offline(UserId),
}

/// Tracks which users are online and with how many connections.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    /// user id -> set of open connection ids.
    entries: DashMap<UserId, HashSet<ConnectionId>>,
}

impl PresenceTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly opened connection for a user.
    ///
    /// Returns `Some(Online)` only when this is the user's first open
    /// connection. Registering an already-known connection id is a no-op.
    /// The set mutation and the boundary check happen under the entry lock,
    /// so concurrent open/close paths for the same user cannot interleave.
    pub fn register(&self, user_id: &str, connection_id: &str) -> Option<PresenceTransition> {
        let mut entry = self.entries.entry(user_id.to_string()).or_default();
        let was_offline = entry.is_empty();
        let inserted = entry.insert(connection_id.to_string());

        if inserted && was_offline {
            debug!(user = %user_id, "Presence: user online");
            Some(PresenceTransition::Online(user_id.to_string()))
        } else {
            None
        }
    }

    /// Record a closed connection for a user.
    ///
    /// Returns `Some(Offline)` only when this was the user's last open
    /// connection; the empty entry is removed. Deregistering an unknown
    /// connection id is a no-op.
    pub fn deregister(&self, user_id: &str, connection_id: &str) -> Option<PresenceTransition> {
        let mut now_offline = false;

        if let Some(mut entry) = self.entries.get_mut(user_id) {
            if entry.remove(connection_id) && entry.is_empty() {
                now_offline = true;
            }
        }

        if now_offline {
            self.entries
                .remove_if(user_id, |_, connections| connections.is_empty());
            debug!(user = %user_id, "Presence: user offline");
            Some(PresenceTransition::Offline(user_id.to_string()))
        } else {
            None
        }
    }

    /// Whether the user has at least one open connection.
    #[must_use]
    pub fn is_online(&self, user_id: &str) -> bool {
        self.entries
            .get(user_id)
            .map(|connections| !connections.is_empty())
            .unwrap_or(false)
    }

    /// Number of open connections for a user.
    #[must_use]
    pub fn connection_count(&self, user_id: &str) -> usize {
        self.entries
            .get(user_id)
            .map(|connections| connections.len())
            .unwrap_or(0)
    }

    /// Snapshot of all currently-online users.
    #[must_use]
    pub fn online_users(&self) -> Vec<UserId> {
        self.entries
            .iter()
            .filter(|entry| !entry.is_empty())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of online users.
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.entries.iter().filter(|entry| !entry.is_empty()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_online_only_on_first_connection() {
        let tracker = PresenceTracker::new();

        assert_eq!(
            tracker.register("alice", "c1"),
            Some(PresenceTransition::Online("alice".into()))
        );
        // Second device: no event.
        assert_eq!(tracker.register("alice", "c2"), None);
        assert!(tracker.is_online("alice"));
        assert_eq!(tracker.connection_count("alice"), 2);
    }

    #[test]
    fn test_offline_only_on_last_connection() {
        let tracker = PresenceTracker::new();
        tracker.register("alice", "c1");
        tracker.register("alice", "c2");

        // One of several closing: no event.
        assert_eq!(tracker.deregister("alice", "c1"), None);
        assert!(tracker.is_online("alice"));

        assert_eq!(
            tracker.deregister("alice", "c2"),
            Some(PresenceTransition::Offline("alice".into()))
        );
        assert!(!tracker.is_online("alice"));
        assert_eq!(tracker.connection_count("alice"), 0);
    }

    #[test]
    fn test_duplicate_register_deregister_are_noops() {
        let tracker = PresenceTracker::new();

        assert!(tracker.register("alice", "c1").is_some());
        assert_eq!(tracker.register("alice", "c1"), None);
        assert_eq!(tracker.connection_count("alice"), 1);

        assert!(tracker.deregister("alice", "c1").is_some());
        assert_eq!(tracker.deregister("alice", "c1"), None);
        assert_eq!(tracker.deregister("bob", "c9"), None);
    }

    #[test]
    fn test_boundary_invariant_over_sequence() {
        // isOnline(u) iff registers minus deregisters >= 1, and events fire
        // exactly at the 0<->1 boundary.
        let tracker = PresenceTracker::new();
        let mut events = Vec::new();

        for (op, conn) in [
            ("reg", "c1"),
            ("reg", "c2"),
            ("reg", "c3"),
            ("dereg", "c2"),
            ("dereg", "c1"),
            ("dereg", "c3"),
            ("reg", "c4"),
        ] {
            let transition = match op {
                "reg" => tracker.register("alice", conn),
                _ => tracker.deregister("alice", conn),
            };
            if let Some(t) = transition {
                events.push(t);
            }
        }

        assert_eq!(
            events,
            vec![
                PresenceTransition::Online("alice".into()),
                PresenceTransition::Offline("alice".into()),
                PresenceTransition::Online("alice".into()),
            ]
        );
        assert!(tracker.is_online("alice"));
    }

    #[test]
    fn test_online_users_snapshot() {
        let tracker = PresenceTracker::new();
        tracker.register("alice", "c1");
        tracker.register("bob", "c2");
        tracker.register("bob", "c3");
        tracker.deregister("alice", "c1");

        assert_eq!(tracker.online_users(), vec!["bob".to_string()]);
        assert_eq!(tracker.online_count(), 1);
    }
}
