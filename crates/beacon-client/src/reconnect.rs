//! Reconnection policy.
//!
//! Pure state machine, no timers: the caller sleeps for whatever delay the
//! policy hands back, retries, and reports the outcome. Retries never
//! terminate on their own; the loop ends only when a connect succeeds or
//! the user navigates away.
//!
//! Every reconnect re-runs the credential handshake and gets a fresh
//! connection id; missed messages are re-fetched from the store, never
//! reconstructed from the channel.

use beacon_protocol::timing::{RECONNECT_BASE, RECONNECT_CAP};
use std::time::Duration;

/// Why the previous connection dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Network failure or silent drop.
    Transport,
    /// The server closed the connection deliberately (redeploy, shed load).
    /// The first retry goes out immediately, bypassing backoff.
    ServerInitiated,
}

/// Backoff delay before retry `attempt` (0-based).
///
/// Doubles from [`RECONNECT_BASE`], capped at [`RECONNECT_CAP`]:
/// 1s, 2s, 4s, 5s, 5s, ...
#[must_use]
pub fn next_delay(attempt: u32) -> Duration {
    // 2^attempt with the shift clamped; the cap dominates long before then.
    let factor = 1u32 << attempt.min(6);
    RECONNECT_BASE.saturating_mul(factor).min(RECONNECT_CAP)
}

/// Tracks consecutive failures across one reconnect episode.
#[derive(Debug, Default)]
pub struct ReconnectPolicy {
    failures: u32,
    immediate_pending: bool,
}

impl ReconnectPolicy {
    /// Create a fresh policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an unplanned disconnect and begin a reconnect episode.
    pub fn on_disconnect(&mut self, reason: DisconnectReason) {
        self.failures = 0;
        self.immediate_pending = reason == DisconnectReason::ServerInitiated;
    }

    /// Delay to wait before the next attempt.
    ///
    /// Call once per attempt; each call advances the schedule. The
    /// server-initiated bypass applies to the first retry of an episode
    /// only, after which the normal schedule takes over.
    pub fn next_attempt_delay(&mut self) -> Duration {
        if self.immediate_pending {
            self.immediate_pending = false;
            return Duration::ZERO;
        }
        let delay = next_delay(self.failures);
        self.failures += 1;
        delay
    }

    /// Record a successful reconnect, resetting the schedule.
    pub fn on_success(&mut self) {
        self.failures = 0;
        self.immediate_pending = false;
    }

    /// Consecutive failed attempts in the current episode.
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }
}
