//! Timing contracts shared by producers and consumers.
//!
//! Typing expiry is a presentation-layer contract: the server relays raw
//! start/stop signals and every consumer must apply the same TTL locally.
//! The reconnect schedule is likewise fixed so all clients back off alike.

use std::time::Duration;

/// A typing signal not refreshed or stopped within this window is treated
/// as stopped on the consuming side.
pub const TYPING_TTL: Duration = Duration::from_secs(3);

/// A producer re-emits `typing:stop` this long after the last keystroke.
pub const TYPING_DEBOUNCE: Duration = Duration::from_secs(1);

/// First reconnect delay after an unplanned disconnect.
pub const RECONNECT_BASE: Duration = Duration::from_secs(1);

/// Ceiling for the doubling reconnect delay.
pub const RECONNECT_CAP: Duration = Duration::from_secs(5);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debounce_inside_ttl() {
        // The producer's stop must land before the consumer's expiry fires.
        assert!(TYPING_DEBOUNCE < TYPING_TTL);
    }
}
