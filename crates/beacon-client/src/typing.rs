//! Client-side typing indicator timers.
//!
//! The server relays raw typing signals; expiry is a contract every
//! consumer applies identically. Both state machines here take the current
//! time as an argument instead of reading a clock, so tests drive them with
//! a virtual clock and no wall-clock waits.
//!
//! - [`TypingView`] is the consumer side: it turns observed start/stop
//!   signals into at-most-one `Started`/`Stopped` transition each, applying
//!   the 3-second TTL when the producer's stop never arrives.
//! - [`TypingDebounce`] is the producer side: it decides when keystrokes
//!   become start signals and emits the trailing stop 1 second after the
//!   last keystroke.

use beacon_protocol::timing::{TYPING_DEBOUNCE, TYPING_TTL};
use beacon_protocol::UserId;
use std::collections::HashMap;

/// A change in a sender's observed typing state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypingTransition {
    /// The sender began typing.
    Started(UserId),
    /// The sender stopped typing (explicit stop or TTL expiry).
    Stopped(UserId),
}

/// Consumer-side typing state, scoped to one receiving user.
#[derive(Debug, Default)]
pub struct TypingView {
    /// sender -> last observed start, milliseconds on the caller's clock.
    active: HashMap<UserId, u64>,
}

impl TypingView {
    /// Create an empty view.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe a `typing:start` signal.
    ///
    /// Returns `Started` on the idle -> typing edge only; a refresh of an
    /// already-typing sender extends the TTL window silently.
    pub fn observe_start(&mut self, sender: &str, now_ms: u64) -> Option<TypingTransition> {
        let was_idle = self.active.insert(sender.to_string(), now_ms).is_none();
        was_idle.then(|| TypingTransition::Started(sender.to_string()))
    }

    /// Observe a `typing:stop` signal.
    ///
    /// Clearing the entry cancels the pending TTL expiry, so a later
    /// [`poll`](Self::poll) cannot double-fire `Stopped`.
    pub fn observe_stop(&mut self, sender: &str) -> Option<TypingTransition> {
        self.active
            .remove(sender)
            .map(|_| TypingTransition::Stopped(sender.to_string()))
    }

    /// Expire senders whose window passed, emitting one `Stopped` each.
    pub fn poll(&mut self, now_ms: u64) -> Vec<TypingTransition> {
        let ttl_ms = TYPING_TTL.as_millis() as u64;
        let expired: Vec<UserId> = self
            .active
            .iter()
            .filter(|(_, last)| now_ms.saturating_sub(**last) > ttl_ms)
            .map(|(sender, _)| sender.clone())
            .collect();

        expired
            .into_iter()
            .map(|sender| {
                self.active.remove(&sender);
                TypingTransition::Stopped(sender)
            })
            .collect()
    }

    /// Whether the sender is observed as typing at `now_ms`.
    #[must_use]
    pub fn is_typing(&self, sender: &str, now_ms: u64) -> bool {
        self.active
            .get(sender)
            .map(|last| now_ms.saturating_sub(*last) <= TYPING_TTL.as_millis() as u64)
            .unwrap_or(false)
    }
}

/// What the producer should put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingAction {
    /// Emit `typing:start`.
    Start,
    /// Emit `typing:stop`.
    Stop,
}

/// Producer-side keystroke debounce, one per conversation peer.
#[derive(Debug, Default)]
pub struct TypingDebounce {
    /// Last keystroke, milliseconds on the caller's clock.
    last_keystroke: Option<u64>,
    /// Last emitted start, for refresh pacing.
    last_start: Option<u64>,
}

impl TypingDebounce {
    /// Create an idle debounce.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a keystroke.
    ///
    /// Returns `Start` on the first keystroke of a burst and again as a
    /// refresh once per debounce interval, keeping the consumer's TTL
    /// window alive while the user keeps typing.
    pub fn keystroke(&mut self, now_ms: u64) -> Option<TypingAction> {
        let idle = self.last_keystroke.is_none();
        self.last_keystroke = Some(now_ms);

        let refresh_due = self
            .last_start
            .map(|at| now_ms.saturating_sub(at) >= TYPING_DEBOUNCE.as_millis() as u64)
            .unwrap_or(true);

        if idle || refresh_due {
            self.last_start = Some(now_ms);
            Some(TypingAction::Start)
        } else {
            None
        }
    }

    /// Emit the trailing stop once the debounce interval has passed since
    /// the last keystroke. Fires at most once per burst.
    pub fn poll(&mut self, now_ms: u64) -> Option<TypingAction> {
        let last = self.last_keystroke?;
        if now_ms.saturating_sub(last) >= TYPING_DEBOUNCE.as_millis() as u64 {
            self.last_keystroke = None;
            self.last_start = None;
            Some(TypingAction::Stop)
        } else {
            None
        }
    }

    /// Abandon the burst without emitting anything, e.g. when the message
    /// was sent (the send itself implies typing ended).
    pub fn cancel(&mut self) {
        self.last_keystroke = None;
        self.last_start = None;
    }
}
