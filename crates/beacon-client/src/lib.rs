//! # beacon-client
//!
//! Client-side view-model layer for the Beacon realtime messaging engine.
//!
//! Everything here runs on the consuming side of the channel:
//!
//! - **ConversationAggregator** - folds history snapshots and live relays
//!   into per-peer summaries with deduplicated unread counts
//! - **TypingView** / **TypingDebounce** - consumer TTL and producer
//!   debounce for typing indicators, driven by a virtual clock
//! - **ReconnectPolicy** - capped exponential backoff after unplanned
//!   disconnects
//! - **MessageStore** - request/response contract of the external store
//!
//! None of these touch a socket directly; the embedding application wires
//! them to its transport and UI.

pub mod conversation;
pub mod reconnect;
pub mod store;
pub mod typing;

pub use conversation::{ConversationAggregator, Ingest};
pub use reconnect::{next_delay, DisconnectReason, ReconnectPolicy};
pub use store::{acknowledge_read, MessageStore, StoreError};
pub use typing::{TypingAction, TypingDebounce, TypingTransition, TypingView};
