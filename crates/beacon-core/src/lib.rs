//! # beacon-core
//!
//! Server-side shared state for the Beacon realtime messaging layer.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **ConnectionRegistry** - send side of every live, authenticated connection
//! - **PresenceTracker** - user -> open-connection set, 0<->1 boundary events
//! - **TypingChannel** - ephemeral per-pair typing signal state
//! - **MessageBroadcaster** - fan-out of store-persisted messages
//! - **Authenticator** - handshake seam to the external auth service
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐  register/   ┌─────────────────┐
//! │ Connection │─deregister──▶│ PresenceTracker │
//! │  handler   │              └─────────────────┘
//! └────────────┘                      │ transitions
//!        │ insert/remove              ▼
//!        ▼                    ┌────────────────────┐
//! ┌────────────────────┐◀─────│ MessageBroadcaster │◀── message store
//! │ ConnectionRegistry │      └────────────────────┘    (persist, then relay)
//! └────────────────────┘
//! ```
//!
//! Each connection is served by its own task; no global lock serializes
//! delivery. Presence and typing maps are sharded per key and mutated only
//! through their owning component's entry points.

pub mod auth;
pub mod broadcast;
pub mod presence;
pub mod registry;
pub mod typing;

pub use auth::{AuthError, Authenticator};
pub use broadcast::MessageBroadcaster;
pub use presence::{PresenceTracker, PresenceTransition};
pub use registry::{generate_connection_id, ConnectionHandle, ConnectionRegistry};
pub use typing::TypingChannel;
