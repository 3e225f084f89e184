//! # beacon-protocol
//!
//! Wire event model for the Beacon realtime messaging and presence layer.
//!
//! This crate defines the binary protocol spoken between browser clients
//! and the realtime server: the closed [`Frame`] union of event kinds, the
//! chat message and conversation types they carry, a MessagePack codec, and
//! the shared timing contracts (typing TTL, reconnect backoff bounds).
//!
//! ## Event kinds
//!
//! - `Connect` / `Connected` - credential handshake
//! - `MessageNew` - relay of a store-persisted message
//! - `TypingStart` / `TypingStop` - ephemeral typing signals
//! - `PresenceOnline` / `PresenceOffline` - presence transitions
//! - `Notification` - opaque out-of-band alert
//! - `Ping` / `Pong` / `Error` - keepalive and errors
//!
//! ## Example
//!
//! ```rust
//! use beacon_protocol::{codec, ChatMessage, Frame};
//!
//! let frame = Frame::message_new(ChatMessage::new("m1", "alice", "bob", "hi", 1700));
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod message;
pub mod timing;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{codes, Frame, FrameType, PROTOCOL_VERSION};
pub use message::{ChatMessage, ConnectionId, ConversationSummary, MessageId, UserId};
pub use timing::{RECONNECT_BASE, RECONNECT_CAP, TYPING_DEBOUNCE, TYPING_TTL};
