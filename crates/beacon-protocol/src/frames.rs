//! Frame types for the Beacon protocol.
//!
//! Frames are the fundamental unit of communication between clients and the
//! realtime server. Every event kind is a variant of the closed [`Frame`]
//! union so that handlers dispatch exhaustively instead of by string name.
//! Each frame is serialized using MessagePack for efficient binary encoding.

use crate::message::{ChatMessage, UserId};
use serde::{Deserialize, Serialize};

/// Current protocol version, negotiated in the `Connect` frame.
pub const PROTOCOL_VERSION: u8 = 1;

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Connect = 0x01,
    Connected = 0x02,
    MessageNew = 0x03,
    TypingStart = 0x04,
    TypingStop = 0x05,
    PresenceOnline = 0x06,
    PresenceOffline = 0x07,
    Notification = 0x08,
    Ping = 0x09,
    Pong = 0x0A,
    Error = 0x0B,
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x01 => Ok(FrameType::Connect),
            0x02 => Ok(FrameType::Connected),
            0x03 => Ok(FrameType::MessageNew),
            0x04 => Ok(FrameType::TypingStart),
            0x05 => Ok(FrameType::TypingStop),
            0x06 => Ok(FrameType::PresenceOnline),
            0x07 => Ok(FrameType::PresenceOffline),
            0x08 => Ok(FrameType::Notification),
            0x09 => Ok(FrameType::Ping),
            0x0A => Ok(FrameType::Pong),
            0x0B => Ok(FrameType::Error),
            _ => Err("Invalid frame type"),
        }
    }
}

/// Error codes carried by `Frame::Error`.
pub mod codes {
    /// Credential missing, invalid, or expired at handshake.
    pub const AUTH_FAILED: u16 = 1001;
    /// First frame on the channel was not `Connect`.
    pub const HANDSHAKE_EXPECTED: u16 = 1002;
    /// Client and server protocol versions are incompatible.
    pub const VERSION_MISMATCH: u16 = 1003;
    /// Frame was well-formed but not valid in the current state.
    pub const UNEXPECTED_FRAME: u16 = 1004;
    /// Server is at its connection limit.
    pub const SERVER_FULL: u16 = 1005;
}

/// A protocol frame.
///
/// `Connect`, `TypingStart`, `TypingStop` and `Ping` originate at clients;
/// the remaining variants are pushed by the server. `MessageNew` is a relay
/// of an already-persisted message, never a request to persist one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Credential handshake; must be the first frame on a new channel.
    #[serde(rename = "connect")]
    Connect {
        /// Protocol version.
        version: u8,
        /// Bearer credential issued by the auth service.
        token: String,
    },

    /// Handshake accepted.
    #[serde(rename = "connected")]
    Connected {
        /// Unique connection identifier; never reused across reconnects.
        connection_id: String,
        /// Negotiated protocol version.
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// A message the store has confirmed persisted.
    #[serde(rename = "message:new")]
    MessageNew {
        /// The persisted message.
        message: ChatMessage,
    },

    /// Sender started (or refreshed) typing towards a receiver.
    #[serde(rename = "typing:start")]
    TypingStart {
        /// Typing user. Filled in by the server from the authenticated
        /// identity when relayed; clients may leave it empty on send.
        #[serde(default)]
        sender_id: UserId,
        /// Target user.
        receiver_id: UserId,
    },

    /// Sender stopped typing towards a receiver.
    #[serde(rename = "typing:stop")]
    TypingStop {
        /// Typing user; same fill-in rule as `TypingStart`.
        #[serde(default)]
        sender_id: UserId,
        /// Target user.
        receiver_id: UserId,
    },

    /// A user transitioned to online (open-connection count 0 -> 1).
    #[serde(rename = "presence:online")]
    PresenceOnline {
        /// The user that came online.
        user_id: UserId,
    },

    /// A user transitioned to offline (open-connection count 1 -> 0).
    #[serde(rename = "presence:offline")]
    PresenceOffline {
        /// The user that went offline.
        user_id: UserId,
    },

    /// Generic out-of-band alert with an opaque payload.
    #[serde(rename = "notification")]
    Notification {
        /// Display text.
        message: String,
        /// Optional icon hint.
        #[serde(skip_serializing_if = "Option::is_none")]
        icon: Option<String>,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        /// Optional timestamp.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed timestamp from ping.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Error response.
    #[serde(rename = "error")]
    Error {
        /// Error code (see [`codes`]).
        code: u16,
        /// Human-readable error message.
        message: String,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Connect { .. } => FrameType::Connect,
            Frame::Connected { .. } => FrameType::Connected,
            Frame::MessageNew { .. } => FrameType::MessageNew,
            Frame::TypingStart { .. } => FrameType::TypingStart,
            Frame::TypingStop { .. } => FrameType::TypingStop,
            Frame::PresenceOnline { .. } => FrameType::PresenceOnline,
            Frame::PresenceOffline { .. } => FrameType::PresenceOffline,
            Frame::Notification { .. } => FrameType::Notification,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
            Frame::Error { .. } => FrameType::Error,
        }
    }

    /// Create a new Connect frame.
    #[must_use]
    pub fn connect(token: impl Into<String>) -> Self {
        Frame::Connect {
            version: PROTOCOL_VERSION,
            token: token.into(),
        }
    }

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, heartbeat: u32) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            version: PROTOCOL_VERSION,
            heartbeat,
        }
    }

    /// Create a new MessageNew relay frame.
    #[must_use]
    pub fn message_new(message: ChatMessage) -> Self {
        Frame::MessageNew { message }
    }

    /// Create a new TypingStart frame.
    #[must_use]
    pub fn typing_start(sender_id: impl Into<UserId>, receiver_id: impl Into<UserId>) -> Self {
        Frame::TypingStart {
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
        }
    }

    /// Create a new TypingStop frame.
    #[must_use]
    pub fn typing_stop(sender_id: impl Into<UserId>, receiver_id: impl Into<UserId>) -> Self {
        Frame::TypingStop {
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
        }
    }

    /// Create a new PresenceOnline frame.
    #[must_use]
    pub fn online(user_id: impl Into<UserId>) -> Self {
        Frame::PresenceOnline {
            user_id: user_id.into(),
        }
    }

    /// Create a new PresenceOffline frame.
    #[must_use]
    pub fn offline(user_id: impl Into<UserId>) -> Self {
        Frame::PresenceOffline {
            user_id: user_id.into(),
        }
    }

    /// Create a new Notification frame.
    #[must_use]
    pub fn notification(message: impl Into<String>, icon: Option<String>) -> Self {
        Frame::Notification {
            message: message.into(),
            icon,
        }
    }

    /// Create a new Ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            code,
            message: message.into(),
        }
    }
}
