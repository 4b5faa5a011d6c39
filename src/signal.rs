//! Wire protocol spoken over the `/ws` socket.
//!
//! Every frame is a JSON text message shaped `{"event": "<name>", "data": {...}}`
//! with camelCase field names. Signal payloads (SDP offers and answers, ICE
//! candidates) are carried as opaque JSON and never inspected.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Borrow;
use std::fmt;

use crate::config::Limits;
use crate::error::ProtocolError;

/// Events a client may send.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum InboundEvent {
    #[serde(rename_all = "camelCase")]
    Join {
        room_id: String,
        display_name: String,
    },
    /// Forwarded to the whole room, or to a single member when `to` is set.
    Signal {
        payload: Value,
        #[serde(default)]
        to: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ChatMessage {
        message: String,
        display_name: String,
    },
    Leave,
}

impl InboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Signal { .. } => "signal",
            Self::ChatMessage { .. } => "chat-message",
            Self::Leave => "leave",
        }
    }
}

/// Events the relay sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum OutboundEvent {
    #[serde(rename_all = "camelCase")]
    Welcome { connection_id: String },

    /// Sent only to the joiner, listing who was already there.
    #[serde(rename_all = "camelCase")]
    RoomJoined {
        room_id: String,
        connection_id: String,
        peers: Vec<PeerInfo>,
    },

    #[serde(rename_all = "camelCase")]
    PeerJoined {
        display_name: String,
        connection_id: String,
    },

    Signal { from: String, payload: Value },

    #[serde(rename_all = "camelCase")]
    ChatMessage {
        display_name: String,
        message: String,
        timestamp: u64,
    },

    #[serde(rename_all = "camelCase")]
    PeerLeft { connection_id: String },

    Error { code: String, message: String },
}

impl OutboundEvent {
    pub fn error(err: &ProtocolError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub connection_id: String,
    pub display_name: String,
}

pub fn parse_frame(text: &str) -> Result<InboundEvent, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Caller-chosen room name: non-empty, bounded, no whitespace or control chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomId(String);

impl RoomId {
    pub fn parse(raw: &str, limits: &Limits) -> Result<Self, ProtocolError> {
        if raw.is_empty() {
            return Err(ProtocolError::InvalidRoomId("empty".into()));
        }
        if raw.chars().count() > limits.max_room_id_len {
            return Err(ProtocolError::InvalidRoomId(format!(
                "longer than {} characters",
                limits.max_room_id_len
            )));
        }
        if raw.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err(ProtocolError::InvalidRoomId(
                "contains whitespace or control characters".into(),
            ));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for RoomId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Free-text, unauthenticated identity shown to other peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayName(String);

impl DisplayName {
    pub fn parse(raw: &str, limits: &Limits) -> Result<Self, ProtocolError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ProtocolError::InvalidDisplayName("empty".into()));
        }
        if trimmed.chars().count() > limits.max_display_name_len {
            return Err(ProtocolError::InvalidDisplayName(format!(
                "longer than {} characters",
                limits.max_display_name_len
            )));
        }
        if trimmed.chars().any(char::is_control) {
            return Err(ProtocolError::InvalidDisplayName(
                "contains control characters".into(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn validate_chat(message: &str, limits: &Limits) -> Result<(), ProtocolError> {
    if message.trim().is_empty() {
        return Err(ProtocolError::InvalidMessage("empty".into()));
    }
    if message.chars().count() > limits.max_chat_len {
        return Err(ProtocolError::InvalidMessage(format!(
            "longer than {} characters",
            limits.max_chat_len
        )));
    }
    Ok(())
}

/// Milliseconds since the Unix epoch, 0 if the clock is before it.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
