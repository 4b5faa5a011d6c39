use thiserror::Error;

/// A malformed or out-of-sequence event from a single connection.
///
/// These are dropped and reported back to the sender only; the connection
/// stays open and no other peer sees anything.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid room id: {0}")]
    InvalidRoomId(String),

    #[error("invalid display name: {0}")]
    InvalidDisplayName(String),

    #[error("invalid chat message: {0}")]
    InvalidMessage(String),

    #[error("already in room {room_id}, leave it first")]
    AlreadyInRoom { room_id: String },

    #[error("not in a room")]
    NotInRoom,

    #[error("peer {0} is not in this room")]
    UnknownPeer(String),

    #[error("only text frames are accepted")]
    UnsupportedFrame,
}

impl ProtocolError {
    /// Stable code sent in the outbound `error` event.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::InvalidRoomId(_) => "invalid-room-id",
            Self::InvalidDisplayName(_) => "invalid-display-name",
            Self::InvalidMessage(_) => "invalid-message",
            Self::AlreadyInRoom { .. } => "already-in-room",
            Self::NotInRoom => "not-in-room",
            Self::UnknownPeer(_) => "unknown-peer",
            Self::UnsupportedFrame => "unsupported-frame",
        }
    }
}

/// A single recipient's outbox is gone. Isolated to that recipient.
#[derive(Debug, Error)]
#[error("delivery to {connection_id} failed: outbox closed")]
pub struct DeliveryFailure {
    pub connection_id: String,
}

/// Startup and serving failures of the binary.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}
