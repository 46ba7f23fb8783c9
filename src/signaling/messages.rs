use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::types::{ConnectionId, OutboundMessage, RoomKey};

/// Frame decoding errors
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("invalid payload for '{event}': {source}")]
    InvalidPayload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

impl MessageError {
    /// Event name of the rejected frame, when it got that far
    pub fn event(&self) -> Option<&str> {
        match self {
            MessageError::Malformed(_) => None,
            MessageError::InvalidPayload { event, .. } => Some(event),
        }
    }
}

/// Events sent from client to relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Join a room by key
    JoinRoom(RoomKey),

    /// Leave a room by key
    LeaveRoom(RoomKey),

    Offer { target: ConnectionId, offer: Value },

    Answer { target: ConnectionId, answer: Value },

    IceCandidate {
        target: ConnectionId,
        candidate: Value,
    },
}

impl ClientEvent {
    pub const JOIN_ROOM: &'static str = "join-room";

    /// Decode a text frame, keeping the event name around if the payload is bad.
    pub fn parse(text: &str) -> Result<Self, MessageError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| MessageError::Malformed(e.to_string()))?;

        let event = value
            .get("event")
            .and_then(Value::as_str)
            .ok_or_else(|| MessageError::Malformed("missing event name".to_string()))?
            .to_string();

        serde_json::from_value(value)
            .map_err(|source| MessageError::InvalidPayload { event, source })
    }
}

/// Events sent from relay to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// The receiving connection's own id
    Identify(ConnectionId),

    /// Join was refused
    RoomError(String),

    /// Another connection joined a room this connection is in
    UserJoined(ConnectionId),

    Offer { offer: Value, caller: ConnectionId },

    Answer {
        answer: Value,
        answerer: ConnectionId,
    },

    IceCandidate {
        candidate: Value,
        from: ConnectionId,
    },
}

impl ServerEvent {
    pub fn to_outbound(&self) -> Result<OutboundMessage, serde_json::Error> {
        serde_json::to_string(self).map(OutboundMessage::from)
    }
}
