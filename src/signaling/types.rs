use std::collections::HashSet;
use std::fmt;

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Utf8Bytes;

/// Signaling relay errors
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("room not allowed: {0}")]
    RoomNotAllowed(RoomKey),

    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("internal error: {0}")]
    Internal(String),
}

const CONNECTION_ID_PREFIX: &[u8] = b"conn_";
const CONNECTION_ID_LEN: usize = 21;
const HEX_CHARS: &[u8] = b"0123456789abcdef";

/// Connection ID: 21-byte fixed array ("conn_" + 16 hex)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    bytes: [u8; CONNECTION_ID_LEN],
    len: u8,
}

impl ConnectionId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; CONNECTION_ID_LEN];
        let prefix_len = CONNECTION_ID_PREFIX.len();
        bytes[..prefix_len].copy_from_slice(CONNECTION_ID_PREFIX);

        let value: u64 = rand::rng().random();

        for i in 0..16 {
            let nibble = ((value >> (60 - i * 4)) & 0xF) as usize;
            bytes[prefix_len + i] = HEX_CHARS[nibble];
        }
        Self {
            bytes,
            len: CONNECTION_ID_LEN as u8,
        }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ConnectionId {
    type Error = String;

    /// Ids longer than the fixed capacity are rejected, never truncated,
    /// so a forged target can't collide with a live id.
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let src = s.as_bytes();
        if src.len() > CONNECTION_ID_LEN {
            return Err(format!("connection id too long: {} bytes", src.len()));
        }
        let mut bytes = [0u8; CONNECTION_ID_LEN];
        bytes[..src.len()].copy_from_slice(src);
        Ok(Self {
            bytes,
            len: src.len() as u8,
        })
    }
}

impl Serialize for ConnectionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ConnectionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ConnectionId::try_from(s.as_str()).map_err(de::Error::custom)
    }
}

/// Externally supplied room key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomKey(String);

impl RoomKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RoomKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Decides which room keys a connection may join.
#[derive(Debug, Clone)]
pub struct AdmissionPolicy {
    allowed: HashSet<RoomKey>,
}

impl AdmissionPolicy {
    pub fn allow_list<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<RoomKey>,
    {
        Self {
            allowed: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn admits(&self, key: &RoomKey) -> bool {
        self.allowed.contains(key)
    }
}

/// Wrapper for outbound WebSocket messages using tungstenite's Utf8Bytes.
#[derive(Debug, Clone)]
pub struct OutboundMessage(Utf8Bytes);

impl OutboundMessage {
    /// Get the inner Utf8Bytes for tungstenite Message::Text
    pub fn into_inner(self) -> Utf8Bytes {
        self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<String> for OutboundMessage {
    fn from(s: String) -> Self {
        Self(Utf8Bytes::from(s))
    }
}

/// Snapshot of relay occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    pub connections: usize,
    pub rooms: usize,
}

#[derive(Debug)]
pub(crate) struct ConnectionState {
    /// Uses OutboundMessage (Utf8Bytes) for O(1) fan-out cloning.
    pub tx: mpsc::UnboundedSender<OutboundMessage>,
    pub rooms: HashSet<RoomKey>,
}
