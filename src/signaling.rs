//! WebSocket signaling relay for WebRTC call negotiation

mod actor;
mod keepalive;
mod messages;
mod relay;
mod server;
mod types;

pub use actor::RelayHandle;
pub use messages::{ClientEvent, MessageError, ServerEvent};
pub use relay::Relay;
pub use server::{DEFAULT_SIGNALING_PORT, SignalingServer};
pub use types::{
    AdmissionPolicy, ConnectionId, OutboundMessage, RelayStats, RoomKey, SignalingError,
};
