use std::collections::HashSet;

use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use super::messages::ClientEvent;
use super::relay::Relay;
use super::types::{ConnectionId, OutboundMessage, RelayStats, RoomKey, SignalingError};

/// Commands sent to the relay actor
pub(crate) enum RelayCommand {
    Connect {
        tx: mpsc::UnboundedSender<OutboundMessage>,
        reply: oneshot::Sender<ConnectionId>,
    },
    Event {
        sender: ConnectionId,
        event: ClientEvent,
    },
    RejectJoin {
        sender: ConnectionId,
        reason: String,
    },
    Disconnect {
        id: ConnectionId,
    },
    RoomMembers {
        key: RoomKey,
        reply: oneshot::Sender<Option<HashSet<ConnectionId>>>,
    },
    Stats {
        reply: oneshot::Sender<RelayStats>,
    },
}

/// Owns the relay state; commands are applied one at a time.
pub(crate) async fn relay_actor(mut rx: mpsc::Receiver<RelayCommand>, mut relay: Relay) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            RelayCommand::Connect { tx, reply } => {
                let id = relay.connect(tx);
                if reply.send(id).is_err() {
                    // caller went away before learning its id
                    relay.disconnect(&id);
                }
            }

            RelayCommand::Event { sender, event } => {
                if let Err(e) = relay.handle(sender, event) {
                    warn!("Event from {} failed: {}", sender, e);
                }
            }

            RelayCommand::RejectJoin { sender, reason } => {
                relay.reject_join(sender, reason);
            }

            RelayCommand::Disconnect { id } => {
                relay.disconnect(&id);
            }

            RelayCommand::RoomMembers { key, reply } => {
                let _ = reply.send(relay.room_members(&key).cloned());
            }

            RelayCommand::Stats { reply } => {
                let _ = reply.send(relay.stats());
            }
        }
    }

    info!("Relay actor stopped");
}

/// Handle to communicate with the relay actor
#[derive(Clone)]
pub struct RelayHandle {
    pub(crate) tx: mpsc::Sender<RelayCommand>,
}

impl RelayHandle {
    /// Register a connection; the relay sends `identify` on `tx` before replying.
    pub async fn connect(
        &self,
        tx: mpsc::UnboundedSender<OutboundMessage>,
    ) -> Result<ConnectionId, SignalingError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(RelayCommand::Connect {
            tx,
            reply: reply_tx,
        })
        .await?;
        reply_rx
            .await
            .map_err(|_| SignalingError::Internal("actor channel closed".to_string()))
    }

    /// Fire-and-forget delivery of a client event
    pub async fn dispatch(&self, sender: ConnectionId, event: ClientEvent) {
        let _ = self.tx.send(RelayCommand::Event { sender, event }).await;
    }

    /// Queue a `room-error` behind the sender's earlier events
    pub async fn reject_join(&self, sender: ConnectionId, reason: String) {
        let _ = self.tx.send(RelayCommand::RejectJoin { sender, reason }).await;
    }

    pub async fn disconnect(&self, id: ConnectionId) {
        let _ = self.tx.send(RelayCommand::Disconnect { id }).await;
    }

    /// Current members of a room, `None` if the room does not exist
    pub async fn room_members(
        &self,
        key: RoomKey,
    ) -> Result<Option<HashSet<ConnectionId>>, SignalingError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(RelayCommand::RoomMembers {
            key,
            reply: reply_tx,
        })
        .await?;
        reply_rx
            .await
            .map_err(|_| SignalingError::Internal("actor channel closed".to_string()))
    }

    pub async fn stats(&self) -> Result<RelayStats, SignalingError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(RelayCommand::Stats { reply: reply_tx }).await?;
        reply_rx
            .await
            .map_err(|_| SignalingError::Internal("actor channel closed".to_string()))
    }

    async fn send(&self, cmd: RelayCommand) -> Result<(), SignalingError> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| SignalingError::Internal("actor channel closed".to_string()))
    }
}
