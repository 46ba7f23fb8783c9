use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::messages::{ClientEvent, ServerEvent};
use super::types::{
    AdmissionPolicy, ConnectionId, ConnectionState, OutboundMessage, RelayStats, RoomKey,
    SignalingError,
};

/// In-memory connection registry and room membership.
///
/// All mutation goes through `connect`, `handle` and `disconnect`. A
/// connection's room set and each room's member set are kept in sync, so
/// dropping a connection removes it from every room in one step.
#[derive(Debug)]
pub struct Relay {
    admission: AdmissionPolicy,
    connections: HashMap<ConnectionId, ConnectionState>,
    rooms: HashMap<RoomKey, HashSet<ConnectionId>>,
}

impl Relay {
    pub fn new(admission: AdmissionPolicy) -> Self {
        Self {
            admission,
            connections: HashMap::new(),
            rooms: HashMap::new(),
        }
    }

    /// Register a new connection and send it its own id.
    pub fn connect(&mut self, tx: mpsc::UnboundedSender<OutboundMessage>) -> ConnectionId {
        let id = loop {
            let candidate = ConnectionId::generate();
            if !self.connections.contains_key(&candidate) {
                break candidate;
            }
        };

        self.connections.insert(
            id,
            ConnectionState {
                tx,
                rooms: HashSet::new(),
            },
        );
        info!("Connection {} registered", id);

        self.deliver(&id, &ServerEvent::Identify(id));
        id
    }

    /// Apply one client event on behalf of `sender`.
    pub fn handle(
        &mut self,
        sender: ConnectionId,
        event: ClientEvent,
    ) -> Result<(), SignalingError> {
        if !self.connections.contains_key(&sender) {
            return Err(SignalingError::UnknownConnection(sender));
        }

        match event {
            ClientEvent::JoinRoom(key) => {
                let result = self.join(sender, key);
                if let Err(ref e) = result {
                    self.deliver(&sender, &ServerEvent::RoomError(e.to_string()));
                }
                result
            }
            ClientEvent::LeaveRoom(key) => {
                self.leave(sender, &key);
                Ok(())
            }
            ClientEvent::Offer { target, offer } => {
                self.forward(
                    &target,
                    &ServerEvent::Offer {
                        offer,
                        caller: sender,
                    },
                );
                Ok(())
            }
            ClientEvent::Answer { target, answer } => {
                self.forward(
                    &target,
                    &ServerEvent::Answer {
                        answer,
                        answerer: sender,
                    },
                );
                Ok(())
            }
            ClientEvent::IceCandidate { target, candidate } => {
                self.forward(
                    &target,
                    &ServerEvent::IceCandidate {
                        candidate,
                        from: sender,
                    },
                );
                Ok(())
            }
        }
    }

    /// Answer a join that could not be decoded; no membership changes.
    pub fn reject_join(&self, sender: ConnectionId, reason: String) {
        if !self.deliver(&sender, &ServerEvent::RoomError(reason)) {
            debug!("Dropping room-error for unknown connection {}", sender);
        }
    }

    /// Drop a connection from the registry and from every room it occupied.
    pub fn disconnect(&mut self, id: &ConnectionId) -> bool {
        let Some(state) = self.connections.remove(id) else {
            return false;
        };

        for key in state.rooms {
            self.remove_member(&key, id);
        }
        info!("Connection {} disconnected", id);
        true
    }

    pub fn is_connected(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn room_members(&self, key: &RoomKey) -> Option<&HashSet<ConnectionId>> {
        self.rooms.get(key)
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            connections: self.connections.len(),
            rooms: self.rooms.len(),
        }
    }

    fn join(&mut self, id: ConnectionId, key: RoomKey) -> Result<(), SignalingError> {
        if !self.admission.admits(&key) {
            warn!("Connection {} refused room {}", id, key);
            return Err(SignalingError::RoomNotAllowed(key));
        }

        let state = self
            .connections
            .get_mut(&id)
            .ok_or(SignalingError::UnknownConnection(id))?;

        let members = self.rooms.entry(key.clone()).or_insert_with(|| {
            info!("Room {} created", key);
            HashSet::new()
        });
        if !members.insert(id) {
            debug!("Connection {} already in room {}", id, key);
            return Ok(());
        }
        state.rooms.insert(key.clone());

        let joined = ServerEvent::UserJoined(id);
        match joined.to_outbound() {
            Ok(msg) => {
                for member in members.iter().filter(|m| **m != id) {
                    if let Some(peer) = self.connections.get(member) {
                        let _ = peer.tx.send(msg.clone());
                    }
                }
            }
            Err(e) => warn!("Failed to encode user-joined for {}: {}", id, e),
        }

        info!("Connection {} joined room {}", id, key);
        Ok(())
    }

    fn leave(&mut self, id: ConnectionId, key: &RoomKey) {
        if let Some(state) = self.connections.get_mut(&id) {
            state.rooms.remove(key);
        }
        if self.remove_member(key, &id) {
            info!("Connection {} left room {}", id, key);
        }
    }

    /// Returns whether `id` was a member.
    fn remove_member(&mut self, key: &RoomKey, id: &ConnectionId) -> bool {
        let Some(members) = self.rooms.get_mut(key) else {
            return false;
        };
        let removed = members.remove(id);
        if members.is_empty() {
            self.rooms.remove(key);
            info!("Room {} removed (empty)", key);
        }
        removed
    }

    fn forward(&self, target: &ConnectionId, event: &ServerEvent) {
        if !self.deliver(target, event) {
            debug!("Dropping {} for unknown target {}", event_name(event), target);
        }
    }

    /// Send to a single connection; false when the target is not registered.
    fn deliver(&self, target: &ConnectionId, event: &ServerEvent) -> bool {
        let Some(state) = self.connections.get(target) else {
            return false;
        };
        match event.to_outbound() {
            Ok(msg) => {
                let _ = state.tx.send(msg);
            }
            Err(e) => warn!("Failed to encode event for {}: {}", target, e),
        }
        true
    }
}

fn event_name(event: &ServerEvent) -> &'static str {
    match event {
        ServerEvent::Identify(_) => "identify",
        ServerEvent::RoomError(_) => "room-error",
        ServerEvent::UserJoined(_) => "user-joined",
        ServerEvent::Offer { .. } => "offer",
        ServerEvent::Answer { .. } => "answer",
        ServerEvent::IceCandidate { .. } => "ice-candidate",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;

    const ROOM: &str = "consultation";

    fn relay() -> Relay {
        Relay::new(AdmissionPolicy::allow_list([ROOM, "second"]))
    }

    fn connect(relay: &mut Relay) -> (ConnectionId, UnboundedReceiver<OutboundMessage>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = relay.connect(tx);
        assert_eq!(drain(&mut rx), vec![ServerEvent::Identify(id)]);
        (id, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<OutboundMessage>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            events.push(serde_json::from_str(msg.as_str()).unwrap());
        }
        events
    }

    fn join(relay: &mut Relay, id: ConnectionId, key: &str) -> Result<(), SignalingError> {
        relay.handle(id, ClientEvent::JoinRoom(RoomKey::from(key)))
    }

    fn leave(relay: &mut Relay, id: ConnectionId, key: &str) {
        relay
            .handle(id, ClientEvent::LeaveRoom(RoomKey::from(key)))
            .unwrap();
    }

    #[test]
    fn connect_sends_identify_and_registers() {
        let mut relay = relay();
        let (a, _rx) = connect(&mut relay);
        assert!(relay.is_connected(&a));
        assert_eq!(
            relay.stats(),
            RelayStats {
                connections: 1,
                rooms: 0
            }
        );
    }

    #[test]
    fn join_notifies_existing_members_only() {
        let mut relay = relay();
        let (a, mut rx_a) = connect(&mut relay);
        let (b, mut rx_b) = connect(&mut relay);
        let (c, mut rx_c) = connect(&mut relay);

        join(&mut relay, a, ROOM).unwrap();
        assert!(drain(&mut rx_a).is_empty());

        join(&mut relay, b, ROOM).unwrap();
        assert_eq!(drain(&mut rx_a), vec![ServerEvent::UserJoined(b)]);
        assert!(drain(&mut rx_b).is_empty());

        join(&mut relay, c, ROOM).unwrap();
        assert_eq!(drain(&mut rx_a), vec![ServerEvent::UserJoined(c)]);
        assert_eq!(drain(&mut rx_b), vec![ServerEvent::UserJoined(c)]);
        assert!(drain(&mut rx_c).is_empty());

        assert_eq!(relay.room_members(&RoomKey::from(ROOM)).unwrap().len(), 3);
    }

    #[test]
    fn join_is_idempotent() {
        let mut relay = relay();
        let (a, mut rx_a) = connect(&mut relay);
        let (b, mut rx_b) = connect(&mut relay);

        join(&mut relay, a, ROOM).unwrap();
        join(&mut relay, b, ROOM).unwrap();
        join(&mut relay, b, ROOM).unwrap();

        assert_eq!(drain(&mut rx_a), vec![ServerEvent::UserJoined(b)]);
        assert!(drain(&mut rx_b).is_empty());

        let members = relay.room_members(&RoomKey::from(ROOM)).unwrap();
        assert_eq!(members.len(), 2);
        assert!(members.contains(&a) && members.contains(&b));
    }

    #[test]
    fn rejected_join_reports_to_caller_only() {
        let mut relay = relay();
        let (a, mut rx_a) = connect(&mut relay);
        let (b, mut rx_b) = connect(&mut relay);
        join(&mut relay, a, ROOM).unwrap();

        let err = join(&mut relay, b, "lobby").unwrap_err();
        assert!(matches!(err, SignalingError::RoomNotAllowed(_)));

        assert_eq!(
            drain(&mut rx_b),
            vec![ServerEvent::RoomError("room not allowed: lobby".to_string())]
        );
        assert!(drain(&mut rx_a).is_empty());
        assert!(relay.room_members(&RoomKey::from("lobby")).is_none());
        assert_eq!(relay.room_members(&RoomKey::from(ROOM)).unwrap().len(), 1);
        assert_eq!(relay.stats().rooms, 1);
    }

    #[test]
    fn unknown_sender_is_rejected_without_side_effects() {
        let mut relay = relay();
        let (a, mut rx_a) = connect(&mut relay);
        relay.disconnect(&a);

        let err = join(&mut relay, a, ROOM).unwrap_err();
        assert!(matches!(err, SignalingError::UnknownConnection(_)));
        assert!(relay.room_members(&RoomKey::from(ROOM)).is_none());
        assert!(drain(&mut rx_a).is_empty());
    }

    #[test]
    fn undecodable_join_is_answered_in_order() {
        let mut relay = relay();
        let (a, mut rx_a) = connect(&mut relay);
        let (b, mut rx_b) = connect(&mut relay);
        join(&mut relay, b, ROOM).unwrap();

        join(&mut relay, a, "lobby").unwrap_err();
        relay.reject_join(a, "invalid payload for 'join-room'".to_string());

        assert_eq!(
            drain(&mut rx_a),
            vec![
                ServerEvent::RoomError("room not allowed: lobby".to_string()),
                ServerEvent::RoomError("invalid payload for 'join-room'".to_string()),
            ]
        );
        assert!(drain(&mut rx_b).is_empty());
        assert_eq!(relay.room_members(&RoomKey::from(ROOM)).unwrap().len(), 1);

        relay.disconnect(&a);
        relay.reject_join(a, "late".to_string());
        assert!(drain(&mut rx_a).is_empty());
    }

    #[test]
    fn leave_is_silent_and_removes_empty_room() {
        let mut relay = relay();
        let (a, mut rx_a) = connect(&mut relay);
        let (b, mut rx_b) = connect(&mut relay);
        join(&mut relay, a, ROOM).unwrap();
        join(&mut relay, b, ROOM).unwrap();
        drain(&mut rx_a);

        leave(&mut relay, a, ROOM);
        assert!(drain(&mut rx_b).is_empty());
        assert_eq!(relay.room_members(&RoomKey::from(ROOM)).unwrap().len(), 1);

        leave(&mut relay, b, ROOM);
        assert!(relay.room_members(&RoomKey::from(ROOM)).is_none());
        assert_eq!(relay.stats().rooms, 0);
    }

    #[test]
    fn leave_room_not_joined_is_noop() {
        let mut relay = relay();
        let (a, _rx_a) = connect(&mut relay);
        let (b, _rx_b) = connect(&mut relay);
        join(&mut relay, a, ROOM).unwrap();

        leave(&mut relay, b, ROOM);
        leave(&mut relay, b, "nowhere");

        assert_eq!(relay.room_members(&RoomKey::from(ROOM)).unwrap().len(), 1);
    }

    #[test]
    fn rejoin_after_teardown_recreates_fresh_room() {
        let mut relay = relay();
        let (a, _rx_a) = connect(&mut relay);
        let (b, mut rx_b) = connect(&mut relay);
        join(&mut relay, a, ROOM).unwrap();
        join(&mut relay, b, ROOM).unwrap();
        leave(&mut relay, a, ROOM);
        leave(&mut relay, b, ROOM);

        join(&mut relay, b, ROOM).unwrap();
        let members = relay.room_members(&RoomKey::from(ROOM)).unwrap();
        assert_eq!(members.len(), 1);
        assert!(members.contains(&b));
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn disconnect_cleans_every_room() {
        let mut relay = relay();
        let (a, _rx_a) = connect(&mut relay);
        let (b, mut rx_b) = connect(&mut relay);
        join(&mut relay, a, ROOM).unwrap();
        join(&mut relay, a, "second").unwrap();
        join(&mut relay, b, ROOM).unwrap();

        assert!(relay.disconnect(&a));
        assert!(!relay.is_connected(&a));
        assert!(drain(&mut rx_b).is_empty());

        let members = relay.room_members(&RoomKey::from(ROOM)).unwrap();
        assert!(!members.contains(&a));
        assert!(relay.room_members(&RoomKey::from("second")).is_none());
        assert_eq!(
            relay.stats(),
            RelayStats {
                connections: 1,
                rooms: 1
            }
        );

        assert!(!relay.disconnect(&a));
    }

    #[test]
    fn offer_answer_and_candidate_are_point_to_point() {
        let mut relay = relay();
        let (a, mut rx_a) = connect(&mut relay);
        let (b, mut rx_b) = connect(&mut relay);
        let (_c, mut rx_c) = connect(&mut relay);

        relay
            .handle(
                a,
                ClientEvent::Offer {
                    target: b,
                    offer: json!({"type": "offer", "sdp": "a-sdp"}),
                },
            )
            .unwrap();
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerEvent::Offer {
                offer: json!({"type": "offer", "sdp": "a-sdp"}),
                caller: a,
            }]
        );

        relay
            .handle(
                b,
                ClientEvent::Answer {
                    target: a,
                    answer: json!({"type": "answer", "sdp": "b-sdp"}),
                },
            )
            .unwrap();
        assert_eq!(
            drain(&mut rx_a),
            vec![ServerEvent::Answer {
                answer: json!({"type": "answer", "sdp": "b-sdp"}),
                answerer: b,
            }]
        );

        relay
            .handle(
                a,
                ClientEvent::IceCandidate {
                    target: b,
                    candidate: json!({"candidate": "candidate:0 1 UDP 1 10.0.0.1 9 typ host"}),
                },
            )
            .unwrap();
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerEvent::IceCandidate {
                candidate: json!({"candidate": "candidate:0 1 UDP 1 10.0.0.1 9 typ host"}),
                from: a,
            }]
        );

        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_c).is_empty());
    }

    #[test]
    fn forward_to_missing_target_is_dropped() {
        let mut relay = relay();
        let (a, mut rx_a) = connect(&mut relay);
        let (b, mut rx_b) = connect(&mut relay);
        relay.disconnect(&b);

        let ghost = ConnectionId::try_from("conn_ffffffffffffffff").unwrap();
        for target in [b, ghost] {
            let result = relay.handle(
                a,
                ClientEvent::Offer {
                    target,
                    offer: json!({}),
                },
            );
            assert!(result.is_ok());
        }

        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn closed_receiver_does_not_break_delivery_to_others() {
        let mut relay = relay();
        let (a, rx_a) = connect(&mut relay);
        let (b, mut rx_b) = connect(&mut relay);
        let (c, _rx_c) = connect(&mut relay);
        join(&mut relay, a, ROOM).unwrap();
        join(&mut relay, b, ROOM).unwrap();
        drop(rx_a);

        join(&mut relay, c, ROOM).unwrap();
        assert_eq!(drain(&mut rx_b), vec![ServerEvent::UserJoined(c)]);
    }

    #[test]
    fn independent_relays_do_not_share_state() {
        let mut first = relay();
        let mut second = relay();
        let (a, _rx_a) = connect(&mut first);
        join(&mut first, a, ROOM).unwrap();

        assert!(!second.is_connected(&a));
        assert!(second.room_members(&RoomKey::from(ROOM)).is_none());
        let (b, _rx_b) = connect(&mut second);
        join(&mut second, b, ROOM).unwrap();
        assert_eq!(first.room_members(&RoomKey::from(ROOM)).unwrap().len(), 1);
    }
}
