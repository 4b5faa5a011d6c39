//! Room membership and message routing.
//!
//! [`RelayState`] owns the connection and room tables. It is driven by a
//! single task (see [`RelayHandle::spawn`]) so every join, leave and
//! broadcast is applied one at a time and the tables need no locking.
//! Writes to peers go through their outboxes and never block the relay.

use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::Limits;
use crate::error::{DeliveryFailure, ProtocolError};
use crate::room::Room;
use crate::signal::{
    now_millis, validate_chat, DisplayName, InboundEvent, OutboundEvent, PeerInfo, RoomId,
};

/// Serialized frames queued for one connection's socket writer.
pub type Outbox = mpsc::UnboundedSender<String>;

/// First 8 characters of a connection id, for logs.
pub fn short(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

struct Connection {
    outbox: Outbox,
    room: Option<RoomId>,
    display_name: Option<DisplayName>,
}

pub struct RelayState {
    connections: HashMap<String, Connection>,
    rooms: HashMap<RoomId, Room>,
    limits: Limits,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new(Limits::default())
    }
}

impl RelayState {
    pub fn new(limits: Limits) -> Self {
        Self {
            connections: HashMap::new(),
            rooms: HashMap::new(),
            limits,
        }
    }

    /// Registers a connection with no room and greets it with its id.
    pub fn connect(&mut self, connection_id: &str, outbox: Outbox) {
        info!("Connection {} opened", short(connection_id));
        self.connections.insert(
            connection_id.to_string(),
            Connection {
                outbox,
                room: None,
                display_name: None,
            },
        );
        self.send_to(
            connection_id,
            &OutboundEvent::Welcome {
                connection_id: connection_id.to_string(),
            },
        );
    }

    /// Adds the connection to `room_id`, creating the room if needed.
    ///
    /// A connection already in a room is rejected; it has to leave first.
    pub fn join(
        &mut self,
        connection_id: &str,
        room_id: &str,
        display_name: &str,
    ) -> Result<(), ProtocolError> {
        let room_id = RoomId::parse(room_id, &self.limits)?;
        let display_name = DisplayName::parse(display_name, &self.limits)?;

        let Some(conn) = self.connections.get_mut(connection_id) else {
            debug!("Join from unknown connection {}", short(connection_id));
            return Ok(());
        };
        if let Some(current) = &conn.room {
            return Err(ProtocolError::AlreadyInRoom {
                room_id: current.to_string(),
            });
        }
        conn.room = Some(room_id.clone());
        conn.display_name = Some(display_name.clone());

        let room = self.rooms.entry(room_id.clone()).or_insert_with(|| {
            info!("Room {} created", room_id);
            Room::new(room_id.clone())
        });
        let connections = &self.connections;
        let peers = room
            .others(connection_id)
            .filter_map(|id| {
                let display_name = connections.get(id)?.display_name.as_ref()?;
                Some(PeerInfo {
                    connection_id: id.clone(),
                    display_name: display_name.to_string(),
                })
            })
            .collect();
        room.insert(connection_id);

        info!(
            "Connection {} joined room {} as {}",
            short(connection_id),
            room_id,
            display_name
        );

        self.send_to(
            connection_id,
            &OutboundEvent::RoomJoined {
                room_id: room_id.to_string(),
                connection_id: connection_id.to_string(),
                peers,
            },
        );
        self.broadcast(
            &room_id,
            connection_id,
            &OutboundEvent::PeerJoined {
                display_name: display_name.to_string(),
                connection_id: connection_id.to_string(),
            },
        );
        Ok(())
    }

    /// Forwards `payload` untouched to the rest of the sender's room, or only
    /// to `to` when given. Returns how many peers it was handed to.
    pub fn relay(
        &mut self,
        connection_id: &str,
        payload: Value,
        to: Option<&str>,
    ) -> Result<usize, ProtocolError> {
        let room_id = self
            .room_of(connection_id)
            .ok_or(ProtocolError::NotInRoom)?
            .clone();
        let event = OutboundEvent::Signal {
            from: connection_id.to_string(),
            payload,
        };

        match to {
            Some(target) => {
                let in_room = self
                    .rooms
                    .get(&room_id)
                    .is_some_and(|room| room.contains(target));
                if !in_room || target == connection_id {
                    return Err(ProtocolError::UnknownPeer(target.to_string()));
                }
                debug!(
                    "Signal {} -> {} in room {}",
                    short(connection_id),
                    short(target),
                    room_id
                );
                Ok(usize::from(self.send_to(target, &event)))
            }
            None => {
                debug!("Signal from {} to room {}", short(connection_id), room_id);
                Ok(self.broadcast(&room_id, connection_id, &event))
            }
        }
    }

    /// Broadcasts a timestamped chat line to the rest of the sender's room.
    pub fn send_chat(
        &mut self,
        connection_id: &str,
        message: &str,
        display_name: &str,
    ) -> Result<usize, ProtocolError> {
        let room_id = self
            .room_of(connection_id)
            .ok_or(ProtocolError::NotInRoom)?
            .clone();
        validate_chat(message, &self.limits)?;
        let display_name = DisplayName::parse(display_name, &self.limits)?;

        let event = OutboundEvent::ChatMessage {
            display_name: display_name.to_string(),
            message: message.to_string(),
            timestamp: now_millis(),
        };
        Ok(self.broadcast(&room_id, connection_id, &event))
    }

    /// Takes the connection out of its room and tells the remaining members.
    /// An emptied room is dropped. Returns false if it was not in a room.
    pub fn leave(&mut self, connection_id: &str) -> bool {
        let Some(conn) = self.connections.get_mut(connection_id) else {
            return false;
        };
        let Some(room_id) = conn.room.take() else {
            return false;
        };
        conn.display_name = None;

        let Some(room) = self.rooms.get_mut(&room_id) else {
            return false;
        };
        room.remove(connection_id);
        info!("Connection {} left room {}", short(connection_id), room_id);

        if room.is_empty() {
            info!("Room {} closed", room.id);
            self.rooms.remove(&room_id);
        } else {
            self.broadcast(
                &room_id,
                connection_id,
                &OutboundEvent::PeerLeft {
                    connection_id: connection_id.to_string(),
                },
            );
        }
        true
    }

    /// Leaves any room and forgets the connection. Safe to call repeatedly.
    pub fn disconnect(&mut self, connection_id: &str) {
        self.leave(connection_id);
        if self.connections.remove(connection_id).is_some() {
            info!("Connection {} closed", short(connection_id));
        }
    }

    /// Applies one inbound event. Protocol errors are logged and reported to
    /// the sender only.
    pub fn dispatch(&mut self, connection_id: &str, event: InboundEvent) {
        let name = event.name();
        let result = match event {
            InboundEvent::Join {
                room_id,
                display_name,
            } => self.join(connection_id, &room_id, &display_name),
            InboundEvent::Signal { payload, to } => self
                .relay(connection_id, payload, to.as_deref())
                .map(|_| ()),
            InboundEvent::ChatMessage {
                message,
                display_name,
            } => self
                .send_chat(connection_id, &message, &display_name)
                .map(|_| ()),
            InboundEvent::Leave => {
                if self.leave(connection_id) {
                    Ok(())
                } else {
                    Err(ProtocolError::NotInRoom)
                }
            }
        };

        if let Err(err) = result {
            self.reject(connection_id, name, &err);
        }
    }

    /// Logs a dropped event and tells its sender why.
    pub fn reject(&self, connection_id: &str, event: &str, err: &ProtocolError) {
        warn!(
            "Dropped {} from {}: {}",
            event,
            short(connection_id),
            err
        );
        self.send_to(connection_id, &OutboundEvent::error(err));
    }

    pub fn room_of(&self, connection_id: &str) -> Option<&RoomId> {
        self.connections.get(connection_id)?.room.as_ref()
    }

    pub fn room_size(&self, room_id: &str) -> Option<usize> {
        self.rooms.get(room_id).map(Room::len)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            rooms: self.room_count(),
            connections: self.connection_count(),
        }
    }

    fn handle(&mut self, command: RelayCommand) {
        match command {
            RelayCommand::Connect {
                connection_id,
                outbox,
            } => self.connect(&connection_id, outbox),
            RelayCommand::Inbound {
                connection_id,
                event,
            } => self.dispatch(&connection_id, event),
            RelayCommand::Reject {
                connection_id,
                event,
                error,
            } => self.reject(&connection_id, event, &error),
            RelayCommand::Disconnect { connection_id } => self.disconnect(&connection_id),
            RelayCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    /// Sends to every member of `room_id` except `except`. A closed outbox is
    /// logged and skipped.
    fn broadcast(&self, room_id: &RoomId, except: &str, event: &OutboundEvent) -> usize {
        let Some(room) = self.rooms.get(room_id) else {
            return 0;
        };
        let frame = match event.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode outbound event: {}", e);
                return 0;
            }
        };

        let mut delivered = 0;
        for id in room.others(except) {
            match self.push(id, frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("{}", e),
            }
        }
        delivered
    }

    fn send_to(&self, connection_id: &str, event: &OutboundEvent) -> bool {
        let frame = match event.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode outbound event: {}", e);
                return false;
            }
        };
        match self.push(connection_id, frame) {
            Ok(()) => true,
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    fn push(&self, connection_id: &str, frame: String) -> Result<(), DeliveryFailure> {
        let failure = || DeliveryFailure {
            connection_id: short(connection_id).to_string(),
        };
        let conn = self.connections.get(connection_id).ok_or_else(failure)?;
        conn.outbox.send(frame).map_err(|_| failure())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub rooms: usize,
    pub connections: usize,
}

/// Work items for the relay task, applied strictly in arrival order.
pub enum RelayCommand {
    Connect {
        connection_id: String,
        outbox: Outbox,
    },
    Inbound {
        connection_id: String,
        event: InboundEvent,
    },
    /// A frame that failed to parse on the connection task.
    Reject {
        connection_id: String,
        event: &'static str,
        error: ProtocolError,
    },
    Disconnect {
        connection_id: String,
    },
    Stats {
        reply: oneshot::Sender<RelayStats>,
    },
}

/// Cheap, cloneable entry point to the relay task.
#[derive(Clone)]
pub struct RelayHandle {
    tx: mpsc::UnboundedSender<RelayCommand>,
}

impl RelayHandle {
    /// Starts the relay task. It runs until every handle is dropped.
    pub fn spawn(limits: Limits) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<RelayCommand>();
        let mut state = RelayState::new(limits);
        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                state.handle(command);
            }
            debug!("Relay task stopped");
        });
        Self { tx }
    }

    pub fn connect(&self, connection_id: &str, outbox: Outbox) {
        self.send(RelayCommand::Connect {
            connection_id: connection_id.to_string(),
            outbox,
        });
    }

    pub fn inbound(&self, connection_id: &str, event: InboundEvent) {
        self.send(RelayCommand::Inbound {
            connection_id: connection_id.to_string(),
            event,
        });
    }

    pub fn reject(&self, connection_id: &str, event: &'static str, error: ProtocolError) {
        self.send(RelayCommand::Reject {
            connection_id: connection_id.to_string(),
            event,
            error,
        });
    }

    pub fn disconnect(&self, connection_id: &str) {
        self.send(RelayCommand::Disconnect {
            connection_id: connection_id.to_string(),
        });
    }

    pub async fn stats(&self) -> Option<RelayStats> {
        let (reply, rx) = oneshot::channel();
        self.send(RelayCommand::Stats { reply });
        rx.await.ok()
    }

    fn send(&self, command: RelayCommand) {
        if self.tx.send(command).is_err() {
            warn!("Relay task is gone, command dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn client(state: &mut RelayState, id: &str) -> UnboundedReceiver<String> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.connect(id, tx);
        let welcome = drain(&mut rx);
        assert_eq!(
            welcome,
            vec![OutboundEvent::Welcome {
                connection_id: id.to_string()
            }]
        );
        rx
    }

    fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<OutboundEvent> {
        let mut events = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            events.push(serde_json::from_str(&frame).unwrap());
        }
        events
    }

    fn rooms_containing(state: &RelayState, id: &str) -> usize {
        state.rooms.values().filter(|room| room.contains(id)).count()
    }

    #[test]
    fn join_notifies_existing_members_only() {
        let mut state = RelayState::default();
        let mut a = client(&mut state, "aaaaaaaa-1");
        let mut b = client(&mut state, "bbbbbbbb-1");

        state.join("aaaaaaaa-1", "room42", "alice").unwrap();
        assert_eq!(
            drain(&mut a),
            vec![OutboundEvent::RoomJoined {
                room_id: "room42".into(),
                connection_id: "aaaaaaaa-1".into(),
                peers: vec![],
            }]
        );

        state.join("bbbbbbbb-1", "room42", "bob").unwrap();
        assert_eq!(
            drain(&mut a),
            vec![OutboundEvent::PeerJoined {
                display_name: "bob".into(),
                connection_id: "bbbbbbbb-1".into(),
            }]
        );
        assert_eq!(
            drain(&mut b),
            vec![OutboundEvent::RoomJoined {
                room_id: "room42".into(),
                connection_id: "bbbbbbbb-1".into(),
                peers: vec![PeerInfo {
                    connection_id: "aaaaaaaa-1".into(),
                    display_name: "alice".into(),
                }],
            }]
        );
        assert_eq!(state.room_size("room42"), Some(2));
    }

    #[test]
    fn join_while_in_room_is_rejected() {
        let mut state = RelayState::default();
        let mut a = client(&mut state, "aaaaaaaa-1");
        let mut b = client(&mut state, "bbbbbbbb-1");
        state.join("aaaaaaaa-1", "one", "alice").unwrap();
        state.join("bbbbbbbb-1", "two", "bob").unwrap();
        drain(&mut a);
        drain(&mut b);

        let err = state.join("aaaaaaaa-1", "two", "alice").unwrap_err();
        assert!(matches!(err, ProtocolError::AlreadyInRoom { ref room_id } if room_id == "one"));
        assert_eq!(state.room_of("aaaaaaaa-1").map(RoomId::as_str), Some("one"));
        assert_eq!(state.room_size("two"), Some(1));
        assert!(drain(&mut b).is_empty());

        let err = state.join("aaaaaaaa-1", "one", "alice").unwrap_err();
        assert_eq!(err.code(), "already-in-room");
        assert_eq!(state.room_size("one"), Some(1));
    }

    #[test]
    fn invalid_join_changes_nothing() {
        let mut state = RelayState::default();
        let _a = client(&mut state, "aaaaaaaa-1");
        assert!(matches!(
            state.join("aaaaaaaa-1", "bad room", "alice"),
            Err(ProtocolError::InvalidRoomId(_))
        ));
        assert!(matches!(
            state.join("aaaaaaaa-1", "room", "  "),
            Err(ProtocolError::InvalidDisplayName(_))
        ));
        assert_eq!(state.room_of("aaaaaaaa-1"), None);
        assert_eq!(state.room_count(), 0);
    }

    #[test]
    fn chat_reaches_others_exactly_once_and_not_sender() {
        let mut state = RelayState::default();
        let mut a = client(&mut state, "aaaaaaaa-1");
        let mut b = client(&mut state, "bbbbbbbb-1");
        state.join("aaaaaaaa-1", "r", "alice").unwrap();
        state.join("bbbbbbbb-1", "r", "bob").unwrap();
        drain(&mut a);
        drain(&mut b);

        assert_eq!(state.send_chat("aaaaaaaa-1", "hi", "alice").unwrap(), 1);
        assert!(drain(&mut a).is_empty());
        let received = drain(&mut b);
        assert_eq!(received.len(), 1);
        match &received[0] {
            OutboundEvent::ChatMessage {
                display_name,
                message,
                timestamp,
            } => {
                assert_eq!(display_name, "alice");
                assert_eq!(message, "hi");
                assert!(*timestamp > 0);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn signal_scenario_room42() {
        let mut state = RelayState::default();
        let mut a = client(&mut state, "aaaaaaaa-1");
        let mut b = client(&mut state, "bbbbbbbb-1");
        state.join("aaaaaaaa-1", "room42", "alice").unwrap();
        state.join("bbbbbbbb-1", "room42", "bob").unwrap();
        drain(&mut a);
        drain(&mut b);

        let offer = json!({"type": "offer", "sdp": "..."});
        state.relay("aaaaaaaa-1", offer.clone(), None).unwrap();
        assert_eq!(
            drain(&mut b),
            vec![OutboundEvent::Signal {
                from: "aaaaaaaa-1".into(),
                payload: offer,
            }]
        );
        assert!(drain(&mut a).is_empty());

        assert!(state.leave("aaaaaaaa-1"));
        assert_eq!(
            drain(&mut b),
            vec![OutboundEvent::PeerLeft {
                connection_id: "aaaaaaaa-1".into()
            }]
        );
        assert_eq!(state.room_size("room42"), Some(1));
    }

    #[test]
    fn targeted_signal_goes_to_one_peer() {
        let mut state = RelayState::default();
        let mut a = client(&mut state, "aaaaaaaa-1");
        let mut b = client(&mut state, "bbbbbbbb-1");
        let mut c = client(&mut state, "cccccccc-1");
        let mut outsider = client(&mut state, "dddddddd-1");
        for (id, name) in [("aaaaaaaa-1", "a"), ("bbbbbbbb-1", "b"), ("cccccccc-1", "c")] {
            state.join(id, "r", name).unwrap();
        }
        state.join("dddddddd-1", "elsewhere", "d").unwrap();
        for rx in [&mut a, &mut b, &mut c, &mut outsider] {
            drain(rx);
        }

        let answer = json!({"type": "answer"});
        assert_eq!(
            state
                .relay("aaaaaaaa-1", answer.clone(), Some("cccccccc-1"))
                .unwrap(),
            1
        );
        assert!(drain(&mut b).is_empty());
        assert_eq!(drain(&mut c).len(), 1);

        assert!(matches!(
            state.relay("aaaaaaaa-1", answer.clone(), Some("dddddddd-1")),
            Err(ProtocolError::UnknownPeer(_))
        ));
        assert!(matches!(
            state.relay("aaaaaaaa-1", answer, Some("aaaaaaaa-1")),
            Err(ProtocolError::UnknownPeer(_))
        ));
        assert!(drain(&mut outsider).is_empty());
    }

    #[test]
    fn relay_outside_room_is_a_reported_no_op() {
        let mut state = RelayState::default();
        let mut a = client(&mut state, "aaaaaaaa-1");
        let mut b = client(&mut state, "bbbbbbbb-1");
        state.join("bbbbbbbb-1", "r", "bob").unwrap();
        drain(&mut b);

        assert!(matches!(
            state.relay("aaaaaaaa-1", json!({}), None),
            Err(ProtocolError::NotInRoom)
        ));
        state.dispatch(
            "aaaaaaaa-1",
            InboundEvent::Signal {
                payload: json!({"type": "offer"}),
                to: None,
            },
        );
        assert!(drain(&mut b).is_empty());
        assert_eq!(
            drain(&mut a),
            vec![OutboundEvent::error(&ProtocolError::NotInRoom)]
        );
    }

    #[test]
    fn last_member_leaving_destroys_room() {
        let mut state = RelayState::default();
        let mut a = client(&mut state, "aaaaaaaa-1");
        let mut b = client(&mut state, "bbbbbbbb-1");
        state.join("aaaaaaaa-1", "r", "alice").unwrap();
        assert!(state.leave("aaaaaaaa-1"));
        assert_eq!(state.room_size("r"), None);
        assert_eq!(state.room_count(), 0);
        drain(&mut a);

        state.join("bbbbbbbb-1", "r", "bob").unwrap();
        assert_eq!(
            drain(&mut b),
            vec![OutboundEvent::RoomJoined {
                room_id: "r".into(),
                connection_id: "bbbbbbbb-1".into(),
                peers: vec![],
            }]
        );
        assert_eq!(state.room_size("r"), Some(1));
    }

    #[test]
    fn disconnect_notifies_each_remaining_member_once() {
        let mut state = RelayState::default();
        let mut a = client(&mut state, "aaaaaaaa-1");
        let mut b = client(&mut state, "bbbbbbbb-1");
        let mut c = client(&mut state, "cccccccc-1");
        for (id, name) in [("aaaaaaaa-1", "a"), ("bbbbbbbb-1", "b"), ("cccccccc-1", "c")] {
            state.join(id, "r", name).unwrap();
        }
        for rx in [&mut a, &mut b, &mut c] {
            drain(rx);
        }

        state.disconnect("aaaaaaaa-1");
        state.disconnect("aaaaaaaa-1");
        let left = OutboundEvent::PeerLeft {
            connection_id: "aaaaaaaa-1".into(),
        };
        assert_eq!(drain(&mut b), vec![left.clone()]);
        assert_eq!(drain(&mut c), vec![left]);
        assert_eq!(state.connection_count(), 2);
        assert_eq!(state.room_size("r"), Some(2));
    }

    #[test]
    fn disconnect_after_leave_and_sole_member_are_silent() {
        let mut state = RelayState::default();
        let mut a = client(&mut state, "aaaaaaaa-1");
        let mut b = client(&mut state, "bbbbbbbb-1");
        state.join("aaaaaaaa-1", "r", "alice").unwrap();
        state.join("bbbbbbbb-1", "r", "bob").unwrap();
        drain(&mut a);
        drain(&mut b);

        assert!(state.leave("aaaaaaaa-1"));
        state.disconnect("aaaaaaaa-1");
        assert_eq!(drain(&mut b).len(), 1);

        state.disconnect("bbbbbbbb-1");
        assert_eq!(state.room_count(), 0);
        assert_eq!(state.connection_count(), 0);
    }

    #[test]
    fn closed_outbox_does_not_stop_broadcast() {
        let mut state = RelayState::default();
        let mut a = client(&mut state, "aaaaaaaa-1");
        let b = client(&mut state, "bbbbbbbb-1");
        let mut c = client(&mut state, "cccccccc-1");
        for (id, name) in [("aaaaaaaa-1", "a"), ("bbbbbbbb-1", "b"), ("cccccccc-1", "c")] {
            state.join(id, "r", name).unwrap();
        }
        drain(&mut a);
        drain(&mut c);
        drop(b);

        assert_eq!(state.send_chat("aaaaaaaa-1", "still here?", "a").unwrap(), 1);
        assert_eq!(drain(&mut c).len(), 1);
    }

    #[test]
    fn per_sender_order_is_preserved() {
        let mut state = RelayState::default();
        let _a = client(&mut state, "aaaaaaaa-1");
        let mut b = client(&mut state, "bbbbbbbb-1");
        state.join("aaaaaaaa-1", "r", "a").unwrap();
        state.join("bbbbbbbb-1", "r", "b").unwrap();
        drain(&mut b);

        for i in 0..20 {
            state.relay("aaaaaaaa-1", json!({ "seq": i }), None).unwrap();
        }
        let seqs: Vec<_> = drain(&mut b)
            .into_iter()
            .map(|event| match event {
                OutboundEvent::Signal { payload, .. } => payload["seq"].as_i64().unwrap(),
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(seqs, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn leave_event_outside_room_reports_error() {
        let mut state = RelayState::default();
        let mut a = client(&mut state, "aaaaaaaa-1");
        state.dispatch("aaaaaaaa-1", InboundEvent::Leave);
        assert_eq!(
            drain(&mut a),
            vec![OutboundEvent::error(&ProtocolError::NotInRoom)]
        );
    }

    #[test]
    fn membership_stays_exclusive_under_random_joins_and_leaves() {
        let ids = ["aaaaaaaa-1", "bbbbbbbb-1", "cccccccc-1", "dddddddd-1"];
        let rooms = ["r1", "r2", "r3"];
        let mut state = RelayState::default();
        let _outboxes: Vec<_> = ids.iter().map(|id| client(&mut state, id)).collect();

        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        for _ in 0..500 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let id = ids[(seed % ids.len() as u64) as usize];
            match (seed >> 8) % 4 {
                0 => {
                    state.leave(id);
                }
                1 => state.disconnect(id),
                _ => {
                    let room = rooms[((seed >> 16) % rooms.len() as u64) as usize];
                    if !state.connections.contains_key(id) {
                        let (tx, _rx) = mpsc::unbounded_channel();
                        state.connect(id, tx);
                    }
                    let _ = state.join(id, room, "x");
                }
            }

            for id in ids {
                let expected = usize::from(state.room_of(id).is_some());
                assert_eq!(rooms_containing(&state, id), expected);
            }
            assert!(state.rooms.values().all(|room| !room.is_empty()));
        }
    }

    #[tokio::test]
    async fn relay_task_applies_commands_in_order() {
        let relay = RelayHandle::spawn(Limits::default());
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        relay.connect("aaaaaaaa-1", tx_a);
        relay.connect("bbbbbbbb-1", tx_b);
        relay.inbound(
            "aaaaaaaa-1",
            InboundEvent::Join {
                room_id: "r".into(),
                display_name: "alice".into(),
            },
        );
        relay.inbound(
            "bbbbbbbb-1",
            InboundEvent::Join {
                room_id: "r".into(),
                display_name: "bob".into(),
            },
        );
        relay.inbound(
            "aaaaaaaa-1",
            InboundEvent::ChatMessage {
                message: "hello".into(),
                display_name: "alice".into(),
            },
        );

        assert_eq!(
            relay.stats().await,
            Some(RelayStats {
                rooms: 1,
                connections: 2
            })
        );
        let b_events = drain(&mut rx_b);
        assert!(matches!(b_events.last(), Some(OutboundEvent::ChatMessage { message, .. }) if message == "hello"));

        relay.disconnect("bbbbbbbb-1");
        assert_eq!(
            relay.stats().await,
            Some(RelayStats {
                rooms: 1,
                connections: 1
            })
        );
        assert!(matches!(
            drain(&mut rx_a).last(),
            Some(OutboundEvent::PeerLeft { connection_id }) if connection_id == "bbbbbbbb-1"
        ));
    }
}
