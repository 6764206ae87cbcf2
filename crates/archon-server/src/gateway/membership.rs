//! Connection registry and room membership.
//!
//! Two lookup tables live behind one lock:
//!
//! - `connections`: connection id → handle and the rooms it joined
//! - `rooms`: room name → member connection ids
//!
//! Every mutation goes through [`Gateway`] and updates both tables in the
//! same critical section, so a connection is a member of a room iff the room
//! lists it. Rooms exist only while they have members.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use metrics::{counter, gauge};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use archon_core::validation::{Identity, RoomName};

use super::connection::{ClientConnection, ConnectionId, ConnectionState};
use super::protocol::ServerEvent;
use crate::metrics::{
    WS_BROADCAST_DROPS_TOTAL, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};

/// Outbound frames buffered per connection when no capacity is configured.
pub const DEFAULT_SEND_QUEUE_CAPACITY: usize = 256;

struct Member {
    handle: Arc<ClientConnection>,
    rooms: HashSet<RoomName>,
}

#[derive(Default)]
struct Membership {
    connections: HashMap<ConnectionId, Member>,
    rooms: HashMap<RoomName, HashSet<ConnectionId>>,
}

impl Membership {
    /// Queue `frame` for every connection yielded by `targets`.
    fn deliver<'a>(
        &self,
        targets: impl Iterator<Item = &'a ConnectionId>,
        frame: &Arc<String>,
        event: &'static str,
    ) -> usize {
        let mut recipients = 0;
        for id in targets {
            let Some(member) = self.connections.get(id) else {
                continue;
            };
            if member.handle.send(frame.clone()) {
                recipients += 1;
            } else {
                debug!(conn_id = %id, event, "outbound queue full or closed, event dropped");
                counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
            }
        }
        recipients
    }

    fn deliver_all(&self, frame: &Arc<String>, event: &'static str) -> usize {
        self.deliver(self.connections.keys(), frame, event)
    }
}

/// The realtime gateway's shared state.
pub struct Gateway {
    inner: RwLock<Membership>,
    send_queue_capacity: usize,
}

impl Gateway {
    /// Gateway whose connections buffer up to `send_queue_capacity` frames.
    pub fn new(send_queue_capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Membership::default()),
            send_queue_capacity: send_queue_capacity.max(1),
        }
    }

    /// Register an authenticated identity and announce it to everyone,
    /// including the new connection itself.
    ///
    /// Returns the connection handle and the receiving end of its outbound
    /// queue.
    pub fn register(&self, identity: Identity) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(self.send_queue_capacity);
        let handle = Arc::new(ClientConnection::new(ConnectionId::new(), identity, tx));
        let frame = encode(&ServerEvent::presence(handle.identity.clone(), true));

        let mut inner = self.inner.write();
        let _ = handle.advance(ConnectionState::Active);
        let _ = inner.connections.insert(
            handle.id,
            Member {
                handle: handle.clone(),
                rooms: HashSet::new(),
            },
        );
        let recipients = frame.map_or(0, |f| inner.deliver_all(&f, "user:join"));
        let connections = inner.connections.len();
        drop(inner);

        info!(
            conn_id = %handle.id,
            user_id = %handle.identity,
            connections,
            recipients,
            "client connected"
        );
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        counter!(crate::metrics::BROADCAST_EVENTS_TOTAL, "kind" => "presence").increment(1);
        (handle, rx)
    }

    /// Add `id` to `room`. Returns `true` if the membership is new; joining
    /// twice, or joining from an unknown connection, changes nothing.
    pub fn join(&self, id: ConnectionId, room: &RoomName) -> bool {
        let mut inner = self.inner.write();
        let Some(member) = inner.connections.get_mut(&id) else {
            return false;
        };
        if !member.rooms.insert(room.clone()) {
            return false;
        }
        let _ = inner.rooms.entry(room.clone()).or_default().insert(id);
        drop(inner);
        debug!(conn_id = %id, room = %room, "joined room");
        true
    }

    /// Remove `id` from `room`. Returns `true` if it was a member. The room
    /// is deleted when its last member leaves.
    pub fn leave(&self, id: ConnectionId, room: &RoomName) -> bool {
        let mut inner = self.inner.write();
        let Some(member) = inner.connections.get_mut(&id) else {
            return false;
        };
        if !member.rooms.remove(room) {
            return false;
        }
        remove_from_room(&mut inner.rooms, room, id);
        drop(inner);
        debug!(conn_id = %id, room = %room, "left room");
        true
    }

    /// Remove `id` from every room and announce `user:leave` to the
    /// remaining connections, all in one critical section.
    ///
    /// Idempotent: returns `false` if the connection was already gone.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let mut inner = self.inner.write();
        let Some(member) = inner.connections.remove(&id) else {
            return false;
        };
        for room in &member.rooms {
            remove_from_room(&mut inner.rooms, room, id);
        }
        let _ = member.handle.advance(ConnectionState::Disconnected);
        let frame = encode(&ServerEvent::presence(member.handle.identity.clone(), false));
        let recipients = frame.map_or(0, |f| inner.deliver_all(&f, "user:leave"));
        let connections = inner.connections.len();
        drop(inner);

        info!(
            conn_id = %id,
            user_id = %member.handle.identity,
            rooms = member.rooms.len(),
            dropped = member.handle.drop_count(),
            connections,
            recipients,
            "client disconnected"
        );
        counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        counter!(crate::metrics::BROADCAST_EVENTS_TOTAL, "kind" => "presence").increment(1);
        true
    }

    /// Queue `event` for every current member of `room`. Returns the number
    /// of members it was queued for.
    pub fn broadcast_room(&self, room: &RoomName, event: &ServerEvent) -> usize {
        let Some(frame) = encode(event) else {
            return 0;
        };
        let inner = self.inner.read();
        match inner.rooms.get(room) {
            Some(members) => inner.deliver(members.iter(), &frame, event.name()),
            None => 0,
        }
    }

    /// Queue `event` for every connection.
    pub fn broadcast_all(&self, event: &ServerEvent) -> usize {
        let Some(frame) = encode(event) else {
            return 0;
        };
        self.inner.read().deliver_all(&frame, event.name())
    }

    /// Handle of a live connection.
    pub fn connection(&self, id: ConnectionId) -> Option<Arc<ClientConnection>> {
        self.inner.read().connections.get(&id).map(|m| m.handle.clone())
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.inner.read().connections.len()
    }

    /// Number of non-empty rooms.
    pub fn room_count(&self) -> usize {
        self.inner.read().rooms.len()
    }

    /// Members of `room`, sorted.
    pub fn room_members(&self, room: &RoomName) -> Vec<ConnectionId> {
        let inner = self.inner.read();
        let mut members: Vec<_> = inner
            .rooms
            .get(room)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default();
        members.sort_unstable();
        members
    }

    /// Rooms `id` has joined, sorted.
    pub fn rooms_of(&self, id: ConnectionId) -> Vec<RoomName> {
        let inner = self.inner.read();
        let mut rooms: Vec<_> = inner
            .connections
            .get(&id)
            .map(|m| m.rooms.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort_unstable();
        rooms
    }

    /// Identities with at least one live connection, sorted and deduplicated.
    pub fn online_identities(&self) -> Vec<Identity> {
        let inner = self.inner.read();
        inner
            .connections
            .values()
            .map(|m| m.handle.identity.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

impl Default for Gateway {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_QUEUE_CAPACITY)
    }
}

fn remove_from_room(
    rooms: &mut HashMap<RoomName, HashSet<ConnectionId>>,
    room: &RoomName,
    id: ConnectionId,
) {
    if let Some(members) = rooms.get_mut(room) {
        let _ = members.remove(&id);
        if members.is_empty() {
            let _ = rooms.remove(room);
        }
    }
}

fn encode(event: &ServerEvent) -> Option<Arc<String>> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Arc::new(json)),
        Err(e) => {
            warn!(event = event.name(), error = %e, "failed to serialize event");
            None
        }
    }
}
