//! Connection registry and room table for the relay server.
//!
//! Tracks every live connection, the outbox its writer task drains, and the
//! single room it has joined. Rooms are created implicitly on first join.
//!
//! The registry is plain in-memory state with no interior locking; the relay
//! wraps it in one lock so that each inbound event is applied atomically.

use std::collections::{HashMap, HashSet};

use huddle_proto::id::{ConnectionId, RoomId};
use huddle_proto::signal::ServerEvent;
use tokio::sync::mpsc;

use crate::router::Scope;

/// Item queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// A signaling event to encode and send as a text frame.
    Event(ServerEvent),
    /// Send a close frame and stop writing.
    Close,
}

/// Sender half of a connection's outbound queue.
pub type Outbox = mpsc::UnboundedSender<Outbound>;

/// Errors that can occur during registry operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The connection was never registered or has already been removed.
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),
}

/// How a [`Registry::join`] changed membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The connection had no room and is now a member.
    Joined,
    /// The connection was already a member of this room.
    AlreadyMember,
    /// The connection left `from` to join the new room.
    Moved {
        /// Room the connection was pruned from.
        from: RoomId,
    },
}

/// A connection record deleted by [`Registry::remove`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removed {
    /// Identifier of the removed connection.
    pub id: ConnectionId,
    /// Room the connection belonged to at removal time.
    pub room: Option<RoomId>,
}

#[derive(Debug)]
struct ConnectionEntry {
    outbox: Outbox,
    room: Option<RoomId>,
}

/// In-memory set of live connections and their room membership.
///
/// Invariant: a connection id is in a room's member set if and only if that
/// connection's room is that room.
#[derive(Debug)]
pub struct Registry {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
    prune_empty_rooms: bool,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Creates an empty registry that deletes rooms once their last member leaves.
    #[must_use]
    pub fn new() -> Self {
        Self::with_pruning(true)
    }

    /// Creates an empty registry, choosing whether empty rooms are deleted.
    ///
    /// With pruning disabled the room table keeps an entry for every room
    /// ever joined.
    #[must_use]
    pub fn with_pruning(prune_empty_rooms: bool) -> Self {
        Self {
            connections: HashMap::new(),
            rooms: HashMap::new(),
            prune_empty_rooms,
        }
    }

    /// Allocates a fresh connection id and records the connection with no room.
    pub fn register(&mut self, outbox: Outbox) -> ConnectionId {
        let mut id = ConnectionId::generate();
        while self.connections.contains_key(&id) {
            id = ConnectionId::generate();
        }
        self.connections
            .insert(id.clone(), ConnectionEntry { outbox, room: None });
        id
    }

    /// Puts `conn` into `room`, leaving its previous room first if it had one.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownConnection`] if `conn` is not registered.
    pub fn join(&mut self, conn: &ConnectionId, room: RoomId) -> Result<JoinOutcome, RegistryError> {
        let entry = self
            .connections
            .get_mut(conn)
            .ok_or_else(|| RegistryError::UnknownConnection(conn.clone()))?;

        if entry.room.as_ref() == Some(&room) {
            return Ok(JoinOutcome::AlreadyMember);
        }

        let previous = entry.room.replace(room.clone());
        self.rooms.entry(room).or_default().insert(conn.clone());

        Ok(match previous {
            Some(from) => {
                self.detach(conn, &from);
                JoinOutcome::Moved { from }
            }
            None => JoinOutcome::Joined,
        })
    }

    /// Returns a snapshot of the members of `room` (empty if it does not exist).
    #[must_use]
    pub fn members_of(&self, room: &RoomId) -> HashSet<ConnectionId> {
        self.rooms.get(room).cloned().unwrap_or_default()
    }

    /// Returns the room `conn` has joined, if any.
    #[must_use]
    pub fn room_of(&self, conn: &ConnectionId) -> Option<&RoomId> {
        self.connections.get(conn).and_then(|e| e.room.as_ref())
    }

    /// Returns `true` if `conn` is currently registered.
    #[must_use]
    pub fn contains(&self, conn: &ConnectionId) -> bool {
        self.connections.contains_key(conn)
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of entries in the room table, including empty rooms when
    /// pruning is disabled.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Ids of all live connections, in no particular order.
    #[cfg(test)]
    fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().cloned().collect()
    }

    /// Deletes `conn` and its room membership.
    ///
    /// Returns `None` if the connection was already gone, so repeated calls
    /// are harmless.
    pub fn remove(&mut self, conn: &ConnectionId) -> Option<Removed> {
        let entry = self.connections.remove(conn)?;
        if let Some(room) = &entry.room {
            self.detach(conn, room);
        }
        Some(Removed {
            id: conn.clone(),
            room: entry.room,
        })
    }

    /// Collects the outboxes of every connection covered by `scope`.
    #[must_use]
    pub fn resolve(&self, scope: &Scope) -> Vec<(ConnectionId, Outbox)> {
        match scope {
            Scope::Peer(id) => self
                .connections
                .get(id)
                .map(|e| vec![(id.clone(), e.outbox.clone())])
                .unwrap_or_default(),
            Scope::Room { room, except } => self
                .rooms
                .get(room)
                .into_iter()
                .flatten()
                .filter(|id| except.as_ref() != Some(*id))
                .filter_map(|id| {
                    self.connections
                        .get(id)
                        .map(|e| (id.clone(), e.outbox.clone()))
                })
                .collect(),
            Scope::Everyone { except } => self
                .connections
                .iter()
                .filter(|(id, _)| *id != except)
                .map(|(id, e)| (id.clone(), e.outbox.clone()))
                .collect(),
        }
    }

    /// Clones every live outbox, e.g. to close all connections on shutdown.
    #[must_use]
    pub fn outboxes(&self) -> Vec<Outbox> {
        self.connections.values().map(|e| e.outbox.clone()).collect()
    }

    fn detach(&mut self, conn: &ConnectionId, room: &RoomId) {
        let now_empty = self.rooms.get_mut(room).is_some_and(|members| {
            members.remove(conn);
            members.is_empty()
        });
        if now_empty && self.prune_empty_rooms {
            self.rooms.remove(room);
        }
    }
}
