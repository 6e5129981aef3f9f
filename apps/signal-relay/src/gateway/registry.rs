//! Room membership of the connections held by this process.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use dashmap::DashMap;
use relay_common::{ConnectionId, RoomId, UserId};

use super::session::{ConnectionHandle, CLOSE_KICKED, CLOSE_TRY_AGAIN_LATER};
use crate::error::RelayError;

/// Shared registry of local room membership.
///
/// `rooms` maps a room to the handles of its local connections; `connections`
/// is the reverse map. Both are changed while the room's `DashMap` entry is
/// held, always locking `rooms` before `connections`.
pub struct MembershipRegistry {
    rooms: DashMap<RoomId, HashMap<ConnectionId, Arc<ConnectionHandle>>>,
    connections: DashMap<ConnectionId, (RoomId, UserId)>,
}

impl MembershipRegistry {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            connections: DashMap::new(),
        }
    }

    /// Add a connection to its room. Callers register a connection once.
    pub fn register(&self, handle: Arc<ConnectionHandle>) {
        let mut room = self.rooms.entry(handle.room_id).or_default();
        self.connections
            .insert(handle.id.clone(), (handle.room_id, handle.user_id));
        room.insert(handle.id.clone(), handle);
    }

    /// Remove a connection from all tables. Returns `None` if it was already
    /// removed.
    pub fn unregister(&self, connection_id: &str) -> Option<(RoomId, UserId)> {
        let room_id = self.connections.get(connection_id).map(|entry| entry.0)?;

        let mut room = self.rooms.get_mut(&room_id)?;
        room.remove(connection_id)?;
        let removed = self
            .connections
            .remove(connection_id)
            .map(|(_, membership)| membership);
        let now_empty = room.is_empty();
        drop(room);

        if now_empty {
            self.rooms.remove_if(&room_id, |_, members| members.is_empty());
        }
        removed
    }

    /// Queue `payload` for every local connection in the room except
    /// `exclude`. Returns the number of connections it was queued for.
    ///
    /// A peer that cannot accept the payload is skipped. A peer whose queue
    /// is full is also asked to disconnect.
    pub fn broadcast(&self, room_id: RoomId, payload: &Utf8Bytes, exclude: Option<&str>) -> usize {
        let Some(room) = self.rooms.get(&room_id) else {
            return 0;
        };

        let mut delivered = 0;
        for (id, handle) in room.iter() {
            if exclude == Some(id.as_str()) {
                continue;
            }
            match handle.deliver(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    tracing::warn!(%err, room_id, user_id = handle.user_id, "skipping peer");
                    if let RelayError::PeerDelivery { overflow: true, .. } = err {
                        handle.request_disconnect(CLOSE_TRY_AGAIN_LATER, "Outbound queue overflow");
                    }
                }
            }
        }
        delivered
    }

    pub fn local_count(&self, room_id: RoomId) -> usize {
        self.rooms.get(&room_id).map(|room| room.len()).unwrap_or(0)
    }

    /// Distinct users with a local connection in the room.
    pub fn active_users(&self, room_id: RoomId) -> BTreeSet<UserId> {
        self.rooms
            .get(&room_id)
            .map(|room| room.values().map(|handle| handle.user_id).collect())
            .unwrap_or_default()
    }

    /// Force-close the user's connection in the room. The gateway task then
    /// runs its normal teardown. Returns whether a local connection was found.
    pub fn kick(&self, room_id: RoomId, user_id: UserId, reason: &str) -> bool {
        let Some(room) = self.rooms.get(&room_id) else {
            return false;
        };

        let mut found = false;
        for handle in room.values().filter(|handle| handle.user_id == user_id) {
            tracing::info!(room_id, user_id, connection_id = %handle.id, "kicking user");
            handle.request_disconnect(CLOSE_KICKED, reason);
            found = true;
        }
        found
    }

    /// Ask every local connection to close (used at shutdown).
    pub fn disconnect_all(&self, code: u16, reason: &str) {
        for room in self.rooms.iter() {
            for handle in room.values() {
                handle.request_disconnect(code, reason);
            }
        }
    }

    /// Rooms with at least one local connection.
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.iter().map(|room| *room.key()).collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for MembershipRegistry {
    fn default() -> Self {
        Self::new()
    }
}
