//! Presence tracking: who is online, globally and per room.
//!
//! State is scoped to the connection. A fresh connection starts empty
//! and is rebuilt from room-roster replays on join, never from replay
//! of historical online/offline events; disconnect tears everything
//! down.
//!
//! The local user is never tracked here — the session knows its own
//! connection state.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::model::{PresenceStatus, Role};
use crate::protocol::RosterUser;

/// One remote user's last-known presence.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceEntry {
    pub user_id: Uuid,
    pub name: String,
    pub role: Role,
    pub status: PresenceStatus,
}

/// Connection-scoped presence state.
pub struct PresenceTracker {
    /// Local user, excluded from all tracking.
    local_user: Uuid,
    /// Every remote user currently known online.
    online: HashMap<Uuid, PresenceEntry>,
    /// Room occupancy, built from roster replays alone.
    rooms: HashMap<Uuid, HashSet<Uuid>>,
}

impl PresenceTracker {
    pub fn new(local_user: Uuid) -> Self {
        PresenceTracker {
            local_user,
            online: HashMap::new(),
            rooms: HashMap::new(),
        }
    }

    /// Fold a `user_online` event. Returns `true` if the user was not
    /// already online; re-delivery refreshes the status and is
    /// otherwise a no-op.
    pub fn set_online(&mut self, user_id: Uuid) -> bool {
        if user_id == self.local_user {
            return false;
        }
        match self.online.get_mut(&user_id) {
            Some(entry) => {
                entry.status = PresenceStatus::Online;
                false
            }
            None => {
                // Name and role are unknown until a roster names them.
                self.online.insert(
                    user_id,
                    PresenceEntry {
                        user_id,
                        name: String::new(),
                        role: Role::Member,
                        status: PresenceStatus::Online,
                    },
                );
                true
            }
        }
    }

    /// Fold a `user_offline` event: drop the user from the online set
    /// and every room roster.
    pub fn set_offline(&mut self, user_id: Uuid) -> bool {
        if user_id == self.local_user {
            return false;
        }
        let was_online = self.online.remove(&user_id).is_some();
        for occupants in self.rooms.values_mut() {
            occupants.remove(&user_id);
        }
        was_online
    }

    /// Fold a room-roster replay: replace the room's occupant set and
    /// upsert full entries for everyone named. Occupants reported
    /// offline are ignored.
    pub fn apply_roster(&mut self, room: Uuid, users: Vec<RosterUser>) {
        let mut occupants = HashSet::with_capacity(users.len());
        for user in users {
            if user.user_id == self.local_user || user.status == PresenceStatus::Offline {
                continue;
            }
            occupants.insert(user.user_id);
            self.online.insert(
                user.user_id,
                PresenceEntry {
                    user_id: user.user_id,
                    name: user.name,
                    role: user.role,
                    status: user.status,
                },
            );
        }
        self.rooms.insert(room, occupants);
    }

    /// Whether a user is currently known online.
    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.online.contains_key(&user_id)
    }

    /// Online occupants of one room, sorted by name for stable display.
    pub fn room_online(&self, room: Uuid) -> Vec<&PresenceEntry> {
        let mut entries: Vec<&PresenceEntry> = self
            .rooms
            .get(&room)
            .into_iter()
            .flatten()
            .filter_map(|id| self.online.get(id))
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name).then(a.user_id.cmp(&b.user_id)));
        entries
    }

    /// Total remote users known online.
    pub fn online_count(&self) -> usize {
        self.online.len()
    }

    /// Number of rooms with a tracked roster.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Forget one room's roster (leaving the room).
    pub fn drop_room(&mut self, room: Uuid) {
        self.rooms.remove(&room);
    }

    /// Teardown on disconnect: presence does not survive the
    /// connection.
    pub fn clear(&mut self) {
        self.online.clear();
        self.rooms.clear();
    }
}
