//! Typing indicators with bounded staleness.
//!
//! Two windows bound how long a stale indicator can survive:
//!
//! - Sender side: after `idle_window` with no further input the
//!   coordinator emits an automatic `typing_stop`, so an indicator
//!   disappears within ~1s of the user stopping even if no explicit
//!   stop is ever sent.
//! - Receiver side: entries older than `stale_window` are treated as
//!   expired even without a stop event, since the stop itself can be
//!   lost with the sender's connection.
//!
//! Empty per-room sets are not retained.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::protocol::ClientEvent;

/// Typing-window configuration.
#[derive(Debug, Clone, Copy)]
pub struct TypingConfig {
    /// Silence window after which the local user's typing auto-stops.
    pub idle_window: Duration,
    /// Age past which a received typing entry is considered stale.
    pub stale_window: Duration,
}

impl Default for TypingConfig {
    fn default() -> Self {
        TypingConfig {
            idle_window: Duration::from_secs(1),
            stale_window: Duration::from_secs(5),
        }
    }
}

impl TypingConfig {
    /// Millisecond-scale windows for tests.
    pub fn for_testing() -> Self {
        TypingConfig {
            idle_window: Duration::from_millis(20),
            stale_window: Duration::from_millis(60),
        }
    }
}

/// A remote user currently typing in one room.
#[derive(Debug, Clone)]
struct TypingUser {
    user_id: Uuid,
    name: String,
    received_at: Instant,
}

/// Events produced by an expiry sweep.
#[derive(Debug, Default)]
pub struct ExpiryOutcome {
    /// Automatic stop events to emit for idle local typing.
    pub stops: Vec<ClientEvent>,
    /// Rooms whose displayed typing set changed.
    pub rooms_changed: Vec<Uuid>,
}

impl ExpiryOutcome {
    pub fn is_empty(&self) -> bool {
        self.stops.is_empty() && self.rooms_changed.is_empty()
    }
}

/// Per-room typing state, local and remote.
pub struct TypingCoordinator {
    config: TypingConfig,
    local_user: Uuid,
    /// Remote users typing, per room. Never contains the local user.
    rooms: HashMap<Uuid, Vec<TypingUser>>,
    /// Rooms where the local user is typing, with last-input time.
    local_typing: HashMap<Uuid, Instant>,
}

impl TypingCoordinator {
    pub fn new(local_user: Uuid, config: TypingConfig) -> Self {
        TypingCoordinator {
            config,
            local_user,
            rooms: HashMap::new(),
            local_typing: HashMap::new(),
        }
    }

    /// Register local keyboard input in a room. Returns a
    /// `typing_start` to emit when this begins a typing run; further
    /// input inside the idle window only re-arms the deadline.
    pub fn on_local_input(&mut self, room: Uuid) -> Option<ClientEvent> {
        let newly_typing = self.local_typing.insert(room, Instant::now()).is_none();
        newly_typing.then_some(ClientEvent::TypingStart { community_id: room })
    }

    /// Explicitly stop typing in a room (message sent, room left).
    /// Returns the `typing_stop` to emit if a run was active.
    pub fn stop_local(&mut self, room: Uuid) -> Option<ClientEvent> {
        self.local_typing
            .remove(&room)
            .map(|_| ClientEvent::TypingStop { community_id: room })
    }

    /// Earliest instant at which an expiry sweep has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let local = self
            .local_typing
            .values()
            .map(|last| *last + self.config.idle_window);
        let remote = self
            .rooms
            .values()
            .flatten()
            .map(|u| u.received_at + self.config.stale_window);
        local.chain(remote).min()
    }

    /// Sweep expired state: idle local runs become automatic stop
    /// events; stale remote entries are dropped.
    pub fn expire(&mut self) -> ExpiryOutcome {
        let now = Instant::now();
        let mut outcome = ExpiryOutcome::default();

        let idle = self.config.idle_window;
        self.local_typing.retain(|room, last| {
            if now.duration_since(*last) >= idle {
                outcome.stops.push(ClientEvent::TypingStop {
                    community_id: *room,
                });
                false
            } else {
                true
            }
        });

        let stale = self.config.stale_window;
        self.rooms.retain(|room, users| {
            let before = users.len();
            users.retain(|u| now.duration_since(u.received_at) < stale);
            if users.len() != before {
                outcome.rooms_changed.push(*room);
            }
            !users.is_empty()
        });

        outcome
    }

    /// Fold a `user_typing` event. Returns `true` if the displayed set
    /// for the room changed.
    pub fn apply_remote(
        &mut self,
        room: Uuid,
        user_id: Uuid,
        name: String,
        is_typing: bool,
    ) -> bool {
        if user_id == self.local_user {
            return false;
        }

        if is_typing {
            let users = self.rooms.entry(room).or_default();
            match users.iter_mut().find(|u| u.user_id == user_id) {
                Some(existing) => {
                    existing.received_at = Instant::now();
                    existing.name = name;
                    false
                }
                None => {
                    users.push(TypingUser {
                        user_id,
                        name,
                        received_at: Instant::now(),
                    });
                    true
                }
            }
        } else {
            let Some(users) = self.rooms.get_mut(&room) else {
                return false;
            };
            let before = users.len();
            users.retain(|u| u.user_id != user_id);
            let changed = users.len() != before;
            if users.is_empty() {
                self.rooms.remove(&room);
            }
            changed
        }
    }

    /// Users currently shown as typing in a room, stale entries
    /// filtered out.
    pub fn typing_users(&self, room: Uuid) -> Vec<(Uuid, &str)> {
        let now = Instant::now();
        self.rooms
            .get(&room)
            .into_iter()
            .flatten()
            .filter(|u| now.duration_since(u.received_at) < self.config.stale_window)
            .map(|u| (u.user_id, u.name.as_str()))
            .collect()
    }

    /// Whether the local user has an active typing run in a room.
    pub fn is_local_typing(&self, room: Uuid) -> bool {
        self.local_typing.contains_key(&room)
    }

    /// Rooms with a retained (possibly stale) typing set.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Forget one room entirely.
    pub fn drop_room(&mut self, room: Uuid) {
        self.rooms.remove(&room);
        self.local_typing.remove(&room);
    }

    /// Teardown on disconnect.
    pub fn clear(&mut self) {
        self.rooms.clear();
        self.local_typing.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn coordinator() -> TypingCoordinator {
        TypingCoordinator::new(Uuid::new_v4(), TypingConfig::for_testing())
    }

    #[test]
    fn test_first_input_emits_start_once() {
        let mut typing = coordinator();
        let room = Uuid::new_v4();

        let first = typing.on_local_input(room);
        assert!(matches!(
            first,
            Some(ClientEvent::TypingStart { community_id }) if community_id == room
        ));

        // Continued input re-arms the deadline without re-emitting.
        assert!(typing.on_local_input(room).is_none());
        assert!(typing.is_local_typing(room));
    }

    #[test]
    fn test_idle_expiry_emits_stop() {
        let mut typing = coordinator();
        let room = Uuid::new_v4();
        typing.on_local_input(room);

        sleep(Duration::from_millis(30));
        let outcome = typing.expire();
        assert_eq!(outcome.stops.len(), 1);
        assert!(matches!(
            outcome.stops[0],
            ClientEvent::TypingStop { community_id } if community_id == room
        ));
        assert!(!typing.is_local_typing(room));
    }

    #[test]
    fn test_input_rearms_idle_deadline() {
        let mut typing = coordinator();
        let room = Uuid::new_v4();
        typing.on_local_input(room);

        sleep(Duration::from_millis(12));
        typing.on_local_input(room);
        sleep(Duration::from_millis(12));

        // 24ms since first input but only 12ms since the refresh.
        let outcome = typing.expire();
        assert!(outcome.stops.is_empty());
        assert!(typing.is_local_typing(room));
    }

    #[test]
    fn test_explicit_stop() {
        let mut typing = coordinator();
        let room = Uuid::new_v4();
        typing.on_local_input(room);

        assert!(typing.stop_local(room).is_some());
        assert!(typing.stop_local(room).is_none());
        assert!(!typing.is_local_typing(room));
    }

    #[test]
    fn test_remote_add_and_remove() {
        let mut typing = coordinator();
        let room = Uuid::new_v4();
        let user = Uuid::new_v4();

        assert!(typing.apply_remote(room, user, "Ana".to_string(), true));
        assert_eq!(typing.typing_users(room).len(), 1);

        // Refresh is not a display change.
        assert!(!typing.apply_remote(room, user, "Ana".to_string(), true));

        assert!(typing.apply_remote(room, user, "Ana".to_string(), false));
        assert!(typing.typing_users(room).is_empty());
        // Empty sets are not retained.
        assert_eq!(typing.room_count(), 0);
    }

    #[test]
    fn test_remote_stop_for_unknown_user_is_noop() {
        let mut typing = coordinator();
        let room = Uuid::new_v4();
        assert!(!typing.apply_remote(room, Uuid::new_v4(), "X".to_string(), false));
    }

    #[test]
    fn test_own_typing_events_ignored() {
        let me = Uuid::new_v4();
        let mut typing = TypingCoordinator::new(me, TypingConfig::for_testing());
        let room = Uuid::new_v4();

        assert!(!typing.apply_remote(room, me, "Me".to_string(), true));
        assert!(typing.typing_users(room).is_empty());
    }

    #[test]
    fn test_stale_remote_entries_filtered_and_swept() {
        let mut typing = coordinator();
        let room = Uuid::new_v4();
        typing.apply_remote(room, Uuid::new_v4(), "Ana".to_string(), true);

        sleep(Duration::from_millis(70));

        // Filtered on read even before the sweep runs.
        assert!(typing.typing_users(room).is_empty());

        let outcome = typing.expire();
        assert_eq!(outcome.rooms_changed, vec![room]);
        assert_eq!(typing.room_count(), 0);
    }

    #[test]
    fn test_next_deadline_tracks_active_state() {
        let mut typing = coordinator();
        assert!(typing.next_deadline().is_none());

        let room = Uuid::new_v4();
        typing.on_local_input(room);
        assert!(typing.next_deadline().is_some());

        typing.stop_local(room);
        assert!(typing.next_deadline().is_none());
    }

    #[test]
    fn test_clear_tears_down() {
        let mut typing = coordinator();
        let room = Uuid::new_v4();
        typing.on_local_input(room);
        typing.apply_remote(room, Uuid::new_v4(), "Ana".to_string(), true);

        typing.clear();
        assert_eq!(typing.room_count(), 0);
        assert!(!typing.is_local_typing(room));
        assert!(typing.next_deadline().is_none());
    }

    #[test]
    fn test_default_windows() {
        let config = TypingConfig::default();
        assert_eq!(config.idle_window, Duration::from_secs(1));
        assert_eq!(config.stale_window, Duration::from_secs(5));
    }
}
