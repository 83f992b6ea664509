//! The user's room list: membership, unread counts, and last-message
//! previews, kept in sync with message traffic and directory events.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{Membership, Message, Room};
use crate::protocol::CommunityPatch;

/// One room paired with the local user's membership in it, as the
/// directory endpoint returns them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomEntry {
    #[serde(rename = "community")]
    pub room: Room,
    pub membership: Membership,
}

/// In-memory room list. Message traffic keeps previews and unread
/// counts current; directory events add, patch, and remove entries.
pub struct RoomDirectory {
    local_user: Uuid,
    entries: HashMap<Uuid, RoomEntry>,
}

impl RoomDirectory {
    pub fn new(local_user: Uuid) -> Self {
        RoomDirectory {
            local_user,
            entries: HashMap::new(),
        }
    }

    /// Replace the whole directory with a freshly fetched list.
    pub fn replace_all(&mut self, entries: Vec<RoomEntry>) {
        self.entries = entries
            .into_iter()
            .map(|e| (e.room.id, e))
            .collect();
    }

    pub fn insert(&mut self, entry: RoomEntry) {
        self.entries.insert(entry.room.id, entry);
    }

    pub fn remove(&mut self, room: Uuid) -> Option<RoomEntry> {
        self.entries.remove(&room)
    }

    pub fn get(&self, room: Uuid) -> Option<&RoomEntry> {
        self.entries.get(&room)
    }

    pub fn contains(&self, room: Uuid) -> bool {
        self.entries.contains_key(&room)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fold one message into the room's summary: refresh the preview
    /// and, unless the room is being watched or the message is the
    /// user's own, bump the unread count.
    pub fn note_message(&mut self, msg: &Message, is_watching: bool) -> bool {
        let Some(entry) = self.entries.get_mut(&msg.community_id) else {
            return false;
        };
        entry.room.last_message_preview = Some(msg.preview_text());
        entry.room.last_message_at = Some(msg.created_at);
        if !is_watching && msg.sender.id != self.local_user {
            entry.membership.unread_count += 1;
        }
        true
    }

    /// Clear a room's unread count, stamping when the user last saw
    /// it. Returns the prior count so a failed mark-read can restore
    /// it.
    pub fn mark_seen(&mut self, room: Uuid, at: DateTime<Utc>) -> Option<u32> {
        let entry = self.entries.get_mut(&room)?;
        let prior = entry.membership.unread_count;
        entry.membership.unread_count = 0;
        entry.membership.last_seen_at = Some(at);
        Some(prior)
    }

    /// Restore an unread count (mark-read rollback).
    pub fn set_unread(&mut self, room: Uuid, count: u32) {
        if let Some(entry) = self.entries.get_mut(&room) {
            entry.membership.unread_count = count;
        }
    }

    pub fn unread(&self, room: Uuid) -> u32 {
        self.entries
            .get(&room)
            .map_or(0, |e| e.membership.unread_count)
    }

    /// Unread total across every room, for the app badge.
    pub fn total_unread(&self) -> u64 {
        self.entries
            .values()
            .map(|e| u64::from(e.membership.unread_count))
            .sum()
    }

    /// Apply a partial room update. Returns false for unknown rooms.
    pub fn apply_update(&mut self, room: Uuid, patch: &CommunityPatch) -> bool {
        let Some(entry) = self.entries.get_mut(&room) else {
            return false;
        };
        if let Some(name) = &patch.name {
            entry.room.name = name.clone();
        }
        if let Some(description) = &patch.description {
            entry.room.description = description.clone();
        }
        if let Some(category) = patch.category {
            entry.room.category = category;
        }
        if let Some(member_count) = patch.member_count {
            entry.room.member_count = member_count;
        }
        true
    }

    /// Entries ordered by most recent activity, newest first; rooms
    /// with no messages yet sort last, alphabetically.
    pub fn rooms(&self) -> Vec<&RoomEntry> {
        let mut list: Vec<&RoomEntry> = self.entries.values().collect();
        list.sort_by(|a, b| {
            b.room
                .last_message_at
                .cmp(&a.room.last_message_at)
                .then_with(|| a.room.name.cmp(&b.room.name))
        });
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Category, MessageContent, MessageId, MessageType, Role, Sender};
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, minute, 0).unwrap()
    }

    fn entry(local: Uuid, name: &str) -> RoomEntry {
        let room_id = Uuid::new_v4();
        RoomEntry {
            room: Room {
                id: room_id,
                name: name.to_string(),
                description: String::new(),
                category: Category::Environmental,
                member_count: 4,
                last_message_preview: None,
                last_message_at: None,
            },
            membership: Membership {
                user_id: local,
                community_id: room_id,
                role: Role::Member,
                unread_count: 0,
                joined_at: at(0),
                last_seen_at: None,
            },
        }
    }

    fn message_in(room: Uuid, sender_id: Uuid, body: &str, created_at: DateTime<Utc>) -> Message {
        Message {
            id: MessageId::Server(Uuid::new_v4()),
            community_id: room,
            sender: Sender {
                id: sender_id,
                name: "Riley".to_string(),
                role: Role::Member,
            },
            message_type: MessageType::Text,
            content: MessageContent::text(body),
            created_at,
            read_by: Vec::new(),
            delivered_to: Vec::new(),
            reactions: Vec::new(),
            reply_to: None,
            mentions: Vec::new(),
            is_optimistic: false,
            is_edited: false,
            is_deleted: false,
        }
    }

    #[test]
    fn test_note_message_updates_preview_and_unread() {
        let local = Uuid::new_v4();
        let mut dir = RoomDirectory::new(local);
        let e = entry(local, "River Cleanup");
        let room = e.room.id;
        dir.insert(e);

        let msg = message_in(room, Uuid::new_v4(), "see you at 9", at(5));
        assert!(dir.note_message(&msg, false));

        let entry = dir.get(room).unwrap();
        assert_eq!(entry.room.last_message_preview.as_deref(), Some("see you at 9"));
        assert_eq!(entry.room.last_message_at, Some(at(5)));
        assert_eq!(dir.unread(room), 1);
    }

    #[test]
    fn test_watched_room_does_not_accrue_unread() {
        let local = Uuid::new_v4();
        let mut dir = RoomDirectory::new(local);
        let e = entry(local, "Tree Planting");
        let room = e.room.id;
        dir.insert(e);

        let msg = message_in(room, Uuid::new_v4(), "hi", at(1));
        dir.note_message(&msg, true);
        assert_eq!(dir.unread(room), 0);
        // Preview still refreshes.
        assert!(dir.get(room).unwrap().room.last_message_preview.is_some());
    }

    #[test]
    fn test_own_messages_do_not_accrue_unread() {
        let local = Uuid::new_v4();
        let mut dir = RoomDirectory::new(local);
        let e = entry(local, "Beach Patrol");
        let room = e.room.id;
        dir.insert(e);

        dir.note_message(&message_in(room, local, "mine", at(1)), false);
        assert_eq!(dir.unread(room), 0);
    }

    #[test]
    fn test_mark_seen_and_rollback() {
        let local = Uuid::new_v4();
        let mut dir = RoomDirectory::new(local);
        let e = entry(local, "Compost Club");
        let room = e.room.id;
        dir.insert(e);

        for minute in 1..=3 {
            dir.note_message(&message_in(room, Uuid::new_v4(), "m", at(minute)), false);
        }
        assert_eq!(dir.unread(room), 3);

        let prior = dir.mark_seen(room, at(10)).unwrap();
        assert_eq!(prior, 3);
        assert_eq!(dir.unread(room), 0);
        assert_eq!(
            dir.get(room).unwrap().membership.last_seen_at,
            Some(at(10))
        );

        // Failed mark-read restores the counter.
        dir.set_unread(room, prior);
        assert_eq!(dir.unread(room), 3);
    }

    #[test]
    fn test_total_unread_sums_rooms() {
        let local = Uuid::new_v4();
        let mut dir = RoomDirectory::new(local);
        let a = entry(local, "A");
        let b = entry(local, "B");
        let (room_a, room_b) = (a.room.id, b.room.id);
        dir.insert(a);
        dir.insert(b);

        dir.note_message(&message_in(room_a, Uuid::new_v4(), "x", at(1)), false);
        dir.note_message(&message_in(room_b, Uuid::new_v4(), "y", at(2)), false);
        dir.note_message(&message_in(room_b, Uuid::new_v4(), "z", at(3)), false);
        assert_eq!(dir.total_unread(), 3);
    }

    #[test]
    fn test_apply_update_patches_fields() {
        let local = Uuid::new_v4();
        let mut dir = RoomDirectory::new(local);
        let e = entry(local, "Old Name");
        let room = e.room.id;
        dir.insert(e);

        let patch = CommunityPatch {
            name: Some("New Name".to_string()),
            description: None,
            category: Some(Category::Education),
            member_count: Some(12),
        };
        assert!(dir.apply_update(room, &patch));

        let entry = dir.get(room).unwrap();
        assert_eq!(entry.room.name, "New Name");
        assert_eq!(entry.room.category, Category::Education);
        assert_eq!(entry.room.member_count, 12);
        assert_eq!(entry.room.description, "");

        assert!(!dir.apply_update(Uuid::new_v4(), &patch));
    }

    #[test]
    fn test_rooms_sorted_by_recency_then_name() {
        let local = Uuid::new_v4();
        let mut dir = RoomDirectory::new(local);
        let quiet_b = entry(local, "Quiet B");
        let quiet_a = entry(local, "Quiet A");
        let active_old = entry(local, "Active Old");
        let active_new = entry(local, "Active New");
        let (old_id, new_id) = (active_old.room.id, active_new.room.id);
        dir.insert(quiet_b);
        dir.insert(quiet_a);
        dir.insert(active_old);
        dir.insert(active_new);

        dir.note_message(&message_in(old_id, Uuid::new_v4(), "m", at(1)), false);
        dir.note_message(&message_in(new_id, Uuid::new_v4(), "m", at(9)), false);

        let names: Vec<&str> = dir.rooms().iter().map(|e| e.room.name.as_str()).collect();
        assert_eq!(names, vec!["Active New", "Active Old", "Quiet A", "Quiet B"]);
    }

    #[test]
    fn test_replace_all_and_remove() {
        let local = Uuid::new_v4();
        let mut dir = RoomDirectory::new(local);
        let stale = entry(local, "Stale");
        dir.insert(stale);

        let fresh = entry(local, "Fresh");
        let fresh_id = fresh.room.id;
        dir.replace_all(vec![fresh]);
        assert_eq!(dir.len(), 1);
        assert!(dir.contains(fresh_id));

        let removed = dir.remove(fresh_id).unwrap();
        assert_eq!(removed.room.id, fresh_id);
        assert!(dir.is_empty());
    }

    #[test]
    fn test_entry_decodes_from_directory_wire_shape() {
        let raw = serde_json::json!({
            "community": {
                "id": Uuid::new_v4().to_string(),
                "name": "River Cleanup",
                "category": "cleanup",
                "memberCount": 8
            },
            "membership": {
                "userId": Uuid::new_v4().to_string(),
                "communityId": Uuid::new_v4().to_string(),
                "role": "admin",
                "unreadCount": 2,
                "joinedAt": "2026-02-01T08:00:00Z",
                "lastSeenAt": "2026-03-01T09:30:00Z"
            }
        });
        let entry: RoomEntry = serde_json::from_value(raw).unwrap();
        assert_eq!(entry.room.name, "River Cleanup");
        assert_eq!(entry.room.category, Category::Cleanup);
        assert_eq!(entry.membership.role, Role::Admin);
        assert_eq!(entry.membership.unread_count, 2);
        assert!(entry.membership.last_seen_at.is_some());
    }
}
