//! Read-receipt and reaction reducers.
//!
//! Pure fold functions applied to messages already in the log. They
//! never initiate network calls; the store invokes them when a
//! confirmation event arrives or when the local user acts.
//!
//! Both sets are append-if-absent: a user appears at most once in a
//! message's `read_by`, and a (user, emoji) pair at most once in its
//! reactions. Re-reacting with the same emoji removes the pair.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{Message, Reaction, ReadReceipt};

/// Outcome of a reaction toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleAction {
    Added,
    Removed,
}

/// Fold one read acknowledgment into a message.
///
/// Returns `true` if the receipt was new, `false` if the user had
/// already read it (idempotent re-delivery).
pub fn apply_read(message: &mut Message, user_id: Uuid, read_at: DateTime<Utc>) -> bool {
    if message.is_read_by(user_id) {
        return false;
    }
    message.read_by.push(ReadReceipt { user_id, read_at });
    true
}

/// Record delivery to one user. Idempotent.
pub fn mark_delivered(message: &mut Message, user_id: Uuid) -> bool {
    if message.delivered_to.contains(&user_id) {
        return false;
    }
    message.delivered_to.push(user_id);
    true
}

/// Toggle a (user, emoji) reaction on a reaction list.
pub fn toggle_reaction(reactions: &mut Vec<Reaction>, user_id: Uuid, emoji: &str) -> ToggleAction {
    if let Some(pos) = reactions
        .iter()
        .position(|r| r.user_id == user_id && r.emoji == emoji)
    {
        reactions.remove(pos);
        ToggleAction::Removed
    } else {
        reactions.push(Reaction {
            user_id,
            emoji: emoji.to_string(),
        });
        ToggleAction::Added
    }
}

/// Replace a message's reactions with the server's authoritative list,
/// normalized so no (user, emoji) pair appears twice.
pub fn replace_reactions(message: &mut Message, incoming: Vec<Reaction>) {
    let mut normalized: Vec<Reaction> = Vec::with_capacity(incoming.len());
    for r in incoming {
        if !normalized
            .iter()
            .any(|seen| seen.user_id == r.user_id && seen.emoji == r.emoji)
        {
            normalized.push(r);
        }
    }
    message.reactions = normalized;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MessageContent, MessageType, Role, Sender};

    fn message() -> Message {
        Message::new_optimistic(
            Uuid::new_v4(),
            Sender {
                id: Uuid::new_v4(),
                name: "Ana".to_string(),
                role: Role::Member,
            },
            MessageType::Text,
            MessageContent::text("hi"),
            None,
            Vec::new(),
            Utc::now(),
        )
    }

    #[test]
    fn test_apply_read_appends_once() {
        let mut msg = message();
        let reader = Uuid::new_v4();
        let at = Utc::now();

        assert!(apply_read(&mut msg, reader, at));
        assert_eq!(msg.read_by.len(), 1);

        // Same event again — no change.
        assert!(!apply_read(&mut msg, reader, at));
        assert_eq!(msg.read_by.len(), 1);
    }

    #[test]
    fn test_apply_read_distinct_users() {
        let mut msg = message();
        apply_read(&mut msg, Uuid::new_v4(), Utc::now());
        apply_read(&mut msg, Uuid::new_v4(), Utc::now());
        assert_eq!(msg.read_by.len(), 2);
    }

    #[test]
    fn test_mark_delivered_idempotent() {
        let mut msg = message();
        let user = Uuid::new_v4();
        assert!(mark_delivered(&mut msg, user));
        assert!(!mark_delivered(&mut msg, user));
        assert_eq!(msg.delivered_to.len(), 1);
    }

    #[test]
    fn test_toggle_reaction_roundtrip() {
        let mut reactions = Vec::new();
        let user = Uuid::new_v4();

        assert_eq!(toggle_reaction(&mut reactions, user, "🌱"), ToggleAction::Added);
        assert_eq!(reactions.len(), 1);

        // Same user, same emoji — removed, back to the initial state.
        assert_eq!(toggle_reaction(&mut reactions, user, "🌱"), ToggleAction::Removed);
        assert!(reactions.is_empty());
    }

    #[test]
    fn test_toggle_reaction_distinct_keys() {
        let mut reactions = Vec::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        toggle_reaction(&mut reactions, a, "🌱");
        toggle_reaction(&mut reactions, a, "👍");
        toggle_reaction(&mut reactions, b, "🌱");
        assert_eq!(reactions.len(), 3);

        // Removing one key leaves the others.
        toggle_reaction(&mut reactions, a, "🌱");
        assert_eq!(reactions.len(), 2);
        assert!(!reactions.iter().any(|r| r.user_id == a && r.emoji == "🌱"));
    }

    #[test]
    fn test_replace_reactions_normalizes_duplicates() {
        let mut msg = message();
        let user = Uuid::new_v4();
        let dup = Reaction {
            user_id: user,
            emoji: "🔥".to_string(),
        };
        replace_reactions(&mut msg, vec![dup.clone(), dup.clone()]);
        assert_eq!(msg.reactions.len(), 1);
    }

    #[test]
    fn test_replace_reactions_overwrites() {
        let mut msg = message();
        msg.reactions.push(Reaction {
            user_id: Uuid::new_v4(),
            emoji: "old".to_string(),
        });
        replace_reactions(&mut msg, Vec::new());
        assert!(msg.reactions.is_empty());
    }
}
