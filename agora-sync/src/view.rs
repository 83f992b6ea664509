//! Derived display views over a room's message log.
//!
//! Grouping and date bucketing are recomputed from the log on every
//! render and never stored, so they cannot drift from it. The grouping
//! window is configuration, not an invariant.

use chrono::{Duration, NaiveDate};

use crate::model::{Message, MessageType, Sender};

/// Display-policy configuration.
#[derive(Debug, Clone, Copy)]
pub struct ViewConfig {
    /// Maximum gap between consecutive messages of one group.
    pub grouping_window: Duration,
}

impl Default for ViewConfig {
    fn default() -> Self {
        ViewConfig {
            grouping_window: Duration::minutes(5),
        }
    }
}

impl ViewConfig {
    /// Short window for tests.
    pub fn for_testing() -> Self {
        ViewConfig {
            grouping_window: Duration::seconds(30),
        }
    }
}

/// A run of consecutive messages rendered under one sender header.
#[derive(Debug)]
pub struct MessageGroup<'a> {
    pub sender: &'a Sender,
    pub message_type: MessageType,
    pub messages: Vec<&'a Message>,
}

/// All messages of one calendar day, for date-separator rendering.
#[derive(Debug)]
pub struct DayBucket<'a> {
    pub date: NaiveDate,
    pub messages: Vec<&'a Message>,
}

/// Whether `next` continues the group started by `prev`: same sender,
/// same type, gap inside the window, and not a system message.
fn continues_group(prev: &Message, next: &Message, window: Duration) -> bool {
    prev.sender.id == next.sender.id
        && prev.message_type == next.message_type
        && next.message_type != MessageType::System
        && next.created_at.signed_duration_since(prev.created_at) < window
}

/// Partition a log into sender groups.
pub fn group_messages<'a>(messages: &'a [Message], window: Duration) -> Vec<MessageGroup<'a>> {
    let mut groups: Vec<MessageGroup<'a>> = Vec::new();

    for msg in messages {
        let continues = match groups.last() {
            Some(group) => group
                .messages
                .last()
                .is_some_and(|prev| continues_group(prev, msg, window)),
            None => false,
        };

        if continues {
            if let Some(group) = groups.last_mut() {
                group.messages.push(msg);
            }
        } else {
            groups.push(MessageGroup {
                sender: &msg.sender,
                message_type: msg.message_type,
                messages: vec![msg],
            });
        }
    }

    groups
}

/// Partition a log into calendar-day buckets (UTC days).
pub fn day_buckets(messages: &[Message]) -> Vec<DayBucket<'_>> {
    let mut buckets: Vec<DayBucket<'_>> = Vec::new();

    for msg in messages {
        let date = msg.created_at.date_naive();
        match buckets.last_mut() {
            Some(bucket) if bucket.date == date => bucket.messages.push(msg),
            _ => buckets.push(DayBucket {
                date,
                messages: vec![msg],
            }),
        }
    }

    buckets
}

/// Human label for a date separator: `Today`, `Yesterday`, else the
/// full date with its weekday.
pub fn date_label(date: NaiveDate, today: NaiveDate) -> String {
    match today.signed_duration_since(date).num_days() {
        0 => "Today".to_string(),
        1 => "Yesterday".to_string(),
        _ => date.format("%A, %B %-d, %Y").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MessageContent, MessageId, Role};
    use chrono::{DateTime, TimeZone, Utc};
    use uuid::Uuid;

    fn at(minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 10, minute, second).unwrap()
    }

    fn message(sender_id: Uuid, kind: MessageType, created_at: DateTime<Utc>) -> Message {
        Message {
            id: MessageId::Server(Uuid::new_v4()),
            community_id: Uuid::new_v4(),
            sender: Sender {
                id: sender_id,
                name: "A".to_string(),
                role: Role::Member,
            },
            message_type: kind,
            content: MessageContent::text("x"),
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
    fn test_groups_same_sender_within_window() {
        let a = Uuid::new_v4();
        let log = vec![
            message(a, MessageType::Text, at(0, 0)),
            message(a, MessageType::Text, at(1, 0)),
            message(a, MessageType::Text, at(2, 0)),
        ];
        let groups = group_messages(&log, Duration::minutes(5));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].messages.len(), 3);
    }

    #[test]
    fn test_gap_breaks_group() {
        let a = Uuid::new_v4();
        let log = vec![
            message(a, MessageType::Text, at(0, 0)),
            message(a, MessageType::Text, at(6, 0)),
        ];
        let groups = group_messages(&log, Duration::minutes(5));
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_sender_change_breaks_group() {
        let log = vec![
            message(Uuid::new_v4(), MessageType::Text, at(0, 0)),
            message(Uuid::new_v4(), MessageType::Text, at(0, 10)),
        ];
        let groups = group_messages(&log, Duration::minutes(5));
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_type_change_breaks_group() {
        let a = Uuid::new_v4();
        let log = vec![
            message(a, MessageType::Text, at(0, 0)),
            message(a, MessageType::Image, at(0, 10)),
        ];
        let groups = group_messages(&log, Duration::minutes(5));
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_system_messages_never_group() {
        let a = Uuid::new_v4();
        let log = vec![
            message(a, MessageType::System, at(0, 0)),
            message(a, MessageType::System, at(0, 5)),
        ];
        let groups = group_messages(&log, Duration::minutes(5));
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_window_is_configurable() {
        let a = Uuid::new_v4();
        let log = vec![
            message(a, MessageType::Text, at(0, 0)),
            message(a, MessageType::Text, at(0, 45)),
        ];
        assert_eq!(group_messages(&log, Duration::minutes(5)).len(), 1);
        assert_eq!(group_messages(&log, Duration::seconds(30)).len(), 2);
    }

    #[test]
    fn test_day_buckets_split_on_date() {
        let a = Uuid::new_v4();
        let log = vec![
            message(a, MessageType::Text, Utc.with_ymd_and_hms(2026, 2, 28, 23, 50, 0).unwrap()),
            message(a, MessageType::Text, Utc.with_ymd_and_hms(2026, 3, 1, 0, 5, 0).unwrap()),
            message(a, MessageType::Text, Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()),
        ];
        let buckets = day_buckets(&log);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].messages.len(), 1);
        assert_eq!(buckets[1].messages.len(), 2);
    }

    #[test]
    fn test_date_labels() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(); // a Sunday
        assert_eq!(date_label(today, today), "Today");
        assert_eq!(
            date_label(NaiveDate::from_ymd_opt(2026, 2, 28).unwrap(), today),
            "Yesterday"
        );
        // Anything older gets the full date, never a bare weekday.
        assert_eq!(
            date_label(NaiveDate::from_ymd_opt(2026, 2, 27).unwrap(), today),
            "Friday, February 27, 2026"
        );
        assert_eq!(
            date_label(NaiveDate::from_ymd_opt(2026, 2, 22).unwrap(), today),
            "Sunday, February 22, 2026"
        );
    }

    #[test]
    fn test_empty_log() {
        let log: Vec<Message> = Vec::new();
        assert!(group_messages(&log, Duration::minutes(5)).is_empty());
        assert!(day_buckets(&log).is_empty());
    }
}
