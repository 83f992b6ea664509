//! Domain model shared by every component of the sync engine.
//!
//! Messages are the central type: a room-scoped entry that is either
//! server-confirmed (UUID id) or optimistic (temporary string id,
//! pending acknowledgment). Rooms and memberships belong to the
//! directory; presence/typing entries are ephemeral and live in their
//! trackers, never here.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Prefix marking a client-generated temporary message id.
const TEMP_ID_PREFIX: &str = "temp_";

/// Message identifier.
///
/// Server-assigned ids are UUIDs. Optimistic entries carry a
/// `temp_<clock>_<random>` string until the server ack promotes them.
/// Both forms serialize as plain strings on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// Server-assigned, durable id.
    Server(Uuid),
    /// Client-generated id of an unacknowledged optimistic entry.
    Temp(String),
}

impl MessageId {
    /// Synthesize a fresh temporary id from the local clock.
    pub fn new_temp(now: DateTime<Utc>) -> Self {
        let nonce = Uuid::new_v4().simple().to_string();
        MessageId::Temp(format!(
            "{}{}_{}",
            TEMP_ID_PREFIX,
            now.timestamp_millis(),
            &nonce[..8]
        ))
    }

    /// Whether this id is temporary (entry not yet acknowledged).
    pub fn is_temp(&self) -> bool {
        matches!(self, MessageId::Temp(_))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Server(id) => write!(f, "{id}"),
            MessageId::Temp(t) => f.write_str(t),
        }
    }
}

/// Error parsing a message id from its wire form.
#[derive(Debug, Clone)]
pub struct InvalidMessageId(pub String);

impl fmt::Display for InvalidMessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid message id: {:?}", self.0)
    }
}

impl std::error::Error for InvalidMessageId {}

impl FromStr for MessageId {
    type Err = InvalidMessageId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with(TEMP_ID_PREFIX) {
            return Ok(MessageId::Temp(s.to_string()));
        }
        Uuid::parse_str(s)
            .map(MessageId::Server)
            .map_err(|_| InvalidMessageId(s.to_string()))
    }
}

impl From<Uuid> for MessageId {
    fn from(id: Uuid) -> Self {
        MessageId::Server(id)
    }
}

impl Serialize for MessageId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Kind tag carried by every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    Video,
    Audio,
    File,
    System,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::Video => "video",
            MessageType::Audio => "audio",
            MessageType::File => "file",
            MessageType::System => "system",
        };
        f.write_str(name)
    }
}

/// Type-specific message payload. Text messages fill `text`; media
/// messages carry a `file_url` plus whatever metadata applies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Playback length in seconds, for audio/video.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

impl MessageContent {
    /// Content holding only a text body.
    pub fn text(body: impl Into<String>) -> Self {
        MessageContent {
            text: Some(body.into()),
            ..MessageContent::default()
        }
    }

    /// Whether the payload satisfies the given message type:
    /// text/system messages need a non-empty body, media messages need
    /// a file URL.
    pub fn is_complete_for(&self, kind: MessageType) -> bool {
        match kind {
            MessageType::Text | MessageType::System => {
                self.text.as_deref().is_some_and(|t| !t.trim().is_empty())
            }
            _ => self.file_url.as_deref().is_some_and(|u| !u.is_empty()),
        }
    }
}

/// Membership role within a community.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Admin,
}

/// Message author: id plus the display fields the UI renders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sender {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
}

/// One user's read acknowledgment of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub user_id: Uuid,
    pub read_at: DateTime<Utc>,
}

/// One user's emoji reaction. A (user, emoji) pair appears at most
/// once per message; reacting again removes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub user_id: Uuid,
    pub emoji: String,
}

/// Aggregate delivery status, derived on demand from the receipt sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

/// A chat message as held in a room's ordered log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub community_id: Uuid,
    pub sender: Sender,
    pub message_type: MessageType,
    pub content: MessageContent,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub read_by: Vec<ReadReceipt>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delivered_to: Vec<Uuid>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reactions: Vec<Reaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentions: Vec<Uuid>,
    /// Set only on local entries awaiting server acknowledgment.
    #[serde(default)]
    pub is_optimistic: bool,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub is_deleted: bool,
}

impl Message {
    /// Build an optimistic local entry for an outgoing send.
    pub fn new_optimistic(
        community_id: Uuid,
        sender: Sender,
        message_type: MessageType,
        content: MessageContent,
        reply_to: Option<MessageId>,
        mentions: Vec<Uuid>,
        now: DateTime<Utc>,
    ) -> Self {
        Message {
            id: MessageId::new_temp(now),
            community_id,
            sender,
            message_type,
            content,
            created_at: now,
            read_by: Vec::new(),
            delivered_to: Vec::new(),
            reactions: Vec::new(),
            reply_to,
            mentions,
            is_optimistic: true,
            is_edited: false,
            is_deleted: false,
        }
    }

    /// Whether `user` appears in this message's read set.
    pub fn is_read_by(&self, user: Uuid) -> bool {
        self.read_by.iter().any(|r| r.user_id == user)
    }

    /// Aggregate status: `Read` once anyone besides the sender has
    /// read it, `Delivered` once delivered anywhere, else `Sent`.
    pub fn delivery_status(&self) -> DeliveryStatus {
        if self.read_by.iter().any(|r| r.user_id != self.sender.id) {
            DeliveryStatus::Read
        } else if !self.delivered_to.is_empty() {
            DeliveryStatus::Delivered
        } else {
            DeliveryStatus::Sent
        }
    }

    /// One-line directory preview for this message.
    pub fn preview_text(&self) -> String {
        match self.content.text.as_deref() {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => format!("Sent a {}", self.message_type),
        }
    }
}

/// Community category tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Environmental,
    Cleanup,
    Conservation,
    Education,
    #[default]
    Other,
}

/// A community room as listed by the directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub member_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
}

/// The local user's membership in one room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub user_id: Uuid,
    pub community_id: Uuid,
    pub role: Role,
    #[serde(default)]
    pub unread_count: u32,
    pub joined_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// Last-known presence status of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    Busy,
    Offline,
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Away => "away",
            PresenceStatus::Busy => "busy",
            PresenceStatus::Offline => "offline",
        };
        f.write_str(name)
    }
}

/// Identity the session acts as. Used to synthesize optimistic
/// senders and to suppress self-echo in the trackers.
#[derive(Debug, Clone)]
pub struct LocalUser {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
}

impl LocalUser {
    pub fn new(id: Uuid, name: impl Into<String>, role: Role) -> Self {
        LocalUser {
            id,
            name: name.into(),
            role,
        }
    }

    /// This user as a message sender.
    pub fn sender(&self) -> Sender {
        Sender {
            id: self.id,
            name: self.name.clone(),
            role: self.role,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender(id: Uuid) -> Sender {
        Sender {
            id,
            name: "Dana".to_string(),
            role: Role::Member,
        }
    }

    fn text_message(body: &str) -> Message {
        Message::new_optimistic(
            Uuid::new_v4(),
            sender(Uuid::new_v4()),
            MessageType::Text,
            MessageContent::text(body),
            None,
            Vec::new(),
            Utc::now(),
        )
    }

    #[test]
    fn test_temp_id_shape() {
        let id = MessageId::new_temp(Utc::now());
        assert!(id.is_temp());

        let rendered = id.to_string();
        assert!(rendered.starts_with("temp_"));
        // clock and nonce separated by underscores
        assert_eq!(rendered.matches('_').count(), 2);

        let parsed: MessageId = rendered.parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_server_id_parse_roundtrip() {
        let raw = Uuid::new_v4();
        let id: MessageId = raw.to_string().parse().unwrap();
        assert_eq!(id, MessageId::Server(raw));
        assert!(!id.is_temp());
    }

    #[test]
    fn test_message_id_rejects_garbage() {
        assert!("not-an-id".parse::<MessageId>().is_err());
        assert!("".parse::<MessageId>().is_err());
    }

    #[test]
    fn test_message_id_serde_as_string() {
        let server = MessageId::Server(Uuid::new_v4());
        let json = serde_json::to_string(&server).unwrap();
        assert!(json.starts_with('"'));
        let back: MessageId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, server);

        let temp = MessageId::new_temp(Utc::now());
        let json = serde_json::to_string(&temp).unwrap();
        let back: MessageId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, temp);
    }

    #[test]
    fn test_delivery_status_precedence() {
        let mut msg = text_message("hi");
        assert_eq!(msg.delivery_status(), DeliveryStatus::Sent);

        msg.delivered_to.push(Uuid::new_v4());
        assert_eq!(msg.delivery_status(), DeliveryStatus::Delivered);

        msg.read_by.push(ReadReceipt {
            user_id: Uuid::new_v4(),
            read_at: Utc::now(),
        });
        assert_eq!(msg.delivery_status(), DeliveryStatus::Read);
    }

    #[test]
    fn test_sender_self_read_is_not_read() {
        let mut msg = text_message("hi");
        let author = msg.sender.id;
        msg.read_by.push(ReadReceipt {
            user_id: author,
            read_at: Utc::now(),
        });
        // Only the author has "read" it — still just sent.
        assert_eq!(msg.delivery_status(), DeliveryStatus::Sent);
    }

    #[test]
    fn test_preview_text() {
        let msg = text_message("see you at the cleanup");
        assert_eq!(msg.preview_text(), "see you at the cleanup");

        let mut media = text_message("x");
        media.message_type = MessageType::Image;
        media.content = MessageContent {
            file_url: Some("https://cdn/img.png".to_string()),
            ..MessageContent::default()
        };
        assert_eq!(media.preview_text(), "Sent a image");
    }

    #[test]
    fn test_optimistic_message_defaults() {
        let msg = text_message("hello");
        assert!(msg.is_optimistic);
        assert!(msg.id.is_temp());
        assert!(msg.read_by.is_empty());
        assert!(msg.delivered_to.is_empty());
        assert!(msg.reactions.is_empty());
        assert!(!msg.is_edited);
        assert!(!msg.is_deleted);
    }

    #[test]
    fn test_content_completeness() {
        assert!(MessageContent::text("hi").is_complete_for(MessageType::Text));
        assert!(!MessageContent::text("   ").is_complete_for(MessageType::Text));
        assert!(!MessageContent::default().is_complete_for(MessageType::Text));

        let media = MessageContent {
            file_url: Some("https://cdn/clip.mp4".to_string()),
            ..MessageContent::default()
        };
        assert!(media.is_complete_for(MessageType::Video));
        assert!(!MessageContent::text("hi").is_complete_for(MessageType::Video));
    }

    #[test]
    fn test_message_wire_roundtrip_camel_case() {
        let mut msg = text_message("hello");
        msg.reply_to = Some(MessageId::Server(Uuid::new_v4()));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"communityId\""));
        assert!(json.contains("\"messageType\""));
        assert!(json.contains("\"createdAt\""));
        assert!(json.contains("\"replyTo\""));

        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_local_user_sender() {
        let user = LocalUser::new(Uuid::new_v4(), "Jo", Role::Admin);
        let s = user.sender();
        assert_eq!(s.id, user.id);
        assert_eq!(s.name, "Jo");
        assert_eq!(s.role, Role::Admin);
    }
}
