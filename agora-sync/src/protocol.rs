//! Wire protocol for the chat socket.
//!
//! Every frame is a JSON envelope with an event tag and a payload:
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ {"event": "new_message",                     │
//! │  "data": {"message": {...}, "tempId": ...}}  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The inbound and outbound event sets are closed enums, so dispatch
//! is an exhaustive match: an event the engine does not understand
//! fails decoding and is dropped at the transport edge, and a handler
//! cannot be forgotten without a compile error.
//!
//! Performance targets:
//! - Encode typical event: <5μs
//! - Decode 1KB `new_message` frame: <10μs
//!
//! Reference: Kleppmann — DDIA, Chapter 4 (Encoding and Evolution)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{Category, Message, MessageId, PresenceStatus, Reaction, Role};

/// Events the client emits to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    JoinCommunity { community_id: Uuid },
    #[serde(rename_all = "camelCase")]
    LeaveCommunity { community_id: Uuid },
    #[serde(rename_all = "camelCase")]
    TypingStart { community_id: Uuid },
    #[serde(rename_all = "camelCase")]
    TypingStop { community_id: Uuid },
    #[serde(rename_all = "camelCase")]
    AddReaction { message_id: Uuid, emoji: String },
    #[serde(rename_all = "camelCase")]
    MarkMessageRead {
        message_id: Uuid,
        community_id: Uuid,
    },
}

impl ClientEvent {
    /// Wire name of this event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinCommunity { .. } => "join_community",
            ClientEvent::LeaveCommunity { .. } => "leave_community",
            ClientEvent::TypingStart { .. } => "typing_start",
            ClientEvent::TypingStop { .. } => "typing_stop",
            ClientEvent::AddReaction { .. } => "add_reaction",
            ClientEvent::MarkMessageRead { .. } => "mark_message_read",
        }
    }

    /// Encode to a JSON frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Decode a client frame (server side of the connection).
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(frame).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

/// One occupant in a room roster replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterUser {
    pub user_id: Uuid,
    pub name: String,
    pub role: Role,
    pub status: PresenceStatus,
}

/// Partial community update carried by `community_updated`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_count: Option<u32>,
}

/// Events the server pushes to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A message accepted into a room. Carries the originating temp id
    /// when this broadcast is the echo of an optimistic send.
    #[serde(rename_all = "camelCase")]
    NewMessage {
        message: Message,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temp_id: Option<MessageId>,
    },
    /// Direct ack to the sender: the optimistic entry was persisted.
    #[serde(rename_all = "camelCase")]
    MessageSent {
        temp_id: MessageId,
        message_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    /// Direct nack to the sender: the send was rejected.
    #[serde(rename_all = "camelCase")]
    MessageError { temp_id: MessageId, error: String },
    #[serde(rename_all = "camelCase")]
    MessageRead {
        message_id: Uuid,
        read_by: Uuid,
        read_at: DateTime<Utc>,
    },
    /// Authoritative replacement of a message's reaction list.
    #[serde(rename_all = "camelCase")]
    MessageReaction {
        message_id: Uuid,
        reactions: Vec<Reaction>,
    },
    #[serde(rename_all = "camelCase")]
    UserTyping {
        community_id: Uuid,
        user_id: Uuid,
        user_name: String,
        is_typing: bool,
    },
    #[serde(rename_all = "camelCase")]
    UserOnline { user_id: Uuid },
    #[serde(rename_all = "camelCase")]
    UserOffline { user_id: Uuid },
    /// Current occupants of a room, replayed on join.
    #[serde(rename_all = "camelCase")]
    RoomRoster {
        community_id: Uuid,
        users: Vec<RosterUser>,
    },
    #[serde(rename_all = "camelCase")]
    RemovedFromCommunity { community_id: Uuid },
    #[serde(rename_all = "camelCase")]
    CommunityUpdated {
        community_id: Uuid,
        updates: CommunityPatch,
    },
}

impl ServerEvent {
    /// Wire name of this event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::NewMessage { .. } => "new_message",
            ServerEvent::MessageSent { .. } => "message_sent",
            ServerEvent::MessageError { .. } => "message_error",
            ServerEvent::MessageRead { .. } => "message_read",
            ServerEvent::MessageReaction { .. } => "message_reaction",
            ServerEvent::UserTyping { .. } => "user_typing",
            ServerEvent::UserOnline { .. } => "user_online",
            ServerEvent::UserOffline { .. } => "user_offline",
            ServerEvent::RoomRoster { .. } => "room_roster",
            ServerEvent::RemovedFromCommunity { .. } => "removed_from_community",
            ServerEvent::CommunityUpdated { .. } => "community_updated",
        }
    }

    /// Encode to a JSON frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Decode an inbound JSON frame.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(frame).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

/// Protocol encode/decode errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    /// Serialization failed
    Encode(String),
    /// Frame is not a well-formed event envelope
    Decode(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Encode(e) => write!(f, "Encode failed: {e}"),
            ProtocolError::Decode(e) => write!(f, "Decode failed: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}
