//! Session orchestration: one `ChatSession` owns the transport, the
//! REST client, and every tracker, and folds all traffic into them.
//!
//! ```text
//!        socket events ──►┐
//!                         ├── dispatch ──► store / directory /
//!   typing deadlines ──►┘               presence / typing
//!                                             │
//!   operations (send, mark_read, ...) ────────┤
//!                                             ▼
//!                    next_update() ──► SessionUpdate stream
//! ```
//!
//! Dispatch is synchronous and exhaustive over the event enum, so a
//! new server event cannot be silently ignored. Consumers drive the
//! session by awaiting `next_update()` in a loop and re-reading
//! whatever state the update names.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::time::Instant;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::directory::{RoomDirectory, RoomEntry};
use crate::model::{LocalUser, Message, MessageContent, MessageId, MessageType};
use crate::presence::{PresenceEntry, PresenceTracker};
use crate::protocol::{ClientEvent, ServerEvent};
use crate::receipts::ToggleAction;
use crate::rest::{ApiClient, ApiConfig, ApiError, CreateMessage, DeleteScope};
use crate::sync::{LiveOutcome, LoadCursor, MessageStore, StoreStats};
use crate::transport::{
    ConnectionState, SocketTransport, TransportConfig, TransportError, TransportEvent,
    TransportStatsSnapshot,
};
use crate::typing::{TypingConfig, TypingCoordinator};
use crate::view::{self, DayBucket, MessageGroup, ViewConfig};

/// Everything a session needs to run.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub api: ApiConfig,
    pub transport: TransportConfig,
    pub typing: TypingConfig,
    pub view: ViewConfig,
}

impl SessionConfig {
    /// Test endpoints with fast windows throughout.
    pub fn for_testing(base_url: &str, ws_url: &str) -> Self {
        SessionConfig {
            api: ApiConfig::for_testing(base_url),
            transport: TransportConfig::for_testing(ws_url),
            typing: TypingConfig::for_testing(),
            view: ViewConfig::for_testing(),
        }
    }
}

/// State change notifications handed to the consumer. Each names what
/// to re-read, not what happened to it.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    ConnectionChanged { state: ConnectionState },
    /// Reconnection gave up; the session needs a fresh `start()`.
    ConnectionLost,
    RoomsChanged,
    MessagesChanged { room: Uuid },
    /// A send failed and its optimistic entry was removed.
    MessageFailed {
        room: Uuid,
        temp_id: MessageId,
        reason: String,
    },
    PresenceChanged,
    TypingChanged { room: Uuid },
    RemovedFromRoom { room: Uuid },
}

/// Session operation failure.
#[derive(Debug)]
pub enum SessionError {
    Api(ApiError),
    Transport(TransportError),
    /// The user does not belong to this room.
    NotAMember { room: Uuid },
    /// The room's log is not tracked; `watch` it first.
    NotWatching { room: Uuid },
    /// No tracked message has this id.
    UnknownMessage,
    /// The message is still optimistic; wait for its server id.
    PendingMessage,
    /// The payload is incomplete for its message type.
    EmptyMessage,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Api(e) => write!(f, "api error: {e}"),
            SessionError::Transport(e) => write!(f, "transport error: {e}"),
            SessionError::NotAMember { room } => write!(f, "not a member of room {room}"),
            SessionError::NotWatching { room } => write!(f, "room {room} is not being watched"),
            SessionError::UnknownMessage => f.write_str("unknown message id"),
            SessionError::PendingMessage => f.write_str("message has no server id yet"),
            SessionError::EmptyMessage => f.write_str("message payload is empty"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<ApiError> for SessionError {
    fn from(e: ApiError) -> Self {
        SessionError::Api(e)
    }
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        SessionError::Transport(e)
    }
}

/// Combined counters for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct SessionStats {
    pub store: StoreStats,
    pub transport: TransportStatsSnapshot,
}

/// A user's live chat session.
pub struct ChatSession {
    local: LocalUser,
    view: ViewConfig,
    api: ApiClient,
    transport: SocketTransport,
    events: Option<mpsc::Receiver<TransportEvent>>,
    store: MessageStore,
    directory: RoomDirectory,
    presence: PresenceTracker,
    typing: TypingCoordinator,
    watched: HashSet<Uuid>,
    pending: VecDeque<SessionUpdate>,
}

impl ChatSession {
    pub fn new(local: LocalUser, config: SessionConfig) -> Result<Self, SessionError> {
        let api = ApiClient::new(config.api)?;
        Ok(ChatSession {
            api,
            transport: SocketTransport::new(config.transport),
            events: None,
            store: MessageStore::new(local.id),
            directory: RoomDirectory::new(local.id),
            presence: PresenceTracker::new(local.id),
            typing: TypingCoordinator::new(local.id, config.typing),
            view: config.view,
            local,
            watched: HashSet::new(),
            pending: VecDeque::new(),
        })
    }

    /// Fetch the room directory and open the socket.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        let entries = self.api.my_rooms().await?;
        info!("directory loaded: {} rooms", entries.len());
        self.directory.replace_all(entries);
        self.transport.connect().await?;
        self.events = self.transport.take_event_rx();
        Ok(())
    }

    /// Stop typing everywhere and close the socket. Logs and unread
    /// state stay intact; dropping the session is the real teardown.
    pub async fn shutdown(&mut self) {
        let rooms: Vec<Uuid> = self.watched.iter().copied().collect();
        for room in rooms {
            if let Some(stop) = self.typing.stop_local(room) {
                let _ = self.transport.emit(stop);
            }
        }
        self.transport.disconnect().await;
        self.presence.clear();
        self.typing.clear();
    }

    // ── Update pump ─────────────────────────────────────────────────

    /// The next state change, driven by socket traffic and typing
    /// expiry. Returns `None` once the transport is gone for good.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        loop {
            if let Some(update) = self.pending.pop_front() {
                return Some(update);
            }
            let mut events = self.events.take()?;
            let deadline = self.typing.next_deadline();
            let received = tokio::select! {
                event = events.recv() => Some(event),
                _ = Self::sleep_until(deadline) => None,
            };
            self.events = Some(events);
            match received {
                Some(Some(event)) => self.dispatch(event),
                Some(None) => {
                    self.events = None;
                    return self.pending.pop_front();
                }
                None => self.expire_typing(),
            }
        }
    }

    async fn sleep_until(deadline: Option<Instant>) {
        match deadline {
            Some(at) => tokio::time::sleep_until(at.into()).await,
            None => std::future::pending().await,
        }
    }

    fn expire_typing(&mut self) {
        let outcome = self.typing.expire();
        for stop in outcome.stops {
            let _ = self.transport.emit(stop);
        }
        for room in outcome.rooms_changed {
            self.push(SessionUpdate::TypingChanged { room });
        }
    }

    fn push(&mut self, update: SessionUpdate) {
        self.pending.push_back(update);
    }

    fn dispatch(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { resumed } => {
                if resumed {
                    // The server's room subscriptions died with the old
                    // socket; joining again is idempotent.
                    for room in self.watched.iter().copied().collect::<Vec<_>>() {
                        let _ = self
                            .transport
                            .emit(ClientEvent::JoinCommunity { community_id: room });
                    }
                }
                self.push(SessionUpdate::ConnectionChanged {
                    state: ConnectionState::Connected,
                });
            }
            TransportEvent::Disconnected { will_retry } => {
                // Presence and typing are connection-scoped; rosters
                // replay after the next join.
                self.presence.clear();
                self.typing.clear();
                self.push(SessionUpdate::PresenceChanged);
                self.push(SessionUpdate::ConnectionChanged {
                    state: if will_retry {
                        ConnectionState::Reconnecting
                    } else {
                        ConnectionState::Disconnected
                    },
                });
            }
            TransportEvent::RetriesExhausted => {
                warn!("transport gave up reconnecting");
                self.push(SessionUpdate::ConnectionLost);
            }
            TransportEvent::Event(event) => self.apply_event(event),
        }
    }

    fn apply_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::NewMessage { message, temp_id } => {
                let room = message.community_id;
                if self.store.is_tracked(room) {
                    let watching = self.watched.contains(&room);
                    let summary = message.clone();
                    match self.store.apply_live(message, temp_id.as_ref()) {
                        LiveOutcome::Appended | LiveOutcome::Reconciled => {
                            self.directory.note_message(&summary, watching);
                            self.push(SessionUpdate::MessagesChanged { room });
                            self.push(SessionUpdate::RoomsChanged);
                        }
                        LiveOutcome::Duplicate | LiveOutcome::StaleRoom => {}
                    }
                } else if self.directory.contains(room) {
                    self.directory.note_message(&message, false);
                    self.push(SessionUpdate::RoomsChanged);
                } else {
                    debug!("dropping message for unknown room {room}");
                }
            }
            ServerEvent::MessageSent {
                temp_id,
                message_id,
                timestamp,
            } => match self.store.locate(&temp_id) {
                Some(room) => {
                    if self.store.reconcile_ack(room, &temp_id, message_id, timestamp) {
                        self.push(SessionUpdate::MessagesChanged { room });
                    }
                }
                None => debug!("ack for unknown send {temp_id}"),
            },
            ServerEvent::MessageError { temp_id, error } => match self.store.locate(&temp_id) {
                Some(room) => {
                    self.store.rollback_send(room, &temp_id);
                    self.push(SessionUpdate::MessagesChanged { room });
                    self.push(SessionUpdate::MessageFailed {
                        room,
                        temp_id,
                        reason: error,
                    });
                }
                None => debug!("error for unknown send {temp_id}"),
            },
            ServerEvent::MessageRead {
                message_id,
                read_by,
                read_at,
            } => {
                let id = MessageId::Server(message_id);
                if let Some((room, true)) = self.store.apply_read(&id, read_by, read_at) {
                    self.push(SessionUpdate::MessagesChanged { room });
                }
            }
            ServerEvent::MessageReaction {
                message_id,
                reactions,
            } => {
                let id = MessageId::Server(message_id);
                if let Some(room) = self.store.apply_reactions(&id, reactions) {
                    self.push(SessionUpdate::MessagesChanged { room });
                }
            }
            ServerEvent::UserTyping {
                community_id,
                user_id,
                user_name,
                is_typing,
            } => {
                if self.typing.apply_remote(community_id, user_id, user_name, is_typing) {
                    self.push(SessionUpdate::TypingChanged { room: community_id });
                }
            }
            ServerEvent::UserOnline { user_id } => {
                if self.presence.set_online(user_id) {
                    self.push(SessionUpdate::PresenceChanged);
                }
            }
            ServerEvent::UserOffline { user_id } => {
                if self.presence.set_offline(user_id) {
                    self.push(SessionUpdate::PresenceChanged);
                }
            }
            ServerEvent::RoomRoster {
                community_id,
                users,
            } => {
                self.presence.apply_roster(community_id, users);
                self.push(SessionUpdate::PresenceChanged);
            }
            ServerEvent::RemovedFromCommunity { community_id } => {
                info!("removed from room {community_id}");
                self.teardown_room(community_id);
                self.push(SessionUpdate::RemovedFromRoom {
                    room: community_id,
                });
                self.push(SessionUpdate::RoomsChanged);
            }
            ServerEvent::CommunityUpdated {
                community_id,
                updates,
            } => {
                if self.directory.apply_update(community_id, &updates) {
                    self.push(SessionUpdate::RoomsChanged);
                }
            }
        }
    }

    fn teardown_room(&mut self, room: Uuid) {
        self.watched.remove(&room);
        self.store.purge_room(room);
        self.directory.remove(room);
        self.presence.drop_room(room);
        self.typing.drop_room(room);
    }

    // ── Room operations ─────────────────────────────────────────────

    /// Open a room: track its log and subscribe to its roster and
    /// typing traffic. Follow with `load_history` for the first page.
    pub fn watch(&mut self, room: Uuid) -> Result<(), SessionError> {
        if !self.directory.contains(room) {
            return Err(SessionError::NotAMember { room });
        }
        self.watched.insert(room);
        self.store.track_room(room);
        if let Err(e) = self
            .transport
            .emit(ClientEvent::JoinCommunity { community_id: room })
        {
            debug!("join for {room} deferred: {e}");
        }
        Ok(())
    }

    /// Close a room view. Its log stays tracked so unread counts keep
    /// accruing; roster and typing interest end here.
    pub fn unwatch(&mut self, room: Uuid) {
        if !self.watched.remove(&room) {
            return;
        }
        if let Some(stop) = self.typing.stop_local(room) {
            let _ = self.transport.emit(stop);
        }
        let _ = self
            .transport
            .emit(ClientEvent::LeaveCommunity { community_id: room });
        self.presence.drop_room(room);
    }

    pub fn is_watching(&self, room: Uuid) -> bool {
        self.watched.contains(&room)
    }

    /// Fetch the next history page for a room: the newest page first,
    /// then progressively older ones. Returns how many messages were
    /// merged; zero when a load is in flight or history is exhausted.
    pub async fn load_history(&mut self, room: Uuid) -> Result<usize, SessionError> {
        let Some(cursor) = self.store.begin_load(room) else {
            return Ok(0);
        };
        let before = match cursor {
            LoadCursor::Initial => None,
            LoadCursor::Before(ts) => Some(ts),
        };
        match self.api.fetch_messages(room, before).await {
            Ok(page) => {
                let inserted = self.store.complete_load(room, page.messages, page.has_next);
                if inserted > 0 {
                    self.push(SessionUpdate::MessagesChanged { room });
                }
                Ok(inserted)
            }
            Err(e) => {
                self.store.fail_load(room);
                Err(e.into())
            }
        }
    }

    /// Join a new room, then refresh the directory.
    pub async fn join_room(&mut self, room: Uuid) -> Result<(), SessionError> {
        self.api.join_room(room).await?;
        let entries = self.api.my_rooms().await?;
        self.directory.replace_all(entries);
        self.push(SessionUpdate::RoomsChanged);
        Ok(())
    }

    /// Leave a room for good and drop all its local state.
    pub async fn leave_room(&mut self, room: Uuid) -> Result<(), SessionError> {
        self.api.leave_room(room).await?;
        self.teardown_room(room);
        self.push(SessionUpdate::RoomsChanged);
        Ok(())
    }

    // ── Message operations ──────────────────────────────────────────

    pub async fn send_text(&mut self, room: Uuid, text: &str) -> Result<MessageId, SessionError> {
        self.send_message(room, MessageType::Text, MessageContent::text(text), None, Vec::new())
            .await
    }

    /// Send a message: the optimistic entry lands in the log at once,
    /// and the REST ack promotes it in place (unless the broadcast got
    /// there first). On failure the entry is removed, never retried.
    pub async fn send_message(
        &mut self,
        room: Uuid,
        kind: MessageType,
        content: MessageContent,
        reply_to: Option<Uuid>,
        mentions: Vec<Uuid>,
    ) -> Result<MessageId, SessionError> {
        if !self.store.is_tracked(room) {
            return Err(SessionError::NotWatching { room });
        }
        if !content.is_complete_for(kind) {
            return Err(SessionError::EmptyMessage);
        }

        let optimistic = Message::new_optimistic(
            room,
            self.local.sender(),
            kind,
            content.clone(),
            reply_to.map(MessageId::Server),
            mentions.clone(),
            Utc::now(),
        );
        let temp_id = optimistic.id.clone();
        self.store.append_optimistic(optimistic);
        self.push(SessionUpdate::MessagesChanged { room });
        if let Some(stop) = self.typing.stop_local(room) {
            let _ = self.transport.emit(stop);
        }

        let body = CreateMessage {
            message_type: kind,
            content,
            reply_to,
            mentions,
            temp_id: temp_id.clone(),
        };
        match self.api.create_message(room, &body).await {
            Ok(confirmed) => {
                let id = confirmed.id.clone();
                let summary = confirmed.clone();
                if self.store.reconcile_send(room, &temp_id, confirmed) {
                    self.push(SessionUpdate::MessagesChanged { room });
                }
                self.directory.note_message(&summary, true);
                self.push(SessionUpdate::RoomsChanged);
                Ok(id)
            }
            Err(e) => {
                if self.store.rollback_send(room, &temp_id) {
                    self.push(SessionUpdate::MessagesChanged { room });
                }
                self.push(SessionUpdate::MessageFailed {
                    room,
                    temp_id,
                    reason: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Mark everything unread in a room as read: the unread badge
    /// clears immediately and is restored if the server call fails.
    pub async fn mark_read(&mut self, room: Uuid) -> Result<u32, SessionError> {
        if !self.directory.contains(room) {
            return Err(SessionError::NotAMember { room });
        }
        let unread: Vec<Uuid> = self
            .store
            .unread_ids(room)
            .into_iter()
            .filter_map(|id| match id {
                MessageId::Server(id) => Some(id),
                MessageId::Temp(_) => None,
            })
            .collect();
        let now = Utc::now();
        let prior = self.directory.mark_seen(room, now).unwrap_or(0);
        if unread.is_empty() && prior == 0 {
            return Ok(0);
        }

        if let Err(e) = self.api.mark_read(room, &unread).await {
            self.directory.set_unread(room, prior);
            return Err(e.into());
        }
        for id in &unread {
            self.store.apply_read(&MessageId::Server(*id), self.local.id, now);
            let _ = self.transport.emit(ClientEvent::MarkMessageRead {
                message_id: *id,
                community_id: room,
            });
        }
        if !unread.is_empty() {
            self.push(SessionUpdate::MessagesChanged { room });
        }
        self.push(SessionUpdate::RoomsChanged);
        Ok(unread.len() as u32)
    }

    /// Toggle the local user's reaction. The toggle applies locally
    /// and is announced over the socket; the authoritative list comes
    /// back in a `message_reaction` broadcast. Offline, the toggle is
    /// undone and an error returned.
    pub fn react(
        &mut self,
        message_id: &MessageId,
        emoji: &str,
    ) -> Result<ToggleAction, SessionError> {
        let MessageId::Server(raw) = message_id else {
            return Err(SessionError::PendingMessage);
        };
        let Some((room, action)) = self.store.toggle_reaction(message_id, self.local.id, emoji)
        else {
            return Err(SessionError::UnknownMessage);
        };
        if let Err(e) = self.transport.emit(ClientEvent::AddReaction {
            message_id: *raw,
            emoji: emoji.to_string(),
        }) {
            self.store.toggle_reaction(message_id, self.local.id, emoji);
            return Err(SessionError::Transport(e));
        }
        self.push(SessionUpdate::MessagesChanged { room });
        Ok(action)
    }

    /// Replace a text message's body via the server, then fold the
    /// confirmed copy back into the log.
    pub async fn edit_message(&mut self, message_id: Uuid, text: &str) -> Result<(), SessionError> {
        let edited = self.api.edit_message(message_id, text).await?;
        let room = edited.community_id;
        if self.store.apply_edit(edited) {
            self.push(SessionUpdate::MessagesChanged { room });
        }
        Ok(())
    }

    /// Delete a message: for the caller only, or tombstoned for
    /// everyone.
    pub async fn delete_message(
        &mut self,
        message_id: Uuid,
        scope: DeleteScope,
    ) -> Result<(), SessionError> {
        self.api.delete_message(message_id, scope).await?;
        let id = MessageId::Server(message_id);
        let touched = match scope {
            DeleteScope::Me => self.store.remove_message(&id),
            DeleteScope::Everyone => self.store.apply_tombstone(&id),
        };
        if let Some(room) = touched {
            self.push(SessionUpdate::MessagesChanged { room });
        }
        Ok(())
    }

    // ── Typing ──────────────────────────────────────────────────────

    /// Record local keystrokes; announces `typing_start` on the first
    /// one of a run. Idle runs stop automatically via `next_update`.
    pub fn typing_input(&mut self, room: Uuid) {
        if let Some(start) = self.typing.on_local_input(room) {
            let _ = self.transport.emit(start);
        }
    }

    pub fn stop_typing(&mut self, room: Uuid) {
        if let Some(stop) = self.typing.stop_local(room) {
            let _ = self.transport.emit(stop);
        }
    }

    pub fn typing_users(&self, room: Uuid) -> Vec<(Uuid, &str)> {
        self.typing.typing_users(room)
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Rooms ordered by most recent activity.
    pub fn rooms(&self) -> Vec<&RoomEntry> {
        self.directory.rooms()
    }

    pub fn room(&self, room: Uuid) -> Option<&RoomEntry> {
        self.directory.get(room)
    }

    pub fn messages(&self, room: Uuid) -> &[Message] {
        self.store.messages(room)
    }

    /// Messages bucketed by day for rendering.
    pub fn timeline(&self, room: Uuid) -> Vec<DayBucket<'_>> {
        view::day_buckets(self.store.messages(room))
    }

    /// Messages grouped into consecutive same-sender runs.
    pub fn grouped(&self, room: Uuid) -> Vec<MessageGroup<'_>> {
        view::group_messages(self.store.messages(room), self.view.grouping_window)
    }

    pub fn room_presence(&self, room: Uuid) -> Vec<&PresenceEntry> {
        self.presence.room_online(room)
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.presence.is_online(user_id)
    }

    pub fn unread(&self, room: Uuid) -> u32 {
        self.directory.unread(room)
    }

    pub fn total_unread(&self) -> u64 {
        self.directory.total_unread()
    }

    pub fn local_user(&self) -> &LocalUser {
        &self.local
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.transport.state().await
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            store: self.store.stats(),
            transport: self.transport.stats(),
        }
    }
}
