//! Authenticated REST client for the chat API.
//!
//! The socket carries live traffic; durable operations go through
//! these endpoints. History is paged backward with `before` cursors,
//! sends are acknowledged with the confirmed message, and read state
//! is batched per room.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::directory::RoomEntry;
use crate::model::{Message, MessageContent, MessageId, MessageType};

/// REST client configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL, e.g. `http://localhost:4000`.
    pub base_url: String,
    /// Bearer token attached to every request.
    pub token: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Messages per history page.
    pub page_size: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            base_url: "http://localhost:4000".to_string(),
            token: String::new(),
            request_timeout: Duration::from_secs(5),
            page_size: 50,
        }
    }
}

impl ApiConfig {
    /// Short timeouts and small pages for tests.
    pub fn for_testing(base_url: &str) -> Self {
        ApiConfig {
            base_url: base_url.to_string(),
            token: "test-token".to_string(),
            request_timeout: Duration::from_millis(500),
            page_size: 10,
        }
    }
}

/// One fetched page of history, oldest first, plus whether older
/// pages remain.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub messages: Vec<Message>,
    pub has_next: bool,
}

/// Wire shape of the history endpoint.
#[derive(Debug, Deserialize)]
struct HistoryEnvelope {
    messages: Vec<Message>,
    pagination: PageInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next: bool,
}

/// Body of a message create request. The payload travels under a
/// nested `content` object, the same shape the server stores and
/// echoes back in the confirmed message.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessage {
    pub message_type: MessageType,
    pub content: MessageContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Uuid>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mentions: Vec<Uuid>,
    /// Client-generated id echoed back in the broadcast so every
    /// client can reconcile the optimistic entry.
    pub temp_id: MessageId,
}

/// Scope of a message deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteScope {
    /// Hide for the requesting user only.
    Me,
    /// Tombstone for everyone (sender or admin).
    Everyone,
}

impl DeleteScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeleteScope::Me => "me",
            DeleteScope::Everyone => "everyone",
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MarkReadBody<'a> {
    message_ids: &'a [Uuid],
}

#[derive(Debug, Serialize)]
struct EditBody<'a> {
    content: EditContent<'a>,
}

#[derive(Debug, Serialize)]
struct EditContent<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteBody {
    delete_for: &'static str,
}

/// Error body most endpoints return on failure.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// REST request failure.
#[derive(Debug)]
pub enum ApiError {
    /// Connection-level failure.
    Network(String),
    /// The request deadline elapsed.
    Timeout,
    /// The server answered with an error status.
    Status { status: u16, message: String },
    /// The response body did not match the expected shape.
    Decode(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Network(e) => write!(f, "network error: {e}"),
            ApiError::Timeout => write!(f, "request timed out"),
            ApiError::Status { status, message } => {
                write!(f, "server returned {status}: {message}")
            }
            ApiError::Decode(e) => write!(f, "malformed response: {e}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout
        } else if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Network(e.to_string())
        }
    }
}

/// Thin typed wrapper over the HTTP API.
pub struct ApiClient {
    config: ApiConfig,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(ApiClient { config, http })
    }

    pub fn page_size(&self) -> u32 {
        self.config.page_size
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Turn a non-success response into `ApiError::Status`, preferring
    /// the server's own error message over the status text.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.message,
            Err(_) => status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string(),
        };
        Err(ApiError::Status {
            status: status.as_u16(),
            message,
        })
    }

    /// All rooms the user belongs to, with membership state.
    pub async fn my_rooms(&self) -> Result<Vec<RoomEntry>, ApiError> {
        let response = self
            .http
            .get(self.url("/api/communities/my-communities"))
            .bearer_auth(&self.config.token)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// One page of a room's history. `before` pages backward; `None`
    /// fetches the newest page.
    pub async fn fetch_messages(
        &self,
        room: Uuid,
        before: Option<DateTime<Utc>>,
    ) -> Result<HistoryPage, ApiError> {
        let mut request = self
            .http
            .get(self.url(&format!("/api/messages/{room}")))
            .bearer_auth(&self.config.token)
            .query(&[("limit", self.config.page_size.to_string())]);
        if let Some(cursor) = before {
            request = request.query(&[("before", cursor.to_rfc3339())]);
        }
        let envelope: HistoryEnvelope = Self::check(request.send().await?).await?.json().await?;
        Ok(HistoryPage {
            messages: envelope.messages,
            has_next: envelope.pagination.has_next,
        })
    }

    /// Create a message; the response is the server-confirmed copy.
    pub async fn create_message(
        &self,
        room: Uuid,
        body: &CreateMessage,
    ) -> Result<Message, ApiError> {
        let response = self
            .http
            .post(self.url(&format!("/api/messages/{room}")))
            .bearer_auth(&self.config.token)
            .json(body)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Record the given messages as read by the caller.
    pub async fn mark_read(&self, room: Uuid, message_ids: &[Uuid]) -> Result<(), ApiError> {
        let response = self
            .http
            .put(self.url(&format!("/api/messages/{room}/mark-read")))
            .bearer_auth(&self.config.token)
            .json(&MarkReadBody { message_ids })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Replace a text message's body. Sender-only on the server.
    pub async fn edit_message(&self, message_id: Uuid, text: &str) -> Result<Message, ApiError> {
        let response = self
            .http
            .put(self.url(&format!("/api/messages/{message_id}")))
            .bearer_auth(&self.config.token)
            .json(&EditBody {
                content: EditContent { text },
            })
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Delete a message for the caller or for everyone.
    pub async fn delete_message(
        &self,
        message_id: Uuid,
        scope: DeleteScope,
    ) -> Result<(), ApiError> {
        let response = self
            .http
            .delete(self.url(&format!("/api/messages/{message_id}")))
            .bearer_auth(&self.config.token)
            .json(&DeleteBody {
                delete_for: scope.as_str(),
            })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn join_room(&self, room: Uuid) -> Result<(), ApiError> {
        let response = self
            .http
            .post(self.url(&format!("/api/communities/{room}/join")))
            .bearer_auth(&self.config.token)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn leave_room(&self, room: Uuid) -> Result<(), ApiError> {
        let response = self
            .http
            .delete(self.url(&format!("/api/communities/{room}/leave")))
            .bearer_auth(&self.config.token)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
