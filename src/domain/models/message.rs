use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::value_objects::{Content, PhoneNumber};

/// Retry cap applied when no other limit is configured.
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("{0}")]
    Validation(String),
    #[error("invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: MessageStatus, to: MessageStatus },
    #[error("cannot retry message in status: {status}")]
    InvalidRetryState { status: MessageStatus },
    #[error("maximum retries exceeded: {retry_count}")]
    MaxRetriesExceeded { retry_count: u32 },
}

impl MessageError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for MessageId {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| MessageError::validation(format!("invalid message id: {s}")))
    }
}

/// Proof that a worker still owns the rows it fetched from the queue. A new
/// token is issued on every claim, so a writer whose lease was taken over no
/// longer matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClaimToken(Uuid);

impl ClaimToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(token: Uuid) -> Self {
        Self(token)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ClaimToken {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageStatus {
    Pending,
    Sent,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "PENDING",
            MessageStatus::Sent => "SENT",
            MessageStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(MessageStatus::Pending),
            "SENT" => Ok(MessageStatus::Sent),
            "FAILED" => Ok(MessageStatus::Failed),
            other => Err(MessageError::validation(format!("invalid message status: {other}"))),
        }
    }
}

/// An outbound message and its delivery state.
///
/// Fields are private so the state machine is the only way to mutate a
/// message: `sent_at` and `external_id` are present exactly when the status is
/// `SENT`, and `retry_count` never passes `max_retries`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    id: MessageId,
    recipient: PhoneNumber,
    content: Content,
    status: MessageStatus,
    external_id: Option<String>,
    retry_count: u32,
    max_retries: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    claim: Option<ClaimToken>,
}

/// Stored representation of a message, used by repositories to rebuild the
/// entity. [`Message::restore`] re-checks every invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSnapshot {
    pub id: MessageId,
    pub recipient: PhoneNumber,
    pub content: Content,
    pub status: MessageStatus,
    pub external_id: Option<String>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(recipient: PhoneNumber, content: Content) -> Self {
        let now = Utc::now();
        Self {
            id: MessageId::new(),
            recipient,
            content,
            status: MessageStatus::Pending,
            external_id: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRY_ATTEMPTS,
            created_at: now,
            updated_at: now,
            sent_at: None,
            claim: None,
        }
    }

    /// Validates raw input and builds a pending message.
    pub fn create(phone_number: &str, content: &str) -> Result<Self, MessageError> {
        Ok(Self::new(PhoneNumber::new(phone_number)?, Content::new(content)?))
    }

    pub fn restore(snapshot: MessageSnapshot) -> Result<Self, MessageError> {
        let sent = snapshot.status == MessageStatus::Sent;
        if sent != snapshot.sent_at.is_some() {
            return Err(MessageError::validation(format!(
                "message {} has status {} but sent_at is {}",
                snapshot.id,
                snapshot.status,
                if snapshot.sent_at.is_some() { "set" } else { "missing" }
            )));
        }
        if sent != snapshot.external_id.is_some() {
            return Err(MessageError::validation(format!(
                "message {} has status {} but external_id is {}",
                snapshot.id,
                snapshot.status,
                if snapshot.external_id.is_some() { "set" } else { "missing" }
            )));
        }

        Ok(Self {
            id: snapshot.id,
            recipient: snapshot.recipient,
            content: snapshot.content,
            status: snapshot.status,
            external_id: snapshot.external_id,
            retry_count: snapshot.retry_count,
            max_retries: DEFAULT_MAX_RETRY_ATTEMPTS.max(snapshot.retry_count),
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
            sent_at: snapshot.sent_at,
            claim: None,
        })
    }

    /// Attaches the claim under which a repository handed out this message.
    pub fn claimed(mut self, token: ClaimToken) -> Self {
        self.claim = Some(token);
        self
    }

    pub fn unclaimed(mut self) -> Self {
        self.claim = None;
        self
    }

    /// Applies a configured retry cap. A stored count above the cap is kept
    /// as the effective cap so the invariant still holds.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(self.retry_count);
        self
    }

    pub fn snapshot(&self) -> MessageSnapshot {
        MessageSnapshot {
            id: self.id,
            recipient: self.recipient.clone(),
            content: self.content.clone(),
            status: self.status,
            external_id: self.external_id.clone(),
            retry_count: self.retry_count,
            created_at: self.created_at,
            updated_at: self.updated_at,
            sent_at: self.sent_at,
        }
    }

    pub fn mark_sent(&mut self, external_id: impl Into<String>) -> Result<(), MessageError> {
        if self.status != MessageStatus::Pending {
            return Err(MessageError::InvalidStatusTransition {
                from: self.status,
                to: MessageStatus::Sent,
            });
        }

        let now = Utc::now();
        self.status = MessageStatus::Sent;
        self.external_id = Some(external_id.into());
        self.sent_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_failed(&mut self) -> Result<(), MessageError> {
        if self.status == MessageStatus::Sent {
            return Err(MessageError::InvalidStatusTransition {
                from: self.status,
                to: MessageStatus::Failed,
            });
        }

        self.status = MessageStatus::Failed;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Records one failed delivery attempt.
    ///
    /// Callers must handle [`MessageError::MaxRetriesExceeded`] by marking the
    /// message failed.
    pub fn increment_retry(&mut self) -> Result<(), MessageError> {
        if !matches!(self.status, MessageStatus::Pending | MessageStatus::Failed) {
            return Err(MessageError::InvalidRetryState { status: self.status });
        }
        if self.retry_count >= self.max_retries {
            return Err(MessageError::MaxRetriesExceeded { retry_count: self.retry_count });
        }

        self.retry_count += 1;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn can_retry(&self) -> bool {
        matches!(self.status, MessageStatus::Pending | MessageStatus::Failed)
            && self.retry_count < self.max_retries
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn recipient(&self) -> &PhoneNumber {
        &self.recipient
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn status(&self) -> MessageStatus {
        self.status
    }

    pub fn external_id(&self) -> Option<&str> {
        self.external_id.as_deref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.sent_at
    }

    pub fn claim_token(&self) -> Option<ClaimToken> {
        self.claim
    }
}
