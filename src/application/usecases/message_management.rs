use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::{
    application::services::cache::{SentMessageCache, SentMessageCacheData},
    domain::{
        errors::{DomainError, DomainResult},
        models::{Message, MessageId, MessageStatus},
        repositories::{MessageRepository, Pagination},
        value_objects::{Content, PhoneNumber},
    },
};

pub const DEFAULT_LIST_LIMIT: i64 = 20;
pub const MAX_LIST_LIMIT: i64 = 100;
/// Largest first page of sent messages answered from the cache.
pub const CACHED_LIST_LIMIT: i64 = 10;

pub struct CreateMessageCommand {
    pub phone_number: String,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct ListMessagesQuery {
    pub status: Option<MessageStatus>,
    pub limit: i64,
    pub offset: i64,
}

/// Read model of a message handed to callers of the use cases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageView {
    pub id: MessageId,
    pub phone_number: String,
    pub content: String,
    pub status: MessageStatus,
    pub external_id: Option<String>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl From<&Message> for MessageView {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id(),
            phone_number: message.recipient().to_string(),
            content: message.content().to_string(),
            status: message.status(),
            external_id: message.external_id().map(str::to_string),
            retry_count: message.retry_count(),
            created_at: message.created_at(),
            updated_at: message.updated_at(),
            sent_at: message.sent_at(),
        }
    }
}

impl From<SentMessageCacheData> for MessageView {
    fn from(data: SentMessageCacheData) -> Self {
        Self {
            id: data.message_id,
            phone_number: data.phone_number,
            content: data.content,
            status: MessageStatus::Sent,
            external_id: Some(data.external_id),
            retry_count: data.retry_count,
            created_at: data.created_at,
            updated_at: data.sent_at,
            sent_at: Some(data.sent_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageListing {
    pub messages: Vec<MessageView>,
    pub total_count: u64,
    pub has_more: bool,
}

pub struct MessageManagementUseCase {
    repo: Arc<dyn MessageRepository>,
    sent_cache: Option<SentMessageCache>,
}

impl MessageManagementUseCase {
    pub fn new(repo: Arc<dyn MessageRepository>, sent_cache: Option<SentMessageCache>) -> Self {
        Self { repo, sent_cache }
    }

    pub async fn create_message(&self, command: CreateMessageCommand) -> DomainResult<MessageView> {
        if command.phone_number.trim().is_empty() {
            return Err(DomainError::validation("phone number is required"));
        }
        if command.content.trim().is_empty() {
            return Err(DomainError::validation("message content is required"));
        }

        let phone_number = PhoneNumber::new(command.phone_number)?;
        let content = Content::new(command.content)?;
        let message = Message::new(phone_number, content);

        self.repo.create(&message).await?;
        info!(message_id = %message.id(), "message created");

        Ok(MessageView::from(&message))
    }

    pub async fn get_message_by_id(&self, id: &str) -> DomainResult<MessageView> {
        let id: MessageId = id.trim().parse()?;
        if id.as_uuid().is_nil() {
            return Err(DomainError::validation("message ID cannot be empty"));
        }

        let message = self.repo.get_by_id(id).await?;
        Ok(MessageView::from(&message))
    }

    /// Lists messages newest first. Without a status filter, pending messages
    /// are listed.
    pub async fn list_messages(&self, query: ListMessagesQuery) -> DomainResult<MessageListing> {
        if query.offset < 0 {
            return Err(DomainError::validation("offset cannot be negative"));
        }
        let limit = if query.limit <= 0 || query.limit > MAX_LIST_LIMIT {
            DEFAULT_LIST_LIMIT
        } else {
            query.limit
        };
        let offset = u32::try_from(query.offset)
            .map_err(|_| DomainError::validation("offset is too large"))?;
        let status = query.status.unwrap_or(MessageStatus::Pending);

        if query.status == Some(MessageStatus::Sent) && limit <= CACHED_LIST_LIMIT && offset == 0 {
            if let Some(listing) = self.recent_sent_from_cache(limit as usize).await? {
                return Ok(listing);
            }
        }

        let messages = self
            .repo
            .get_by_status(status, Pagination::new(limit as u32, offset))
            .await?;
        let total_count = self.repo.count_by_status(status).await?;
        let has_more = u64::from(offset) + (messages.len() as u64) < total_count;

        Ok(MessageListing {
            messages: messages.iter().map(MessageView::from).collect(),
            total_count,
            has_more,
        })
    }

    /// `None` on a cache miss or cache error so the caller falls back to the
    /// repository.
    async fn recent_sent_from_cache(&self, limit: usize) -> DomainResult<Option<MessageListing>> {
        let Some(cache) = &self.sent_cache else {
            return Ok(None);
        };

        let entries = match cache.recent(limit).await {
            Ok(entries) if !entries.is_empty() => entries,
            Ok(_) => return Ok(None),
            Err(err) => {
                debug!(error = %err, "sent message cache unavailable, using repository");
                return Ok(None);
            }
        };

        let total_count = self.repo.count_by_status(MessageStatus::Sent).await?;
        let has_more = (entries.len() as u64) < total_count;
        debug!(count = entries.len(), "served sent messages from cache");

        Ok(Some(MessageListing {
            messages: entries.into_iter().map(MessageView::from).collect(),
            total_count,
            has_more,
        }))
    }
}
