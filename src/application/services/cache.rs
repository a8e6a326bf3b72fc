use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::models::{Message, MessageId};

pub const SENT_MESSAGES_KEY: &str = "sent_messages";
pub const MESSAGE_DETAIL_PREFIX: &str = "message_detail:";
/// Newest sent messages kept in the recency index.
pub const SENT_INDEX_CAPACITY: i64 = 1000;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("cache serialization failed: {0}")]
    Serialization(String),
}

/// Key/value and sorted-set primitives of a best-effort cache.
///
/// Nothing stored here is authoritative; callers fall back to the repository
/// on a miss or an error.
#[async_trait]
pub trait CacheService: Send + Sync {
    /// `ttl` of `None` uses the adapter's default expiry.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), CacheError>;
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    async fn zadd(
        &self,
        key: &str,
        score: f64,
        member: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>;
    /// Members by descending score, `start..=stop` ranks inclusive; negative
    /// ranks count from the end.
    async fn zrevrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, CacheError>;
    async fn zrem(&self, key: &str, members: &[String]) -> Result<(), CacheError>;
    async fn zcard(&self, key: &str) -> Result<u64, CacheError>;
    /// Removes members by ascending rank, `start..=stop` inclusive.
    async fn zremrangebyrank(&self, key: &str, start: i64, stop: i64) -> Result<(), CacheError>;

    async fn is_healthy(&self) -> Result<(), CacheError>;
}

impl dyn CacheService {
    pub async fn set_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let payload =
            serde_json::to_string(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.set(key, payload, ttl).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.get(key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| CacheError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessageCacheData {
    pub message_id: MessageId,
    pub external_id: String,
    pub phone_number: String,
    pub content: String,
    #[serde(default)]
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub sent_at: DateTime<Utc>,
}

/// Recency index of delivered messages on top of a [`CacheService`].
#[derive(Clone)]
pub struct SentMessageCache {
    cache: Arc<dyn CacheService>,
    ttl: Duration,
}

impl SentMessageCache {
    pub fn new(cache: Arc<dyn CacheService>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    pub fn cache(&self) -> &Arc<dyn CacheService> {
        &self.cache
    }

    /// Mirrors a sent message into the cache. Failures are logged and
    /// swallowed.
    pub async fn record(&self, message: &Message) {
        let (Some(external_id), Some(sent_at)) = (message.external_id(), message.sent_at()) else {
            return;
        };

        let data = SentMessageCacheData {
            message_id: message.id(),
            external_id: external_id.to_string(),
            phone_number: message.recipient().to_string(),
            content: message.content().to_string(),
            retry_count: message.retry_count(),
            created_at: message.created_at(),
            sent_at,
        };

        if let Err(err) = self.write(&data).await {
            warn!(message_id = %message.id(), error = %err, "failed to cache sent message");
        } else {
            debug!(message_id = %message.id(), "cached sent message");
        }
    }

    async fn write(&self, data: &SentMessageCacheData) -> Result<(), CacheError> {
        let detail_key = format!("{MESSAGE_DETAIL_PREFIX}{}", data.message_id);
        self.cache.set_json(&detail_key, data, Some(self.ttl)).await?;
        self.cache
            .zadd(
                SENT_MESSAGES_KEY,
                data.sent_at.timestamp_millis() as f64,
                &data.message_id.to_string(),
                Some(self.ttl),
            )
            .await?;
        // keep only the newest entries
        self.cache
            .zremrangebyrank(SENT_MESSAGES_KEY, 0, -(SENT_INDEX_CAPACITY + 1))
            .await
    }

    /// Newest `limit` sent messages. Index members whose detail entry has
    /// expired or cannot be decoded are skipped.
    pub async fn recent(&self, limit: usize) -> Result<Vec<SentMessageCacheData>, CacheError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let members = self
            .cache
            .zrevrange(SENT_MESSAGES_KEY, 0, limit as i64 - 1)
            .await?;

        let mut entries = Vec::with_capacity(members.len());
        for member in members {
            let key = format!("{MESSAGE_DETAIL_PREFIX}{member}");
            match self.cache.get_json::<SentMessageCacheData>(&key).await {
                Ok(Some(data)) => entries.push(data),
                Ok(None) => debug!(message_id = %member, "sent message detail missing from cache"),
                Err(err) => debug!(message_id = %member, error = %err, "skipping cached entry"),
            }
        }
        Ok(entries)
    }
}
