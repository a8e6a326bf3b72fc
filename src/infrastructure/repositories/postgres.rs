use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Pool, Postgres};
use uuid::Uuid;

use crate::domain::{
    errors::{DomainError, DomainResult},
    models::{ClaimToken, Message, MessageError, MessageId, MessageSnapshot, MessageStatus},
    repositories::{MessageRepository, Pagination},
    value_objects::{Content, PhoneNumber},
};

pub type PgPool = Pool<Postgres>;

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_CLAIM_LEASE: Duration = Duration::from_secs(1_800);

const MESSAGE_COLUMNS: &str = "id, phone_number, content, status, external_id, retry_count, \
                               created_at, updated_at, sent_at";

#[derive(Clone)]
pub struct PostgresMessageRepository {
    pool: PgPool,
    query_timeout: Duration,
    claim_lease: Duration,
}

impl PostgresMessageRepository {
    pub fn new(pool: PgPool) -> Arc<Self> {
        Self::with_limits(pool, DEFAULT_QUERY_TIMEOUT, DEFAULT_CLAIM_LEASE)
    }

    pub fn with_limits(pool: PgPool, query_timeout: Duration, claim_lease: Duration) -> Arc<Self> {
        Arc::new(Self {
            pool,
            query_timeout,
            claim_lease,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn with_deadline<T, F>(&self, operation: &str, query: F) -> DomainResult<T>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.query_timeout, query).await {
            Ok(result) => result.map_err(|e| storage_error(operation, e)),
            Err(_) => Err(DomainError::repository(format!(
                "{operation}: query timed out after {}ms",
                self.query_timeout.as_millis()
            ))),
        }
    }

    async fn claim(&self, limit: i64, token: ClaimToken) -> Result<Vec<MessageRecord>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM messages
            WHERE status = 'PENDING'
              AND (locked_until IS NULL OR locked_until <= NOW())
            ORDER BY created_at ASC, id ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        if ids.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }

        let mut records = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            UPDATE messages
            SET locked_until = NOW() + make_interval(secs => $2),
                claim_token = $3
            WHERE id = ANY($1)
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(&ids)
        .bind(self.claim_lease.as_secs_f64())
        .bind(token.as_uuid())
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        // RETURNING does not keep the SELECT order
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }
}

#[async_trait]
impl MessageRepository for PostgresMessageRepository {
    async fn create(&self, message: &Message) -> DomainResult<()> {
        let query = sqlx::query(
            r#"
            INSERT INTO messages (
                id, phone_number, content, status, external_id, retry_count,
                created_at, updated_at, sent_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(message.id().as_uuid())
        .bind(message.recipient().as_str())
        .bind(message.content().as_str())
        .bind(message.status().as_str())
        .bind(message.external_id())
        .bind(message.retry_count() as i32)
        .bind(message.created_at())
        .bind(message.updated_at())
        .bind(message.sent_at())
        .execute(&self.pool);

        self.with_deadline("failed to create message", query).await?;
        Ok(())
    }

    async fn get_by_id(&self, id: MessageId) -> DomainResult<Message> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1");
        let query = sqlx::query_as::<_, MessageRecord>(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool);

        self.with_deadline("failed to get message", query)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("message {id} not found")))?
            .try_into()
    }

    async fn get_pending_messages(&self, limit: usize) -> DomainResult<Vec<Message>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let token = ClaimToken::new();
        self.with_deadline("failed to claim pending messages", self.claim(limit, token))
            .await?
            .into_iter()
            .map(|record| Message::try_from(record).map(|message| message.claimed(token)))
            .collect()
    }

    async fn update(&self, message: &Message) -> DomainResult<()> {
        let query = sqlx::query(
            r#"
            UPDATE messages
            SET status = $2,
                external_id = $3,
                retry_count = $4,
                updated_at = $5,
                sent_at = $6,
                locked_until = NULL,
                claim_token = NULL
            WHERE id = $1
              AND status <> 'SENT'
              AND (
                claim_token = $7::uuid
                OR ($7::uuid IS NULL AND (claim_token IS NULL OR locked_until <= NOW()))
              )
            "#,
        )
        .bind(message.id().as_uuid())
        .bind(message.status().as_str())
        .bind(message.external_id())
        .bind(message.retry_count() as i32)
        .bind(message.updated_at())
        .bind(message.sent_at())
        .bind(message.claim_token().map(|token| token.as_uuid()))
        .execute(&self.pool);

        let result = self.with_deadline("failed to update message", query).await?;
        if result.rows_affected() > 0 {
            return Ok(());
        }

        let exists = sqlx::query_scalar::<_, bool>(r#"SELECT EXISTS(SELECT 1 FROM messages WHERE id = $1)"#)
            .bind(message.id().as_uuid())
            .fetch_one(&self.pool);
        if self.with_deadline("failed to update message", exists).await? {
            Err(DomainError::conflict(format!(
                "message {} is sent or claimed by another worker",
                message.id()
            )))
        } else {
            Err(DomainError::not_found(format!("message {} not found", message.id())))
        }
    }

    async fn get_by_status(
        &self,
        status: MessageStatus,
        pagination: Pagination,
    ) -> DomainResult<Vec<Message>> {
        let sql = format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages
            WHERE status = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#
        );
        let query = sqlx::query_as::<_, MessageRecord>(&sql)
            .bind(status.as_str())
            .bind(i64::from(pagination.limit))
            .bind(i64::from(pagination.offset))
            .fetch_all(&self.pool);

        self.with_deadline("failed to list messages by status", query)
            .await?
            .into_iter()
            .map(Message::try_from)
            .collect()
    }

    async fn get_by_phone_number(
        &self,
        phone_number: &PhoneNumber,
        pagination: Pagination,
    ) -> DomainResult<Vec<Message>> {
        let sql = format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages
            WHERE phone_number = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#
        );
        let query = sqlx::query_as::<_, MessageRecord>(&sql)
            .bind(phone_number.as_str())
            .bind(i64::from(pagination.limit))
            .bind(i64::from(pagination.offset))
            .fetch_all(&self.pool);

        self.with_deadline("failed to list messages by phone number", query)
            .await?
            .into_iter()
            .map(Message::try_from)
            .collect()
    }

    async fn count_by_status(&self, status: MessageStatus) -> DomainResult<u64> {
        let query = sqlx::query_scalar::<_, i64>(r#"SELECT COUNT(*) FROM messages WHERE status = $1"#)
            .bind(status.as_str())
            .fetch_one(&self.pool);

        let count = self.with_deadline("failed to count messages", query).await?;
        Ok(count.max(0) as u64)
    }

    async fn delete_by_id(&self, id: MessageId) -> DomainResult<()> {
        let query = sqlx::query(r#"DELETE FROM messages WHERE id = $1"#)
            .bind(id.as_uuid())
            .execute(&self.pool);

        let result = self.with_deadline("failed to delete message", query).await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::not_found(format!("message {id} not found")));
        }
        Ok(())
    }
}

fn storage_error(operation: &str, err: sqlx::Error) -> DomainError {
    DomainError::repository(format!("{operation}: {err}"))
}

#[derive(FromRow)]
struct MessageRecord {
    id: Uuid,
    phone_number: String,
    content: String,
    status: String,
    external_id: Option<String>,
    retry_count: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = DomainError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let corrupt = |e: MessageError| DomainError::repository(format!("corrupt message row {}: {e}", value.id));

        let snapshot = MessageSnapshot {
            id: MessageId::from_uuid(value.id),
            recipient: PhoneNumber::new(value.phone_number.as_str()).map_err(corrupt)?,
            content: Content::new(value.content.as_str()).map_err(corrupt)?,
            status: value.status.parse().map_err(corrupt)?,
            external_id: value.external_id.clone(),
            retry_count: u32::try_from(value.retry_count).unwrap_or(0),
            created_at: value.created_at,
            updated_at: value.updated_at,
            sent_at: value.sent_at,
        };

        Message::restore(snapshot).map_err(corrupt)
    }
}
