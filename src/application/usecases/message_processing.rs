use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    application::services::{
        cache::SentMessageCache,
        webhook::{WebhookError, WebhookRequest, WebhookService},
    },
    domain::{
        errors::{DomainError, DomainResult},
        models::{DEFAULT_MAX_RETRY_ATTEMPTS, Message, MessageError, MessageId, MessageStatus},
        repositories::MessageRepository,
    },
};

pub const DEFAULT_BATCH_SIZE: usize = 2;
pub const MAX_BATCH_SIZE: usize = 10;

/// Batch size actually used for a pass: non-positive requests get the
/// default, everything else is clamped to `1..=MAX_BATCH_SIZE`.
pub fn effective_batch_size(requested: i64) -> usize {
    if requested <= 0 {
        return DEFAULT_BATCH_SIZE;
    }
    usize::try_from(requested)
        .unwrap_or(MAX_BATCH_SIZE)
        .clamp(1, MAX_BATCH_SIZE)
}

#[derive(Debug, Clone)]
pub struct MessageProcessingConfig {
    pub max_retry_attempts: u32,
    /// Used to report when the next scheduled pass is expected.
    pub scheduler_interval: Duration,
}

impl Default for MessageProcessingConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            scheduler_interval: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessingResult {
    pub processed_count: u32,
    pub success_count: u32,
    pub failed_count: u32,
    pub errors: Vec<DomainError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingStatus {
    pub pending_count: u64,
    pub sent_count: u64,
    pub failed_count: u64,
    pub next_processing_at: DateTime<Utc>,
}

/// What the scheduler drives on every tick.
#[async_trait]
pub trait PendingMessageProcessor: Send + Sync {
    async fn process_pending_messages(
        &self,
        batch_size: i64,
        cancel: &CancellationToken,
    ) -> DomainResult<ProcessingResult>;
}

enum Delivery {
    Sent,
    Failed(DomainError),
    Cancelled,
}

pub struct MessageProcessingUseCase {
    repo: Arc<dyn MessageRepository>,
    webhook: Arc<dyn WebhookService>,
    sent_cache: Option<SentMessageCache>,
    config: MessageProcessingConfig,
}

impl MessageProcessingUseCase {
    pub fn new(
        repo: Arc<dyn MessageRepository>,
        webhook: Arc<dyn WebhookService>,
        sent_cache: Option<SentMessageCache>,
        config: MessageProcessingConfig,
    ) -> Self {
        Self {
            repo,
            webhook,
            sent_cache,
            config,
        }
    }

    /// Claims one batch of pending messages and delivers them in order.
    ///
    /// Only the initial fetch can fail the whole call; everything after that
    /// is reported per message in [`ProcessingResult::errors`].
    pub async fn process_pending_messages(
        &self,
        batch_size: i64,
        cancel: &CancellationToken,
    ) -> DomainResult<ProcessingResult> {
        let batch_size = effective_batch_size(batch_size);
        let messages = self
            .repo
            .get_pending_messages(batch_size)
            .await
            .inspect_err(|e| warn!(error = %e, "failed to fetch pending messages"))?;

        let mut result = ProcessingResult::default();
        if messages.is_empty() {
            debug!("no pending messages");
            return Ok(result);
        }

        info!(count = messages.len(), batch_size, "processing pending messages");

        let mut queue = messages.into_iter();
        while let Some(message) = queue.next() {
            if cancel.is_cancelled() {
                self.release(std::iter::once(message).chain(queue)).await;
                break;
            }

            let message = message.with_max_retries(self.config.max_retry_attempts);
            let message_id = message.id();

            match self.deliver(message, cancel).await {
                Delivery::Sent => {
                    result.processed_count += 1;
                    result.success_count += 1;
                }
                Delivery::Failed(err) => {
                    warn!(%message_id, error = %err, "message processing failed");
                    result.processed_count += 1;
                    result.failed_count += 1;
                    result.errors.push(err);
                }
                Delivery::Cancelled => {
                    info!(%message_id, "delivery cancelled, releasing remaining messages");
                    self.release(queue).await;
                    break;
                }
            }
        }

        info!(
            processed = result.processed_count,
            successful = result.success_count,
            failed = result.failed_count,
            "finished processing batch"
        );

        Ok(result)
    }

    async fn deliver(&self, mut message: Message, cancel: &CancellationToken) -> Delivery {
        let message_id = message.id();
        let request = WebhookRequest {
            phone_number: message.recipient().to_string(),
            content: message.content().to_string(),
            message_id: message_id.to_string(),
        };

        let failure = match self.webhook.send_message(request, cancel).await {
            Ok(response) if response.success && !response.external_id.trim().is_empty() => {
                return self.complete(message, &response.external_id).await;
            }
            Ok(response) if response.success => {
                WebhookError::MalformedResponse("successful response without external_id".to_string())
            }
            Ok(response) => WebhookError::Rejected(
                response
                    .error_message
                    .unwrap_or_else(|| "no reason given".to_string()),
            ),
            Err(err) if err.is_cancelled() => {
                self.release(std::iter::once(message)).await;
                return Delivery::Cancelled;
            }
            Err(err) => err,
        };

        if let Err(err) = record_failed_attempt(&mut message) {
            return Delivery::Failed(
                DomainError::from(err).wrap(format!("failed to record attempt for message {message_id}")),
            );
        }

        if let Err(err) = self.repo.update(&message).await {
            return Delivery::Failed(update_error(err, message_id));
        }

        debug!(
            %message_id,
            retry_count = message.retry_count(),
            status = %message.status(),
            "recorded failed delivery"
        );

        Delivery::Failed(DomainError::business(format!(
            "failed to send message {message_id}: {failure}"
        )))
    }

    async fn complete(&self, mut message: Message, external_id: &str) -> Delivery {
        let message_id = message.id();

        if let Err(err) = message.mark_sent(external_id) {
            return Delivery::Failed(
                DomainError::from(err).wrap(format!("failed to mark message {message_id} as sent")),
            );
        }
        if let Err(err) = self.repo.update(&message).await {
            return Delivery::Failed(update_error(err, message_id));
        }

        info!(%message_id, external_id, "message sent");

        if let Some(cache) = &self.sent_cache {
            cache.record(&message).await;
        }
        Delivery::Sent
    }

    /// Writes claimed messages back unchanged so other workers can pick them
    /// up without waiting for the claim lease.
    async fn release(&self, messages: impl IntoIterator<Item = Message>) {
        for message in messages {
            if let Err(err) = self.repo.update(&message).await {
                warn!(message_id = %message.id(), error = %err, "failed to release claimed message");
            }
        }
    }

    /// Counts are all-time totals per status.
    pub async fn get_processing_status(&self) -> DomainResult<ProcessingStatus> {
        let pending_count = self.repo.count_by_status(MessageStatus::Pending).await?;
        let sent_count = self.repo.count_by_status(MessageStatus::Sent).await?;
        let failed_count = self.repo.count_by_status(MessageStatus::Failed).await?;

        let interval = chrono::Duration::from_std(self.config.scheduler_interval)
            .unwrap_or_else(|_| chrono::Duration::zero());

        Ok(ProcessingStatus {
            pending_count,
            sent_count,
            failed_count,
            next_processing_at: Utc::now() + interval,
        })
    }
}

#[async_trait]
impl PendingMessageProcessor for MessageProcessingUseCase {
    async fn process_pending_messages(
        &self,
        batch_size: i64,
        cancel: &CancellationToken,
    ) -> DomainResult<ProcessingResult> {
        MessageProcessingUseCase::process_pending_messages(self, batch_size, cancel).await
    }
}

/// Conflicts are reported as they are: the claim was lost and the outcome of
/// this attempt was discarded.
fn update_error(err: DomainError, message_id: MessageId) -> DomainError {
    if err.is_conflict() {
        warn!(%message_id, error = %err, "claim lost before outcome was stored");
        err
    } else {
        err.wrap(format!("failed to update message {message_id}"))
    }
}

/// Counts one failed attempt. A message whose retry budget is used up ends
/// in `FAILED`.
fn record_failed_attempt(message: &mut Message) -> Result<(), MessageError> {
    match message.increment_retry() {
        Ok(()) if message.can_retry() => Ok(()),
        Ok(()) | Err(MessageError::MaxRetriesExceeded { .. }) => message.mark_failed(),
        Err(err) => Err(err),
    }
}
