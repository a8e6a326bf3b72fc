#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use message_dispatcher::{
    application::services::{
        cache::{CacheError, CacheService},
        webhook::{WebhookError, WebhookRequest, WebhookResponse, WebhookService},
    },
    domain::{
        models::{Message, MessageId},
        repositories::MessageRepository,
    },
    infrastructure::repositories::InMemoryMessageRepository,
};
use tokio_util::sync::CancellationToken;

pub const PHONE: &str = "+905551234567";

/// Webhook double answering from a queue of canned outcomes. Once the queue
/// is drained every call succeeds with a generated external id.
#[derive(Default)]
pub struct ScriptedWebhook {
    script: Mutex<VecDeque<Result<WebhookResponse, WebhookError>>>,
    calls: Mutex<Vec<WebhookRequest>>,
    cancel_after: Mutex<Option<usize>>,
}

impl ScriptedWebhook {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_script(
        outcomes: impl IntoIterator<Item = Result<WebhookResponse, WebhookError>>,
    ) -> Arc<Self> {
        let webhook = Self::default();
        webhook.script.lock().unwrap().extend(outcomes);
        Arc::new(webhook)
    }

    /// Calls after the first `calls` block until the token is cancelled.
    pub fn hang_after(self: &Arc<Self>, calls: usize) {
        *self.cancel_after.lock().unwrap() = Some(calls);
    }

    pub fn calls(&self) -> Vec<WebhookRequest> {
        self.calls.lock().unwrap().clone()
    }
}

pub fn accepted(external_id: &str) -> Result<WebhookResponse, WebhookError> {
    Ok(WebhookResponse {
        success: true,
        external_id: external_id.to_string(),
        error_message: None,
    })
}

pub fn unreachable() -> Result<WebhookResponse, WebhookError> {
    Err(WebhookError::RetriesExhausted {
        attempts: 4,
        last: Box::new(WebhookError::Transport("connection refused".into())),
    })
}

#[async_trait]
impl WebhookService for ScriptedWebhook {
    async fn send_message(
        &self,
        request: WebhookRequest,
        cancel: &CancellationToken,
    ) -> Result<WebhookResponse, WebhookError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(request.clone());
            calls.len()
        };

        let hang = matches!(*self.cancel_after.lock().unwrap(), Some(limit) if call > limit);
        if hang {
            cancel.cancelled().await;
            return Err(WebhookError::Cancelled);
        }

        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| accepted(&format!("ext-{}", request.message_id)))
    }

    async fn is_healthy(&self) -> Result<(), WebhookError> {
        Ok(())
    }
}

/// Cache whose every operation fails.
pub struct UnavailableCache;

fn down() -> CacheError {
    CacheError::Unavailable("connection refused".into())
}

#[async_trait]
impl CacheService for UnavailableCache {
    async fn set(&self, _: &str, _: String, _: Option<Duration>) -> Result<(), CacheError> {
        Err(down())
    }
    async fn get(&self, _: &str) -> Result<Option<String>, CacheError> {
        Err(down())
    }
    async fn delete(&self, _: &str) -> Result<(), CacheError> {
        Err(down())
    }
    async fn exists(&self, _: &str) -> Result<bool, CacheError> {
        Err(down())
    }
    async fn zadd(&self, _: &str, _: f64, _: &str, _: Option<Duration>) -> Result<(), CacheError> {
        Err(down())
    }
    async fn zrevrange(&self, _: &str, _: i64, _: i64) -> Result<Vec<String>, CacheError> {
        Err(down())
    }
    async fn zrem(&self, _: &str, _: &[String]) -> Result<(), CacheError> {
        Err(down())
    }
    async fn zcard(&self, _: &str) -> Result<u64, CacheError> {
        Err(down())
    }
    async fn zremrangebyrank(&self, _: &str, _: i64, _: i64) -> Result<(), CacheError> {
        Err(down())
    }
    async fn is_healthy(&self) -> Result<(), CacheError> {
        Err(down())
    }
}

/// Inserts `count` pending messages, oldest first, and returns their ids in
/// creation order.
pub async fn seed_pending(repo: &InMemoryMessageRepository, count: usize) -> Vec<MessageId> {
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let message = Message::create(PHONE, &format!("message {i}")).unwrap();
        repo.create(&message).await.unwrap();
        ids.push(message.id());
        // distinct creation timestamps keep the claim order deterministic
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    ids
}
