use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::{sync::RwLock, time::Instant};

use crate::domain::{
    errors::{DomainError, DomainResult},
    models::{ClaimToken, Message, MessageId, MessageStatus},
    repositories::{MessageRepository, Pagination},
    value_objects::PhoneNumber,
};

pub const DEFAULT_CLAIM_LEASE: Duration = Duration::from_secs(1_800);

struct StoredMessage {
    message: Message,
    claimed_until: Option<Instant>,
    claim: Option<ClaimToken>,
}

impl StoredMessage {
    fn is_claimable(&self, now: Instant) -> bool {
        self.message.status() == MessageStatus::Pending
            && self.claimed_until.is_none_or(|until| until <= now)
    }

    /// A claimed write must carry the current token. An unclaimed write is
    /// accepted only while no live lease exists.
    fn accepts(&self, message: &Message, now: Instant) -> bool {
        if self.message.status() == MessageStatus::Sent {
            return false;
        }
        match message.claim_token() {
            Some(token) => self.claim == Some(token),
            None => self.claim.is_none() || self.claimed_until.is_none_or(|until| until <= now),
        }
    }
}

/// Process-local repository. Claims are taken under the write lock so two
/// concurrent `get_pending_messages` calls never return the same message.
pub struct InMemoryMessageRepository {
    messages: Arc<RwLock<HashMap<MessageId, StoredMessage>>>,
    claim_lease: Duration,
}

impl Default for InMemoryMessageRepository {
    fn default() -> Self {
        Self::with_claim_lease(DEFAULT_CLAIM_LEASE)
    }
}

impl InMemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_claim_lease(claim_lease: Duration) -> Self {
        Self {
            messages: Arc::new(RwLock::new(HashMap::new())),
            claim_lease,
        }
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}

fn page(mut messages: Vec<Message>, pagination: Pagination) -> Vec<Message> {
    messages.sort_by(|a, b| b.created_at().cmp(&a.created_at()).then(b.id().cmp(&a.id())));
    messages
        .into_iter()
        .skip(pagination.offset as usize)
        .take(pagination.limit as usize)
        .collect()
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn create(&self, message: &Message) -> DomainResult<()> {
        let mut messages = self.messages.write().await;
        if messages.contains_key(&message.id()) {
            return Err(DomainError::repository(format!(
                "message {} already exists",
                message.id()
            )));
        }
        messages.insert(
            message.id(),
            StoredMessage {
                message: message.clone(),
                claimed_until: None,
                claim: None,
            },
        );
        Ok(())
    }

    async fn get_by_id(&self, id: MessageId) -> DomainResult<Message> {
        let messages = self.messages.read().await;
        messages
            .get(&id)
            .map(|stored| stored.message.clone())
            .ok_or_else(|| DomainError::not_found(format!("message {id} not found")))
    }

    async fn get_pending_messages(&self, limit: usize) -> DomainResult<Vec<Message>> {
        let now = Instant::now();
        let mut messages = self.messages.write().await;

        let mut candidates: Vec<&mut StoredMessage> = messages
            .values_mut()
            .filter(|stored| stored.is_claimable(now))
            .collect();
        candidates.sort_by(|a, b| {
            a.message
                .created_at()
                .cmp(&b.message.created_at())
                .then(a.message.id().cmp(&b.message.id()))
        });

        let token = ClaimToken::new();
        Ok(candidates
            .into_iter()
            .take(limit)
            .map(|stored| {
                stored.claimed_until = Some(now + self.claim_lease);
                stored.claim = Some(token);
                stored.message.clone().claimed(token)
            })
            .collect())
    }

    async fn update(&self, message: &Message) -> DomainResult<()> {
        let now = Instant::now();
        let mut messages = self.messages.write().await;
        let stored = messages
            .get_mut(&message.id())
            .ok_or_else(|| DomainError::not_found(format!("message {} not found", message.id())))?;
        if !stored.accepts(message, now) {
            return Err(DomainError::conflict(format!(
                "message {} is {} or claimed by another worker",
                message.id(),
                stored.message.status()
            )));
        }

        stored.message = message.clone().unclaimed();
        stored.claimed_until = None;
        stored.claim = None;
        Ok(())
    }

    async fn get_by_status(
        &self,
        status: MessageStatus,
        pagination: Pagination,
    ) -> DomainResult<Vec<Message>> {
        let messages = self.messages.read().await;
        let matching = messages
            .values()
            .filter(|stored| stored.message.status() == status)
            .map(|stored| stored.message.clone())
            .collect();
        Ok(page(matching, pagination))
    }

    async fn get_by_phone_number(
        &self,
        phone_number: &PhoneNumber,
        pagination: Pagination,
    ) -> DomainResult<Vec<Message>> {
        let messages = self.messages.read().await;
        let matching = messages
            .values()
            .filter(|stored| stored.message.recipient() == phone_number)
            .map(|stored| stored.message.clone())
            .collect();
        Ok(page(matching, pagination))
    }

    async fn count_by_status(&self, status: MessageStatus) -> DomainResult<u64> {
        let messages = self.messages.read().await;
        Ok(messages
            .values()
            .filter(|stored| stored.message.status() == status)
            .count() as u64)
    }

    async fn delete_by_id(&self, id: MessageId) -> DomainResult<()> {
        let mut messages = self.messages.write().await;
        messages
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| DomainError::not_found(format!("message {id} not found")))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    async fn seed(repo: &InMemoryMessageRepository, count: usize) -> Vec<MessageId> {
        let mut ids = Vec::new();
        for i in 0..count {
            let message = Message::create("+905551234567", &format!("message {i}")).unwrap();
            repo.create(&message).await.unwrap();
            ids.push(message.id());
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        ids
    }

    #[tokio::test]
    async fn round_trip_preserves_every_field() {
        let repo = InMemoryMessageRepository::new();
        let mut message = Message::create("+905551234567", "Hello").unwrap();
        repo.create(&message).await.unwrap();
        message.mark_sent("ext-1").unwrap();
        repo.update(&message).await.unwrap();

        assert_eq!(repo.get_by_id(message.id()).await.unwrap(), message);
    }

    #[tokio::test]
    async fn sent_messages_cannot_be_overwritten() {
        let repo = InMemoryMessageRepository::new();
        seed(&repo, 1).await;
        let claimed = repo.get_pending_messages(1).await.unwrap().remove(0);

        let mut sent = claimed.clone();
        sent.mark_sent("ext-1").unwrap();
        repo.update(&sent).await.unwrap();

        let err = repo.update(&claimed).await.unwrap_err();
        assert!(err.is_conflict(), "{err:?}");
        let stored = repo.get_by_id(claimed.id()).await.unwrap();
        assert_eq!(stored.status(), MessageStatus::Sent);
        assert_eq!(stored.external_id(), Some("ext-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_claim_cannot_overwrite_new_holder() {
        let repo = InMemoryMessageRepository::with_claim_lease(Duration::from_secs(60));
        seed(&repo, 1).await;

        let mut stale = repo.get_pending_messages(1).await.unwrap().remove(0);
        tokio::time::advance(Duration::from_secs(61)).await;
        let mut current = repo.get_pending_messages(1).await.unwrap().remove(0);
        assert_ne!(stale.claim_token(), current.claim_token());

        stale.increment_retry().unwrap();
        assert!(repo.update(&stale).await.unwrap_err().is_conflict());

        current.mark_sent("ext-2").unwrap();
        repo.update(&current).await.unwrap();
        assert_eq!(
            repo.get_by_id(current.id()).await.unwrap().status(),
            MessageStatus::Sent
        );
    }

    #[tokio::test]
    async fn unclaimed_write_waits_for_live_claim() {
        let repo = InMemoryMessageRepository::new();
        let ids = seed(&repo, 1).await;
        let claimed = repo.get_pending_messages(1).await.unwrap().remove(0);

        let outsider = repo.get_by_id(ids[0]).await.unwrap();
        assert_eq!(outsider.claim_token(), None);
        assert!(repo.update(&outsider).await.unwrap_err().is_conflict());

        repo.update(&claimed).await.unwrap();
        repo.update(&outsider).await.unwrap();
    }

    #[tokio::test]
    async fn pending_messages_come_oldest_first() {
        let repo = InMemoryMessageRepository::new();
        let ids = seed(&repo, 4).await;

        let claimed: Vec<_> = repo
            .get_pending_messages(3)
            .await
            .unwrap()
            .iter()
            .map(Message::id)
            .collect();
        assert_eq!(claimed, ids[..3]);
    }

    #[tokio::test]
    async fn claimed_messages_are_not_returned_twice() {
        let repo = InMemoryMessageRepository::new();
        seed(&repo, 3).await;

        let first = repo.get_pending_messages(2).await.unwrap();
        let second = repo.get_pending_messages(2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);

        let first_ids: HashSet<_> = first.iter().map(Message::id).collect();
        assert!(!first_ids.contains(&second[0].id()));
    }

    #[tokio::test]
    async fn update_releases_claim() {
        let repo = InMemoryMessageRepository::new();
        seed(&repo, 1).await;

        let claimed = repo.get_pending_messages(1).await.unwrap();
        assert!(repo.get_pending_messages(1).await.unwrap().is_empty());

        repo.update(&claimed[0]).await.unwrap();
        assert_eq!(repo.get_pending_messages(1).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_claims_become_available_again() {
        let repo = InMemoryMessageRepository::with_claim_lease(Duration::from_secs(60));
        seed(&repo, 1).await;

        assert_eq!(repo.get_pending_messages(1).await.unwrap().len(), 1);
        assert!(repo.get_pending_messages(1).await.unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(repo.get_pending_messages(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_of_missing_message_is_not_found() {
        let repo = InMemoryMessageRepository::new();
        let message = Message::create("+905551234567", "Hello").unwrap();
        assert!(repo.update(&message).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn counts_and_lists_by_status() {
        let repo = InMemoryMessageRepository::new();
        seed(&repo, 3).await;
        let mut sent = repo.get_pending_messages(1).await.unwrap().remove(0);
        sent.mark_sent("ext-1").unwrap();
        repo.update(&sent).await.unwrap();

        assert_eq!(repo.count_by_status(MessageStatus::Pending).await.unwrap(), 2);
        assert_eq!(repo.count_by_status(MessageStatus::Sent).await.unwrap(), 1);
        assert_eq!(repo.count_by_status(MessageStatus::Failed).await.unwrap(), 0);

        let pending = repo
            .get_by_status(MessageStatus::Pending, Pagination::new(1, 0))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        let newest_pending = repo
            .get_by_status(MessageStatus::Pending, Pagination::default())
            .await
            .unwrap();
        assert!(newest_pending[0].created_at() >= newest_pending[1].created_at());
    }

    #[tokio::test]
    async fn delete_removes_message() {
        let repo = InMemoryMessageRepository::new();
        let ids = seed(&repo, 1).await;
        repo.delete_by_id(ids[0]).await.unwrap();
        assert!(repo.get_by_id(ids[0]).await.unwrap_err().is_not_found());
        assert!(repo.delete_by_id(ids[0]).await.unwrap_err().is_not_found());
    }
}
