use async_trait::async_trait;

use crate::domain::{
    errors::DomainResult,
    models::{Message, MessageId, MessageStatus},
    value_objects::PhoneNumber,
};

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
}

impl Pagination {
    /// Out-of-range limits fall back to the default page size.
    pub fn new(limit: u32, offset: u32) -> Self {
        let limit = if limit == 0 || limit > MAX_PAGE_SIZE {
            DEFAULT_PAGE_SIZE
        } else {
            limit
        };
        Self { limit, offset }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

/// Storage-backed message queue.
///
/// `get_pending_messages` is the only cross-instance coordination point:
/// implementations must never hand the same row to two concurrent callers.
/// Rows returned by it stay claimed until they are written back with
/// `update` (or until the implementation's claim lease expires).
#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn create(&self, message: &Message) -> DomainResult<()>;

    async fn get_by_id(&self, id: MessageId) -> DomainResult<Message>;

    /// Claims up to `limit` pending messages, oldest first.
    async fn get_pending_messages(&self, limit: usize) -> DomainResult<Vec<Message>>;

    /// Replaces the mutable fields of an existing message and releases its
    /// claim. Fails with `NotFound` if the row no longer exists.
    async fn update(&self, message: &Message) -> DomainResult<()>;

    /// Newest first.
    async fn get_by_status(
        &self,
        status: MessageStatus,
        pagination: Pagination,
    ) -> DomainResult<Vec<Message>>;

    async fn get_by_phone_number(
        &self,
        phone_number: &PhoneNumber,
        pagination: Pagination,
    ) -> DomainResult<Vec<Message>>;

    async fn count_by_status(&self, status: MessageStatus) -> DomainResult<u64>;

    /// Administrative and test use only.
    async fn delete_by_id(&self, id: MessageId) -> DomainResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_falls_back_to_defaults() {
        assert_eq!(Pagination::new(0, 5), Pagination { limit: 50, offset: 5 });
        assert_eq!(Pagination::new(101, 0).limit, 50);
        assert_eq!(Pagination::new(100, 0).limit, 100);
    }
}
