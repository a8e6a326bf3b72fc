pub mod message;

pub use message::{
    ClaimToken, DEFAULT_MAX_RETRY_ATTEMPTS, Message, MessageError, MessageId, MessageSnapshot, MessageStatus,
};
