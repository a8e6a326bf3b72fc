pub mod message_management;
pub mod message_processing;

pub use message_management::{
    CreateMessageCommand, ListMessagesQuery, MessageListing, MessageManagementUseCase, MessageView,
};
pub use message_processing::{
    MessageProcessingConfig, MessageProcessingUseCase, PendingMessageProcessor, ProcessingResult,
    ProcessingStatus,
};
