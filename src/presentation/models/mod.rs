use poem_openapi::Enum;

use crate::domain::models::MessageStatus;

#[derive(Enum, Copy, Clone, Debug, Eq, PartialEq)]
pub enum MessageStatusDto {
    #[oai(rename = "PENDING")]
    Pending,
    #[oai(rename = "SENT")]
    Sent,
    #[oai(rename = "FAILED")]
    Failed,
}

impl From<MessageStatusDto> for MessageStatus {
    fn from(value: MessageStatusDto) -> Self {
        match value {
            MessageStatusDto::Pending => MessageStatus::Pending,
            MessageStatusDto::Sent => MessageStatus::Sent,
            MessageStatusDto::Failed => MessageStatus::Failed,
        }
    }
}

impl From<MessageStatus> for MessageStatusDto {
    fn from(value: MessageStatus) -> Self {
        match value {
            MessageStatus::Pending => MessageStatusDto::Pending,
            MessageStatus::Sent => MessageStatusDto::Sent,
            MessageStatus::Failed => MessageStatusDto::Failed,
        }
    }
}
