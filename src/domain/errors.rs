use thiserror::Error;

use crate::domain::models::MessageError;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("business error: {0}")]
    Business(String),
    #[error("repository error: {0}")]
    Repository(String),
    /// The write lost a race: the message is terminal or claimed by another
    /// worker.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn business(message: impl Into<String>) -> Self {
        Self::Business(message.into())
    }

    pub fn repository(message: impl Into<String>) -> Self {
        Self::Repository(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Wraps `self` as the cause of a business failure described by `context`.
    pub fn wrap(self, context: impl std::fmt::Display) -> Self {
        Self::Business(format!("{context}: {self}"))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<MessageError> for DomainError {
    fn from(value: MessageError) -> Self {
        match value {
            MessageError::Validation(reason) => Self::Validation(reason),
            other => Self::Business(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_validation_maps_to_validation() {
        let err: DomainError = MessageError::Validation("bad phone".into()).into();
        assert_eq!(err, DomainError::Validation("bad phone".into()));
    }

    #[test]
    fn state_machine_errors_map_to_business() {
        let err: DomainError = MessageError::MaxRetriesExceeded { retry_count: 3 }.into();
        assert!(matches!(err, DomainError::Business(ref m) if m.contains("maximum retries exceeded")));
    }

    #[test]
    fn wrap_keeps_cause_text() {
        let err = DomainError::repository("connection reset").wrap("failed to process message 42");
        assert_eq!(
            err.to_string(),
            "business error: failed to process message 42: repository error: connection reset"
        );
    }
}
