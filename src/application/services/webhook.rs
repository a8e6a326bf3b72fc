use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookRequest {
    pub phone_number: String,
    pub content: String,
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub success: bool,
    /// Required when `success` is true; clients reject a blank value.
    #[serde(default)]
    pub external_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Failure of a webhook delivery.
///
/// Whether a failure is worth another attempt is decided by
/// [`WebhookError::is_retryable`], never by the caller inspecting messages.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("webhook URL is not configured")]
    NotConfigured,

    #[error("HTTP request failed: {0}")]
    Transport(String),

    #[error("request timeout after {0}ms")]
    Timeout(u64),

    #[error("webhook returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("failed to parse webhook response: {0}")]
    MalformedResponse(String),

    #[error("webhook rejected message: {0}")]
    Rejected(String),

    #[error("webhook request cancelled")]
    Cancelled,

    #[error("webhook request failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<WebhookError> },
}

impl WebhookError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_)
            | Self::Timeout(_)
            | Self::HttpStatus { .. }
            | Self::MalformedResponse(_) => true,

            Self::NotConfigured
            | Self::Rejected(_)
            | Self::Cancelled
            | Self::RetriesExhausted { .. } => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[async_trait]
pub trait WebhookService: Send + Sync {
    /// Delivers one message, retrying transient failures. Returns
    /// [`WebhookError::Cancelled`] as soon as `cancel` fires.
    async fn send_message(
        &self,
        request: WebhookRequest,
        cancel: &CancellationToken,
    ) -> Result<WebhookResponse, WebhookError>;

    async fn is_healthy(&self) -> Result<(), WebhookError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors_identified_correctly() {
        assert!(WebhookError::Transport("connection refused".into()).is_retryable());
        assert!(WebhookError::Timeout(30_000).is_retryable());
        assert!(WebhookError::HttpStatus { status: 500, body: String::new() }.is_retryable());
        assert!(WebhookError::HttpStatus { status: 404, body: String::new() }.is_retryable());
        assert!(WebhookError::MalformedResponse("eof".into()).is_retryable());

        assert!(!WebhookError::NotConfigured.is_retryable());
        assert!(!WebhookError::Rejected("blocked recipient".into()).is_retryable());
        assert!(!WebhookError::Cancelled.is_retryable());
        assert!(
            !WebhookError::RetriesExhausted {
                attempts: 4,
                last: Box::new(WebhookError::Timeout(10))
            }
            .is_retryable()
        );
    }

    #[test]
    fn response_tolerates_missing_optional_fields() {
        let response: WebhookResponse = serde_json::from_str(r#"{"success":false}"#).unwrap();
        assert!(!response.success);
        assert!(response.external_id.is_empty());
        assert!(response.error_message.is_none());
    }

    #[test]
    fn exhausted_error_names_attempts_and_cause() {
        let err = WebhookError::RetriesExhausted {
            attempts: 4,
            last: Box::new(WebhookError::HttpStatus { status: 503, body: "busy".into() }),
        };
        assert_eq!(
            err.to_string(),
            "webhook request failed after 4 attempts: webhook returned HTTP 503: busy"
        );
    }
}
