use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::application::services::webhook::{
    WebhookError, WebhookRequest, WebhookResponse, WebhookService,
};

/// Longest response body excerpt carried in an error.
const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, Clone)]
pub struct WebhookClientConfig {
    pub url: String,
    pub auth_token: Option<String>,
    pub timeout: Duration,
    /// Additional attempts after the first one.
    pub max_retries: u32,
    pub retry_backoff_base: Duration,
    pub retry_backoff_max: Duration,
}

impl Default for WebhookClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            auth_token: None,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff_base: Duration::from_secs(1),
            retry_backoff_max: Duration::from_secs(5),
        }
    }
}

impl WebhookClientConfig {
    /// Delay before retry number `attempt` (1-based):
    /// `min(base * 2^(attempt - 1), max)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .retry_backoff_base
            .saturating_mul(2_u32.saturating_pow(exponent));
        delay.min(self.retry_backoff_max)
    }

    /// Longest one `send_message` call can run: every attempt hitting the
    /// timeout plus every backoff wait.
    pub fn worst_case_delivery(&self) -> Duration {
        let attempts = self.max_retries.saturating_add(1);
        let exponential = self.max_retries.min(32);
        let waits: Duration = (1..=exponential).map(|n| self.backoff_delay(n)).sum();
        let capped = self
            .retry_backoff_max
            .saturating_mul(self.max_retries - exponential);

        self.timeout
            .saturating_mul(attempts)
            .saturating_add(waits)
            .saturating_add(capped)
    }
}

/// Delivers messages to the configured webhook endpoint over HTTP.
#[derive(Debug, Clone)]
pub struct HttpWebhookClient {
    http: Client,
    config: WebhookClientConfig,
}

impl HttpWebhookClient {
    pub fn new(config: WebhookClientConfig) -> Result<Self, WebhookError> {
        let http = Client::builder()
            .user_agent(concat!("message-dispatcher/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()
            .map_err(|e| WebhookError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &WebhookClientConfig {
        &self.config
    }

    async fn send_once(&self, request: &WebhookRequest) -> Result<WebhookResponse, WebhookError> {
        let started = Instant::now();

        let mut http_request = self.http.post(&self.config.url).json(request);
        if let Some(token) = &self.config.auth_token {
            http_request = http_request.bearer_auth(token);
        }

        let response = http_request.send().await.map_err(|e| {
            warn!(
                url = %self.config.url,
                duration_ms = started.elapsed().as_millis() as u64,
                error = %e,
                "webhook HTTP request failed"
            );
            if e.is_timeout() {
                WebhookError::Timeout(self.config.timeout.as_millis() as u64)
            } else {
                WebhookError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| WebhookError::Transport(format!("failed to read response body: {e}")))?;

        debug!(
            status = status.as_u16(),
            duration_ms = started.elapsed().as_millis() as u64,
            response_size = body.len(),
            "webhook request completed"
        );

        if !status.is_success() {
            return Err(WebhookError::HttpStatus {
                status: status.as_u16(),
                body: truncate(&body),
            });
        }

        let parsed: WebhookResponse = serde_json::from_str(&body).map_err(|e| {
            WebhookError::MalformedResponse(format!("raw body '{}': {e}", truncate(&body)))
        })?;

        if !parsed.success {
            return Err(WebhookError::Rejected(
                parsed
                    .error_message
                    .unwrap_or_else(|| "no reason given".to_string()),
            ));
        }
        if parsed.external_id.trim().is_empty() {
            return Err(WebhookError::MalformedResponse(
                "successful response without external_id".to_string(),
            ));
        }

        Ok(parsed)
    }
}

#[async_trait]
impl WebhookService for HttpWebhookClient {
    async fn send_message(
        &self,
        request: WebhookRequest,
        cancel: &CancellationToken,
    ) -> Result<WebhookResponse, WebhookError> {
        if self.config.url.is_empty() {
            return Err(WebhookError::NotConfigured);
        }

        let span = info_span!("webhook_delivery", message_id = %request.message_id);
        let max_retries = self.config.max_retries;

        async move {
            let mut last_error = None;

            for attempt in 0..=max_retries {
                if attempt > 0 {
                    let delay = self.config.backoff_delay(attempt);
                    warn!(
                        attempt,
                        max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = ?last_error,
                        "webhook request failed, retrying"
                    );

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(WebhookError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }

                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(WebhookError::Cancelled),
                    outcome = self.send_once(&request) => outcome,
                };

                match outcome {
                    Ok(response) => {
                        if attempt > 0 {
                            info!(total_attempts = attempt + 1, "webhook request succeeded after retries");
                        }
                        return Ok(response);
                    }
                    Err(err) if !err.is_retryable() => {
                        warn!(attempt = attempt + 1, error = %err, "webhook request failed with non-retryable error");
                        return Err(err);
                    }
                    Err(err) => last_error = Some(err),
                }
            }

            let attempts = max_retries + 1;
            let last = last_error
                .unwrap_or_else(|| WebhookError::Transport("no attempt was made".to_string()));
            error!(total_attempts = attempts, error = %last, "webhook request failed after all retries");

            Err(WebhookError::RetriesExhausted {
                attempts,
                last: Box::new(last),
            })
        }
        .instrument(span)
        .await
    }

    async fn is_healthy(&self) -> Result<(), WebhookError> {
        if self.config.url.is_empty() {
            return Err(WebhookError::NotConfigured);
        }

        let mut request = self.http.head(&self.config.url);
        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| WebhookError::Transport(format!("webhook health check failed: {e}")))?;

        if response.status().is_server_error() {
            return Err(WebhookError::HttpStatus {
                status: response.status().as_u16(),
                body: String::new(),
            });
        }

        Ok(())
    }
}

fn truncate(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        body.to_string()
    } else {
        let mut excerpt: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        excerpt.push('…');
        excerpt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_until_cap() {
        let config = WebhookClientConfig {
            retry_backoff_base: Duration::from_millis(100),
            retry_backoff_max: Duration::from_millis(1_000),
            ..Default::default()
        };

        let delays: Vec<_> = (1..=6).map(|attempt| config.backoff_delay(attempt)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
                Duration::from_millis(1_000),
                Duration::from_millis(1_000),
            ]
        );
    }

    #[test]
    fn backoff_never_overflows() {
        let config = WebhookClientConfig {
            retry_backoff_base: Duration::from_secs(3_600),
            retry_backoff_max: Duration::from_secs(7_200),
            ..Default::default()
        };
        assert_eq!(config.backoff_delay(u32::MAX), Duration::from_secs(7_200));
    }

    #[test]
    fn worst_case_delivery_adds_timeouts_and_waits() {
        let config = WebhookClientConfig::default();
        // 4 attempts of 30s plus 1s + 2s + 4s of backoff
        assert_eq!(config.worst_case_delivery(), Duration::from_secs(127));

        let single = WebhookClientConfig {
            max_retries: 0,
            ..Default::default()
        };
        assert_eq!(single.worst_case_delivery(), Duration::from_secs(30));
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(2_000);
        assert_eq!(truncate(&body).chars().count(), MAX_ERROR_BODY_CHARS + 1);
        assert_eq!(truncate("short"), "short");
    }
}
