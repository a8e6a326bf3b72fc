use std::{env::var, str::FromStr, time::Duration};

use dotenvy::dotenv;
use thiserror::Error;

use crate::{
    application::{
        handlers::SchedulerConfig,
        usecases::{MessageProcessingConfig, message_processing::MAX_BATCH_SIZE},
    },
    infrastructure::messaging::WebhookClientConfig,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required env param {0}")]
    Missing(&'static str),
    #[error("invalid value for env param {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub query_timeout: Duration,
    pub claim_lease: Duration,
}

impl DatabaseConfig {
    /// Database URL with the password replaced, for logging.
    pub fn masked_url(&self) -> String {
        let Some((scheme, rest)) = self.url.split_once("://") else {
            return "postgres://***".to_string();
        };
        match rest.rsplit_once('@') {
            Some((credentials, host)) => {
                let user = credentials.split(':').next().unwrap_or_default();
                format!("{scheme}://{user}:***@{host}")
            }
            None => self.url.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// In-memory cache when unset.
    pub redis_url: Option<String>,
    pub ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub scheme: String,
    pub host: String,
    pub api_key: String,
    pub log_format: LogFormat,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub webhook: WebhookClientConfig,
    pub scheduler_enabled: bool,
    pub scheduler: SchedulerConfig,
    pub max_retry_attempts: u32,
}

impl Config {
    pub fn try_parse() -> Result<Config, ConfigError> {
        let _ = dotenv();
        Self::from_lookup(|name| var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let config = Config {
            port: env.required("PORT")?,
            scheme: env.required("SCHEME")?,
            host: env.required("HOST")?,
            api_key: env.required("API_KEY")?,
            log_format: env.or("LOG_FORMAT", LogFormat::Pretty)?,
            database: DatabaseConfig {
                url: env.required("DATABASE_URL")?,
                max_connections: env.or("DATABASE_MAX_CONNECTIONS", 10)?,
                query_timeout: Duration::from_millis(env.or("DATABASE_QUERY_TIMEOUT_MS", 5_000)?),
                claim_lease: Duration::from_secs(env.or("MESSAGE_CLAIM_LEASE_SECS", 1_800)?),
            },
            cache: CacheConfig {
                redis_url: env.optional("REDIS_URL"),
                ttl: Duration::from_secs(env.or("CACHE_TTL_SECS", 30 * 24 * 60 * 60)?),
            },
            webhook: WebhookClientConfig {
                url: env.required("WEBHOOK_URL")?,
                auth_token: env.optional("WEBHOOK_AUTH_TOKEN"),
                timeout: Duration::from_millis(env.or("WEBHOOK_TIMEOUT_MS", 30_000)?),
                max_retries: env.or("WEBHOOK_MAX_RETRIES", 3)?,
                retry_backoff_base: Duration::from_millis(
                    env.or("WEBHOOK_RETRY_BACKOFF_BASE_MS", 1_000)?,
                ),
                retry_backoff_max: Duration::from_millis(
                    env.or("WEBHOOK_RETRY_BACKOFF_MAX_MS", 5_000)?,
                ),
            },
            scheduler_enabled: env.or("SCHEDULER_ENABLED", true)?,
            scheduler: SchedulerConfig {
                interval: Duration::from_secs(env.or("SCHEDULER_INTERVAL_SECS", 120)?),
                batch_size: env.or("SCHEDULER_BATCH_SIZE", 2)?,
                shutdown_grace: Duration::from_secs(30),
            },
            max_retry_attempts: env.or("MESSAGE_MAX_RETRIES", 3)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |name, reason: &str| ConfigError::Invalid {
            name,
            reason: reason.to_string(),
        };

        if self.port == 0 {
            return Err(invalid("PORT", "must be positive"));
        }
        if self.scheduler.interval.is_zero() {
            return Err(invalid("SCHEDULER_INTERVAL_SECS", "must be positive"));
        }
        if self.scheduler.batch_size <= 0 {
            return Err(invalid("SCHEDULER_BATCH_SIZE", "must be positive"));
        }
        if self.database.max_connections == 0 {
            return Err(invalid("DATABASE_MAX_CONNECTIONS", "must be positive"));
        }
        if self.webhook.retry_backoff_max < self.webhook.retry_backoff_base {
            return Err(invalid(
                "WEBHOOK_RETRY_BACKOFF_MAX_MS",
                "must not be smaller than the backoff base",
            ));
        }

        // a claim must outlive the slowest possible batch
        let batch_window = self
            .webhook
            .worst_case_delivery()
            .saturating_mul(MAX_BATCH_SIZE as u32);
        if self.database.claim_lease < batch_window {
            return Err(invalid(
                "MESSAGE_CLAIM_LEASE_SECS",
                &format!(
                    "must cover a full batch of {MAX_BATCH_SIZE} deliveries ({}s)",
                    batch_window.as_secs()
                ),
            ));
        }
        Ok(())
    }

    pub fn server_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    pub fn processing(&self) -> MessageProcessingConfig {
        MessageProcessingConfig {
            max_retry_attempts: self.max_retry_attempts,
            scheduler_interval: self.scheduler.interval,
        }
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Unset and blank values are treated alike.
    fn optional(&self, name: &'static str) -> Option<String> {
        (self.0)(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required<T>(&self, name: &'static str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.optional(name).ok_or(ConfigError::Missing(name))?;
        parse(name, &raw)
    }

    fn or<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(name) {
            Some(raw) => parse(name, &raw),
            None => Ok(default),
        }
    }
}

fn parse<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn base() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("PORT", "8080"),
            ("SCHEME", "http"),
            ("HOST", "localhost"),
            ("API_KEY", "secret"),
            ("DATABASE_URL", "postgres://localhost/messages"),
            ("WEBHOOK_URL", "https://webhook.example.com/send"),
        ])
    }

    fn parse_with(vars: HashMap<&'static str, &'static str>) -> Result<Config, ConfigError> {
        Config::from_lookup(|name| vars.get(name).map(|v| v.to_string()))
    }

    #[test]
    fn defaults_apply_when_optional_vars_are_unset() {
        let config = parse_with(base()).unwrap();

        assert_eq!(config.server_url(), "http://localhost:8080");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.database.query_timeout, Duration::from_secs(5));
        assert_eq!(config.database.claim_lease, Duration::from_secs(1_800));
        assert_eq!(config.cache.redis_url, None);
        assert_eq!(config.cache.ttl, Duration::from_secs(2_592_000));
        assert_eq!(config.webhook.timeout, Duration::from_secs(30));
        assert_eq!(config.webhook.max_retries, 3);
        assert_eq!(config.webhook.retry_backoff_base, Duration::from_secs(1));
        assert_eq!(config.webhook.retry_backoff_max, Duration::from_secs(5));
        assert!(config.scheduler_enabled);
        assert_eq!(config.scheduler.interval, Duration::from_secs(120));
        assert_eq!(config.scheduler.batch_size, 2);
        assert_eq!(config.max_retry_attempts, 3);
    }

    #[test]
    fn overrides_are_parsed() {
        let mut vars = base();
        vars.insert("LOG_FORMAT", "json");
        vars.insert("REDIS_URL", "redis://localhost:6379");
        vars.insert("SCHEDULER_ENABLED", "false");
        vars.insert("SCHEDULER_BATCH_SIZE", "5");
        vars.insert("WEBHOOK_AUTH_TOKEN", "token");

        let config = parse_with(vars).unwrap();
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.cache.redis_url.as_deref(), Some("redis://localhost:6379"));
        assert!(!config.scheduler_enabled);
        assert_eq!(config.scheduler.batch_size, 5);
        assert_eq!(config.webhook.auth_token.as_deref(), Some("token"));
    }

    #[test]
    fn database_password_is_masked() {
        let mut vars = base();
        vars.insert("DATABASE_URL", "postgres://app:hunter2@db:5432/messages");
        let config = parse_with(vars).unwrap();
        assert_eq!(config.database.masked_url(), "postgres://app:***@db:5432/messages");

        let config = parse_with(base()).unwrap();
        assert_eq!(config.database.masked_url(), "postgres://localhost/messages");
    }

    #[test]
    fn missing_required_var_is_named() {
        let mut vars = base();
        vars.remove("WEBHOOK_URL");
        assert_eq!(parse_with(vars).unwrap_err(), ConfigError::Missing("WEBHOOK_URL"));

        let mut vars = base();
        vars.insert("API_KEY", "   ");
        assert_eq!(parse_with(vars).unwrap_err(), ConfigError::Missing("API_KEY"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        for (name, value) in [
            ("PORT", "not-a-port"),
            ("PORT", "0"),
            ("SCHEDULER_BATCH_SIZE", "0"),
            ("SCHEDULER_INTERVAL_SECS", "0"),
            ("LOG_FORMAT", "xml"),
            ("WEBHOOK_RETRY_BACKOFF_MAX_MS", "10"),
            ("MESSAGE_CLAIM_LEASE_SECS", "300"),
        ] {
            let mut vars = base();
            vars.insert(name, value);
            match parse_with(vars) {
                Err(ConfigError::Invalid { name: reported, .. }) => assert_eq!(reported, name),
                other => panic!("expected {name}={value} to be invalid, got {other:?}"),
            }
        }
    }

    #[test]
    fn claim_lease_must_cover_slowest_batch() {
        let mut vars = base();
        vars.insert("WEBHOOK_TIMEOUT_MS", "5000");
        vars.insert("WEBHOOK_MAX_RETRIES", "1");
        vars.insert("WEBHOOK_RETRY_BACKOFF_BASE_MS", "1000");
        // (2 * 5s + 1s) * 10 messages
        vars.insert("MESSAGE_CLAIM_LEASE_SECS", "110");
        assert!(parse_with(vars.clone()).is_ok());

        vars.insert("MESSAGE_CLAIM_LEASE_SECS", "109");
        match parse_with(vars) {
            Err(ConfigError::Invalid { name, reason }) => {
                assert_eq!(name, "MESSAGE_CLAIM_LEASE_SECS");
                assert!(reason.contains("110s"), "{reason}");
            }
            other => panic!("expected an invalid lease, got {other:?}"),
        }
    }
}
