use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use message_dispatcher::{
    application::{
        handlers::{ProcessingScheduler, SchedulerError},
        services::{
            cache::{CacheService, SentMessageCache},
            webhook::WebhookService,
        },
        usecases::{MessageManagementUseCase, MessageProcessingUseCase},
    },
    config::{Config, DatabaseConfig, LogFormat},
    domain::repositories::MessageRepository,
    infrastructure::{
        cache::{InMemoryCache, RedisCache},
        messaging::HttpWebhookClient,
        repositories::{PgPool, PostgresMessageRepository},
    },
    presentation::http::endpoints::root::{ApiState, api_service},
};
use poem::{EndpointExt, Route, Server, listener::TcpListener, middleware::Tracing};
use sqlx::postgres::PgPoolOptions;
use tokio::main;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[main]
async fn main() -> Result<()> {
    let config = Config::try_parse().context("failed to load configuration")?;
    init_tracing(config.log_format);

    let server_url = config.server_url();
    info!(
        server_url = %server_url,
        database_url = %config.database.masked_url(),
        scheduler_enabled = config.scheduler_enabled,
        "starting message dispatcher"
    );

    let pool = create_database_pool(&config.database).await?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run database migrations")?;
    info!("database migrations completed");

    let repo: Arc<dyn MessageRepository> = PostgresMessageRepository::with_limits(
        pool.clone(),
        config.database.query_timeout,
        config.database.claim_lease,
    );
    let cache = create_cache(&config).await;
    let webhook: Arc<dyn WebhookService> = Arc::new(
        HttpWebhookClient::new(config.webhook.clone()).context("failed to build webhook client")?,
    );

    let sent_cache = SentMessageCache::new(cache.clone(), config.cache.ttl);
    let processing = Arc::new(MessageProcessingUseCase::new(
        repo.clone(),
        webhook.clone(),
        Some(sent_cache.clone()),
        config.processing(),
    ));
    let management = Arc::new(MessageManagementUseCase::new(repo, Some(sent_cache)));
    let scheduler = Arc::new(ProcessingScheduler::new(
        processing.clone(),
        config.scheduler.clone(),
    ));

    let shutdown = CancellationToken::new();
    if config.scheduler_enabled {
        scheduler
            .start(&shutdown)
            .await
            .context("failed to start scheduler")?;
    }

    let state = Arc::new(ApiState {
        management,
        processing,
        scheduler: scheduler.clone(),
        webhook,
        cache,
        api_key: config.api_key.clone(),
        shutdown: shutdown.clone(),
        started_at: Instant::now(),
    });

    let api = api_service(state, &server_url);
    let ui = api.swagger_ui();
    let app = Route::new()
        .nest("/api", api)
        .nest("/", ui)
        .with(Tracing);

    info!("listening on {}:{}", config.host, config.port);
    let served = Server::new(TcpListener::bind(format!("{}:{}", config.host, config.port)))
        .run_with_graceful_shutdown(app, shutdown_signal(), Some(Duration::from_secs(30)))
        .await;

    shutdown.cancel();
    match scheduler.stop().await {
        Ok(()) | Err(SchedulerError::NotRunning) => {}
        Err(err) => warn!(error = %err, "scheduler shutdown incomplete"),
    }
    pool.close().await;
    info!("message dispatcher stopped");

    served.context("HTTP server failed")
}

fn init_tracing(format: LogFormat) {
    use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,message_dispatcher=debug"));

    let fmt_layer = match format {
        LogFormat::Json => fmt::layer().json().with_current_span(true).boxed(),
        LogFormat::Pretty => fmt::layer().with_target(true).with_line_number(true).boxed(),
    };

    tracing_subscriber::registry().with(fmt_layer).with(filter).init();
}

async fn create_database_pool(config: &DatabaseConfig) -> Result<PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);
    let mut retries = 0;

    loop {
        match PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect(&config.url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .execute(&pool)
                    .await
                    .context("failed to verify database connection")?;
                info!(max_connections = config.max_connections, "database pool established");
                return Ok(pool);
            }
            Err(err) if retries < MAX_RETRIES => {
                retries += 1;
                warn!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    error = %err,
                    "database connection failed, retrying"
                );
                tokio::time::sleep(RETRY_DELAY).await;
            }
            Err(err) => {
                return Err(err).context("failed to create database pool after retries");
            }
        }
    }
}

async fn create_cache(config: &Config) -> Arc<dyn CacheService> {
    let Some(url) = &config.cache.redis_url else {
        info!("REDIS_URL not set, using in-memory cache");
        return Arc::new(InMemoryCache::new(Some(config.cache.ttl)));
    };

    match RedisCache::connect(url, config.cache.ttl).await {
        Ok(cache) => {
            info!("redis cache connected");
            Arc::new(cache)
        }
        Err(err) => {
            warn!(error = %err, "redis unavailable, falling back to in-memory cache");
            Arc::new(InMemoryCache::new(Some(config.cache.ttl)))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
