use std::{sync::Arc, time::Instant};

use poem_openapi::{OpenApiService, Tags};
use tokio_util::sync::CancellationToken;

use crate::{
    application::{
        handlers::ProcessingScheduler,
        services::{cache::CacheService, webhook::WebhookService},
        usecases::{MessageManagementUseCase, MessageProcessingUseCase},
    },
    presentation::http::endpoints::{
        health::HealthEndpoints, messages::MessagesEndpoints, messaging::MessagingEndpoints,
        scheduler::SchedulerEndpoints,
    },
};

pub struct ApiState {
    pub management: Arc<MessageManagementUseCase>,
    pub processing: Arc<MessageProcessingUseCase>,
    pub scheduler: Arc<ProcessingScheduler>,
    pub webhook: Arc<dyn WebhookService>,
    pub cache: Arc<dyn CacheService>,
    pub api_key: String,
    /// Cancelled on process shutdown; parent of scheduler and manual passes.
    pub shutdown: CancellationToken,
    pub started_at: Instant,
}

/// Enum of API sections (tags)
#[derive(Tags)]
pub enum EndpointsTags {
    Health,
    Messages,
    Messaging,
    Scheduler,
}

pub type Endpoints = (
    HealthEndpoints,
    MessagesEndpoints,
    MessagingEndpoints,
    SchedulerEndpoints,
);

pub fn api_service(state: Arc<ApiState>, server_url: &str) -> OpenApiService<Endpoints, ()> {
    let endpoints = (
        HealthEndpoints::new(state.clone()),
        MessagesEndpoints::new(state.clone()),
        MessagingEndpoints::new(state.clone()),
        SchedulerEndpoints::new(state),
    );

    OpenApiService::new(endpoints, "Message Dispatcher API", env!("CARGO_PKG_VERSION"))
        .server(format!("{server_url}/api"))
}
