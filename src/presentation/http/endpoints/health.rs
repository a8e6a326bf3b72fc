use std::sync::Arc;

use poem_openapi::{OpenApi, payload::Json};

use crate::presentation::http::{
    endpoints::root::{ApiState, EndpointsTags},
    responses::{DependenciesHealthDto, DependencyHealthDto, HealthDto},
};

#[derive(Clone)]
pub struct HealthEndpoints {
    state: Arc<ApiState>,
}

impl HealthEndpoints {
    pub fn new(state: Arc<ApiState>) -> Self {
        Self { state }
    }
}

#[OpenApi]
impl HealthEndpoints {
    #[oai(path = "/health", method = "get", tag = EndpointsTags::Health)]
    pub async fn health(&self) -> Json<HealthDto> {
        Json(HealthDto {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: self.state.started_at.elapsed().as_secs(),
        })
    }

    #[oai(path = "/health/dependencies", method = "get", tag = EndpointsTags::Health)]
    pub async fn dependencies(&self) -> Json<DependenciesHealthDto> {
        let (webhook, cache) =
            tokio::join!(self.state.webhook.is_healthy(), self.state.cache.is_healthy());

        let dependencies = vec![
            probe("webhook", webhook.err().map(|e| e.to_string())),
            probe("cache", cache.err().map(|e| e.to_string())),
        ];
        let status = if dependencies.iter().all(|d| d.healthy) {
            "ok"
        } else {
            "degraded"
        };

        Json(DependenciesHealthDto {
            status: status.to_string(),
            dependencies,
        })
    }
}

fn probe(name: &str, error: Option<String>) -> DependencyHealthDto {
    DependencyHealthDto {
        name: name.to_string(),
        healthy: error.is_none(),
        error,
    }
}
