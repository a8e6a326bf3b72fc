use std::sync::Arc;

use poem::{Result as PoemResult, http::StatusCode};
use poem_openapi::{OpenApi, payload::Json};

use crate::{
    application::handlers::SchedulerError,
    presentation::http::{
        endpoints::root::{ApiState, EndpointsTags},
        mappers::map_stats,
        responses::{SchedulerStatsDto, SchedulerStatusDto},
        security::ApiKeyAuth,
    },
};

#[derive(Clone)]
pub struct SchedulerEndpoints {
    state: Arc<ApiState>,
}

impl SchedulerEndpoints {
    pub fn new(state: Arc<ApiState>) -> Self {
        Self { state }
    }
}

#[OpenApi]
impl SchedulerEndpoints {
    #[oai(
        path = "/scheduler/start",
        method = "post",
        tag = EndpointsTags::Scheduler,
    )]
    pub async fn start(&self, auth: ApiKeyAuth) -> PoemResult<Json<SchedulerStatusDto>> {
        auth.authorize(&self.state.api_key)?;

        self.state
            .scheduler
            .start(&self.state.shutdown)
            .await
            .map_err(scheduler_error)?;

        Ok(Json(SchedulerStatusDto {
            running: true,
            message: "scheduler started successfully".to_string(),
        }))
    }

    #[oai(
        path = "/scheduler/stop",
        method = "post",
        tag = EndpointsTags::Scheduler,
    )]
    pub async fn stop(&self, auth: ApiKeyAuth) -> PoemResult<Json<SchedulerStatusDto>> {
        auth.authorize(&self.state.api_key)?;

        self.state.scheduler.stop().await.map_err(scheduler_error)?;

        Ok(Json(SchedulerStatusDto {
            running: false,
            message: "scheduler stopped successfully".to_string(),
        }))
    }

    #[oai(
        path = "/scheduler/stats",
        method = "get",
        tag = EndpointsTags::Scheduler,
    )]
    pub async fn stats(&self, auth: ApiKeyAuth) -> PoemResult<Json<SchedulerStatsDto>> {
        auth.authorize(&self.state.api_key)?;

        let scheduler = &self.state.scheduler;
        let stats = scheduler.get_stats().await;

        Ok(Json(SchedulerStatsDto {
            running: scheduler.is_running().await,
            interval_secs: scheduler.config().interval.as_secs(),
            batch_size: scheduler.config().batch_size,
            stats: map_stats(&stats),
        }))
    }
}

fn scheduler_error(err: SchedulerError) -> poem::Error {
    let status = match err {
        SchedulerError::AlreadyRunning | SchedulerError::NotRunning => StatusCode::CONFLICT,
        SchedulerError::StopTimedOut(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    poem::Error::from_string(err.to_string(), status)
}
