use std::sync::Arc;

use poem::Result as PoemResult;
use poem_openapi::{OpenApi, param::Query, payload::Json};

use crate::presentation::http::{
    endpoints::root::{ApiState, EndpointsTags},
    mappers::{domain_error, map_processing_result, map_stats},
    responses::{ProcessingResultDto, ProcessingStatusDto},
    security::ApiKeyAuth,
};

#[derive(Clone)]
pub struct MessagingEndpoints {
    state: Arc<ApiState>,
}

impl MessagingEndpoints {
    pub fn new(state: Arc<ApiState>) -> Self {
        Self { state }
    }
}

#[OpenApi]
impl MessagingEndpoints {
    /// Runs one processing pass right away, independent of the scheduler.
    #[oai(
        path = "/messaging/process",
        method = "post",
        tag = EndpointsTags::Messaging,
    )]
    pub async fn process(
        &self,
        auth: ApiKeyAuth,
        batch_size: Query<Option<i64>>,
    ) -> PoemResult<Json<ProcessingResultDto>> {
        auth.authorize(&self.state.api_key)?;

        let cancel = self.state.shutdown.child_token();
        let result = self
            .state
            .processing
            .process_pending_messages(batch_size.0.unwrap_or(0), &cancel)
            .await
            .map_err(domain_error)?;

        Ok(Json(map_processing_result(&result)))
    }

    #[oai(
        path = "/messaging/status",
        method = "get",
        tag = EndpointsTags::Messaging,
    )]
    pub async fn status(&self, auth: ApiKeyAuth) -> PoemResult<Json<ProcessingStatusDto>> {
        auth.authorize(&self.state.api_key)?;

        let status = self
            .state
            .processing
            .get_processing_status()
            .await
            .map_err(domain_error)?;
        let stats = self.state.scheduler.get_stats().await;

        Ok(Json(ProcessingStatusDto {
            pending_count: status.pending_count,
            sent_count: status.sent_count,
            failed_count: status.failed_count,
            next_processing_at: status.next_processing_at,
            scheduler_running: self.state.scheduler.is_running().await,
            scheduler: map_stats(&stats),
        }))
    }
}
