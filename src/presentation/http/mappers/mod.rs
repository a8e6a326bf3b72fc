use poem::http::StatusCode;

use crate::{
    application::{
        handlers::ProcessingStats,
        usecases::{MessageView, ProcessingResult},
    },
    domain::errors::DomainError,
    presentation::http::responses::{MessageDto, ProcessingResultDto, ProcessingStatsDto},
};

pub fn map_message(view: &MessageView) -> MessageDto {
    MessageDto {
        id: view.id.as_uuid(),
        phone_number: view.phone_number.clone(),
        content: view.content.clone(),
        status: view.status.into(),
        external_id: view.external_id.clone(),
        retry_count: view.retry_count,
        created_at: view.created_at,
        updated_at: view.updated_at,
        sent_at: view.sent_at,
    }
}

pub fn map_processing_result(result: &ProcessingResult) -> ProcessingResultDto {
    ProcessingResultDto {
        processed_count: result.processed_count,
        success_count: result.success_count,
        failed_count: result.failed_count,
        errors: result.errors.iter().map(ToString::to_string).collect(),
    }
}

pub fn map_stats(stats: &ProcessingStats) -> ProcessingStatsDto {
    ProcessingStatsDto {
        total_processed: stats.total_processed,
        total_successful: stats.total_successful,
        total_failed: stats.total_failed,
        last_processing_time: stats.last_processing_time,
        is_currently_processing: stats.is_currently_processing,
        last_result: stats.last_result.as_ref().map(map_processing_result),
        last_error: stats.last_error.clone(),
    }
}

pub fn status_code(err: &DomainError) -> StatusCode {
    match err {
        DomainError::Validation(_) => StatusCode::BAD_REQUEST,
        DomainError::NotFound(_) => StatusCode::NOT_FOUND,
        DomainError::Business(_) => StatusCode::UNPROCESSABLE_ENTITY,
        DomainError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
        DomainError::Conflict(_) => StatusCode::CONFLICT,
    }
}

pub fn domain_error(err: DomainError) -> poem::Error {
    poem::Error::from_string(err.to_string(), status_code(&err))
}
