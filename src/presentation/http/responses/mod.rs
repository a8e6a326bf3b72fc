use chrono::{DateTime, Utc};
use poem_openapi::Object;
use uuid::Uuid;

use crate::presentation::models::MessageStatusDto;

#[derive(Object)]
pub struct MessageDto {
    pub id: Uuid,
    pub phone_number: String,
    pub content: String,
    pub status: MessageStatusDto,
    pub external_id: Option<String>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Object)]
pub struct MessageListDto {
    pub messages: Vec<MessageDto>,
    pub total_count: u64,
    pub has_more: bool,
}

#[derive(Object)]
pub struct ProcessingResultDto {
    pub processed_count: u32,
    pub success_count: u32,
    pub failed_count: u32,
    pub errors: Vec<String>,
}

#[derive(Object)]
pub struct ProcessingStatsDto {
    pub total_processed: u64,
    pub total_successful: u64,
    pub total_failed: u64,
    pub last_processing_time: Option<DateTime<Utc>>,
    pub is_currently_processing: bool,
    pub last_result: Option<ProcessingResultDto>,
    pub last_error: Option<String>,
}

#[derive(Object)]
pub struct ProcessingStatusDto {
    pub pending_count: u64,
    pub sent_count: u64,
    pub failed_count: u64,
    pub next_processing_at: DateTime<Utc>,
    pub scheduler_running: bool,
    pub scheduler: ProcessingStatsDto,
}

#[derive(Object)]
pub struct SchedulerStatusDto {
    pub running: bool,
    pub message: String,
}

#[derive(Object)]
pub struct SchedulerStatsDto {
    pub running: bool,
    pub interval_secs: u64,
    pub batch_size: i64,
    pub stats: ProcessingStatsDto,
}

#[derive(Object)]
pub struct HealthDto {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

#[derive(Object)]
pub struct DependencyHealthDto {
    pub name: String,
    pub healthy: bool,
    pub error: Option<String>,
}

#[derive(Object)]
pub struct DependenciesHealthDto {
    pub status: String,
    pub dependencies: Vec<DependencyHealthDto>,
}
