pub mod processing_scheduler;

pub use processing_scheduler::{ProcessingScheduler, ProcessingStats, SchedulerConfig, SchedulerError};
