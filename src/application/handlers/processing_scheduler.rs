use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::{
    sync::{Mutex, RwLock},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::usecases::message_processing::{PendingMessageProcessor, ProcessingResult};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub batch_size: i64,
    /// How long `stop` waits for an in-flight pass to wind down.
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(120),
            batch_size: 2,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("scheduler is already running")]
    AlreadyRunning,
    #[error("scheduler is not running")]
    NotRunning,
    #[error("scheduler did not stop within {0:?}")]
    StopTimedOut(Duration),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessingStats {
    pub total_processed: u64,
    pub total_successful: u64,
    pub total_failed: u64,
    pub last_processing_time: Option<DateTime<Utc>>,
    pub is_currently_processing: bool,
    pub last_result: Option<ProcessingResult>,
    pub last_error: Option<String>,
}

struct RunState {
    stop: CancellationToken,
    done: JoinHandle<()>,
}

impl RunState {
    fn is_active(&self) -> bool {
        !self.done.is_finished()
    }
}

/// Runs a processing pass right after `start` and then once per interval.
///
/// Run state and statistics sit behind separate locks, so reading stats never
/// waits for `start`/`stop`.
pub struct ProcessingScheduler {
    processor: Arc<dyn PendingMessageProcessor>,
    config: SchedulerConfig,
    run: Mutex<Option<RunState>>,
    stats: Arc<RwLock<ProcessingStats>>,
}

impl ProcessingScheduler {
    pub fn new(processor: Arc<dyn PendingMessageProcessor>, config: SchedulerConfig) -> Self {
        Self {
            processor,
            config,
            run: Mutex::new(None),
            stats: Arc::new(RwLock::new(ProcessingStats::default())),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Spawns the processing loop. The loop also ends when `parent` is
    /// cancelled.
    pub async fn start(&self, parent: &CancellationToken) -> Result<(), SchedulerError> {
        let mut run = self.run.lock().await;
        if run.as_ref().is_some_and(RunState::is_active) {
            return Err(SchedulerError::AlreadyRunning);
        }

        let stop = parent.child_token();
        let done = tokio::spawn(run_loop(
            self.processor.clone(),
            self.stats.clone(),
            self.config.clone(),
            stop.clone(),
        ));
        *run = Some(RunState { stop, done });

        info!(
            interval_secs = self.config.interval.as_secs(),
            batch_size = self.config.batch_size,
            "message processing scheduler started"
        );
        Ok(())
    }

    /// Signals the loop and waits up to the shutdown grace period for it to
    /// exit. On timeout the task keeps winding down in the background and
    /// still counts as running, so no second loop can start beside it.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let mut run = self.run.lock().await;
        let Some(RunState { stop, mut done }) = run.take().filter(RunState::is_active) else {
            return Err(SchedulerError::NotRunning);
        };

        info!("stopping message processing scheduler");
        stop.cancel();

        match tokio::time::timeout(self.config.shutdown_grace, &mut done).await {
            Ok(Ok(())) => {
                info!("message processing scheduler stopped");
                Ok(())
            }
            Ok(Err(err)) => {
                error!(error = %err, "scheduler task ended abnormally");
                Ok(())
            }
            Err(_) => {
                warn!(
                    grace_secs = self.config.shutdown_grace.as_secs(),
                    "scheduler did not stop in time, still winding down"
                );
                *run = Some(RunState { stop, done });
                Err(SchedulerError::StopTimedOut(self.config.shutdown_grace))
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        self.run
            .lock()
            .await
            .as_ref()
            .is_some_and(RunState::is_active)
    }

    pub async fn get_stats(&self) -> ProcessingStats {
        self.stats.read().await.clone()
    }
}

async fn run_loop(
    processor: Arc<dyn PendingMessageProcessor>,
    stats: Arc<RwLock<ProcessingStats>>,
    config: SchedulerConfig,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        run_pass(processor.as_ref(), &stats, config.batch_size, &stop).await;
    }

    stats.write().await.is_currently_processing = false;
    debug!("processing loop exited");
}

async fn run_pass(
    processor: &dyn PendingMessageProcessor,
    stats: &RwLock<ProcessingStats>,
    batch_size: i64,
    stop: &CancellationToken,
) {
    stats.write().await.is_currently_processing = true;

    let outcome = processor.process_pending_messages(batch_size, stop).await;

    let mut stats = stats.write().await;
    stats.is_currently_processing = false;
    stats.last_processing_time = Some(Utc::now());

    match outcome {
        Ok(result) => {
            if result.processed_count > 0 {
                info!(
                    processed = result.processed_count,
                    successful = result.success_count,
                    failed = result.failed_count,
                    "scheduled processing pass finished"
                );
            }
            stats.total_processed += u64::from(result.processed_count);
            stats.total_successful += u64::from(result.success_count);
            stats.total_failed += u64::from(result.failed_count);
            stats.last_error = None;
            stats.last_result = Some(result);
        }
        Err(err) => {
            error!(error = %err, "scheduled processing pass failed");
            stats.last_error = Some(err.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::domain::errors::{DomainError, DomainResult};

    #[derive(Default)]
    struct CountingProcessor {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl PendingMessageProcessor for CountingProcessor {
        async fn process_pending_messages(
            &self,
            _batch_size: i64,
            _cancel: &CancellationToken,
        ) -> DomainResult<ProcessingResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(DomainError::repository("database unavailable"));
            }
            Ok(ProcessingResult {
                processed_count: 2,
                success_count: 1,
                failed_count: 1,
                errors: vec![DomainError::business("failed to send message")],
            })
        }
    }

    /// Ignores cancellation and keeps the pass busy for an hour.
    #[derive(Default)]
    struct StuckProcessor {
        in_flight: AtomicU32,
        peak: AtomicU32,
    }

    #[async_trait]
    impl PendingMessageProcessor for StuckProcessor {
        async fn process_pending_messages(
            &self,
            _batch_size: i64,
            _cancel: &CancellationToken,
        ) -> DomainResult<ProcessingResult> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(3_600)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(ProcessingResult::default())
        }
    }

    fn config(interval: Duration) -> SchedulerConfig {
        SchedulerConfig {
            interval,
            batch_size: 2,
            shutdown_grace: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn start_and_stop_reject_repeated_calls() {
        let scheduler = ProcessingScheduler::new(
            Arc::new(CountingProcessor::default()),
            config(Duration::from_secs(60)),
        );
        let parent = CancellationToken::new();

        assert!(!scheduler.is_running().await);
        scheduler.start(&parent).await.unwrap();
        assert!(scheduler.is_running().await);
        assert_eq!(scheduler.start(&parent).await, Err(SchedulerError::AlreadyRunning));

        scheduler.stop().await.unwrap();
        assert!(!scheduler.is_running().await);
        assert_eq!(scheduler.stop().await, Err(SchedulerError::NotRunning));

        scheduler.start(&parent).await.unwrap();
        scheduler.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn runs_immediately_then_every_interval() {
        let processor = Arc::new(CountingProcessor::default());
        let scheduler = ProcessingScheduler::new(processor.clone(), config(Duration::from_secs(10)));
        scheduler.start(&CancellationToken::new()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(processor.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(processor.calls.load(Ordering::SeqCst), 3);

        let stats = scheduler.get_stats().await;
        assert_eq!(stats.total_processed, 6);
        assert_eq!(stats.total_successful, 3);
        assert_eq!(stats.total_failed, 3);
        assert!(stats.last_processing_time.is_some());
        assert!(!stats.is_currently_processing);
        assert_eq!(stats.last_result.map(|r| r.errors.len()), Some(1));

        scheduler.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_passes_are_recorded_and_loop_continues() {
        let processor = Arc::new(CountingProcessor {
            calls: AtomicU32::new(0),
            fail: true,
        });
        let scheduler = ProcessingScheduler::new(processor.clone(), config(Duration::from_secs(5)));
        scheduler.start(&CancellationToken::new()).await.unwrap();

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(processor.calls.load(Ordering::SeqCst), 3);
        assert!(scheduler.is_running().await);

        let stats = scheduler.get_stats().await;
        assert_eq!(stats.total_processed, 0);
        assert!(stats.last_error.unwrap().contains("database unavailable"));

        scheduler.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn parent_cancellation_ends_the_loop() {
        let processor = Arc::new(CountingProcessor::default());
        let scheduler = ProcessingScheduler::new(processor.clone(), config(Duration::from_secs(10)));
        let parent = CancellationToken::new();
        scheduler.start(&parent).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        parent.cancel();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(!scheduler.is_running().await);
        assert_eq!(scheduler.stop().await, Err(SchedulerError::NotRunning));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(processor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_stop_keeps_loop_registered_until_it_exits() {
        let processor = Arc::new(StuckProcessor::default());
        let scheduler = ProcessingScheduler::new(processor.clone(), config(Duration::from_secs(10)));
        let parent = CancellationToken::new();
        scheduler.start(&parent).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(scheduler.get_stats().await.is_currently_processing);

        assert_eq!(
            scheduler.stop().await,
            Err(SchedulerError::StopTimedOut(Duration::from_secs(1)))
        );
        assert!(scheduler.is_running().await);
        assert_eq!(scheduler.start(&parent).await, Err(SchedulerError::AlreadyRunning));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(processor.peak.load(Ordering::SeqCst), 1);

        // the stuck pass finishes and the cancelled loop exits
        tokio::time::sleep(Duration::from_secs(3_600)).await;
        assert!(!scheduler.is_running().await);
        assert_eq!(scheduler.stop().await, Err(SchedulerError::NotRunning));

        scheduler.start(&parent).await.unwrap();
        assert!(scheduler.is_running().await);
    }
}
