//! Job executor with retry and backoff logic.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::store::JobStore;
use super::types::{Job, JobResult, JobStatus};

/// A job body. One handler serves every kind; dispatch happens on the typed
/// `Job::kind` inside `run`.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, job: &Job) -> JobResult;
}

/// Job executor configuration.
#[derive(Debug, Clone)]
pub struct JobExecutorConfig {
    /// How often to poll for new jobs
    pub poll_interval: Duration,
    /// Name for logging
    pub name: String,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            name: "job-executor".to_string(),
        }
    }
}

impl JobExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Handle to control a running executor.
#[derive(Debug)]
pub struct JobExecutorHandle {
    shutdown: watch::Sender<bool>,
    join: Option<tokio::task::JoinHandle<()>>,
    stats: Arc<Mutex<ExecutorStats>>,
}

impl JobExecutorHandle {
    /// Request graceful shutdown and wait for the worker to drain.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }

    /// Get current executor statistics.
    pub fn stats(&self) -> ExecutorStats {
        self.stats.lock().unwrap().clone()
    }
}

/// Executor runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ExecutorStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_dead_lettered: u64,
    pub uptime_secs: u64,
}

/// Background job executor.
///
/// Polls a job store for eligible jobs, runs them through the handler, and
/// applies retry/dead-letter bookkeeping. A failing job never crashes the
/// worker loop.
pub struct JobExecutor {
    store: Arc<dyn JobStore>,
    handler: Arc<dyn JobHandler>,
}

impl JobExecutor {
    pub fn new(store: Arc<dyn JobStore>, handler: Arc<dyn JobHandler>) -> Self {
        Self { store, handler }
    }

    /// Spawn the executor as a background task.
    pub fn spawn(self, config: JobExecutorConfig) -> JobExecutorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(ExecutorStats::default()));
        let stats_clone = stats.clone();

        let join = tokio::spawn(async move {
            executor_loop(self, config, shutdown_rx, stats_clone).await;
        });

        JobExecutorHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        }
    }

    /// Execute a single claimed job (for tests or synchronous draining).
    ///
    /// The job must already be marked running by `claim_next`.
    pub async fn execute_one(&self, job: &mut Job) -> Result<(), String> {
        execute_job(self, job).await
    }
}

async fn executor_loop(
    executor: JobExecutor,
    config: JobExecutorConfig,
    mut shutdown_rx: watch::Receiver<bool>,
    stats: Arc<Mutex<ExecutorStats>>,
) {
    info!(executor = %config.name, "job executor started");
    let start_time = Instant::now();

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        {
            let mut s = stats.lock().unwrap();
            s.uptime_secs = start_time.elapsed().as_secs();
        }

        match executor.store.claim_next().await {
            Ok(Some(mut job)) => {
                debug!(
                    executor = %config.name,
                    job_id = %job.id,
                    kind = job.kind.type_name(),
                    attempt = job.attempt,
                    "claimed job"
                );

                let result = execute_job(&executor, &mut job).await;

                {
                    let mut s = stats.lock().unwrap();
                    s.jobs_processed += 1;
                    match &result {
                        Ok(()) => s.jobs_succeeded += 1,
                        Err(_) => {
                            s.jobs_failed += 1;
                            if matches!(job.status, JobStatus::DeadLettered { .. }) {
                                s.jobs_dead_lettered += 1;
                            }
                        }
                    }
                }

                if let Err(e) = result {
                    debug!(
                        executor = %config.name,
                        job_id = %job.id,
                        error = %e,
                        status = ?job.status,
                        "job execution failed"
                    );
                }
            }
            Ok(None) => {
                // Nothing eligible; sleep but stay responsive to shutdown.
                tokio::select! {
                    _ = tokio::time::sleep(config.poll_interval) => {}
                    _ = shutdown_rx.changed() => {}
                }
            }
            Err(e) => {
                error!(executor = %config.name, error = ?e, "failed to claim job");
                tokio::select! {
                    _ = tokio::time::sleep(config.poll_interval) => {}
                    _ = shutdown_rx.changed() => {}
                }
            }
        }
    }

    info!(executor = %config.name, "job executor stopped");
}

async fn execute_job(executor: &JobExecutor, job: &mut Job) -> Result<(), String> {
    let started = Utc::now();

    match executor.handler.run(job).await {
        JobResult::Success => {
            job.mark_completed(started);
            executor.store.update(job).await.map_err(|e| e.to_string())?;
            debug!(job_id = %job.id, "job completed successfully");
            Ok(())
        }
        JobResult::Failure(error) => {
            job.mark_failed(error.clone(), started);
            executor.store.update(job).await.map_err(|e| e.to_string())?;

            if matches!(job.status, JobStatus::DeadLettered { .. }) {
                warn!(job_id = %job.id, error = %error, "job dead-lettered");
                executor
                    .store
                    .dead_letter(job.clone(), error.clone())
                    .await
                    .ok();
            }

            Err(error)
        }
        JobResult::RetryNow => {
            job.mark_failed("retry requested".to_string(), started);
            job.scheduled_at = None; // Clear any backoff
            executor.store.update(job).await.map_err(|e| e.to_string())?;
            Err("retry requested".to_string())
        }
        JobResult::RetryAfter(delay) => {
            job.mark_failed("retry after delay".to_string(), started);
            job.scheduled_at =
                Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default());
            executor.store.update(job).await.map_err(|e| e.to_string())?;
            Err("retry after delay".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::types::{JobKind, RetryPolicy};
    use stacks_core::ItemId;

    struct AlwaysSucceeds;

    #[async_trait]
    impl JobHandler for AlwaysSucceeds {
        async fn run(&self, _job: &Job) -> JobResult {
            JobResult::Success
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl JobHandler for AlwaysFails {
        async fn run(&self, _job: &Job) -> JobResult {
            JobResult::Failure("test error".to_string())
        }
    }

    fn notice_job() -> Job {
        Job::new(JobKind::LowStockNotice {
            item_id: ItemId::new(),
        })
    }

    #[tokio::test]
    async fn execute_successful_job() {
        let store = InMemoryJobStore::arc();
        let executor = JobExecutor::new(store.clone(), Arc::new(AlwaysSucceeds));

        store.enqueue(notice_job()).await.unwrap();

        let mut claimed = store.claim_next().await.unwrap().unwrap();
        let result = executor.execute_one(&mut claimed).await;

        assert!(result.is_ok());
        assert!(matches!(claimed.status, JobStatus::Completed));
    }

    #[tokio::test]
    async fn execute_failing_job_with_retry() {
        let store = InMemoryJobStore::arc();
        let executor = JobExecutor::new(store.clone(), Arc::new(AlwaysFails));

        let job = notice_job().with_retry_policy(RetryPolicy {
            max_attempts: 2,
            ..Default::default()
        });
        store.enqueue(job).await.unwrap();

        // First attempt
        let mut claimed = store.claim_next().await.unwrap().unwrap();
        let result = executor.execute_one(&mut claimed).await;
        assert!(result.is_err());
        assert!(matches!(claimed.status, JobStatus::Failed { .. }));

        // Second attempt (after backoff would expire)
        claimed.scheduled_at = None; // Skip backoff for test
        store.update(&claimed).await.unwrap();

        let mut claimed = store.claim_next().await.unwrap().unwrap();
        let result = executor.execute_one(&mut claimed).await;
        assert!(result.is_err());
        assert!(matches!(claimed.status, JobStatus::DeadLettered { .. }));

        // The dead letter is visible, not silently dropped.
        let dls = store.list_dead_letters(10).await.unwrap();
        assert_eq!(dls.len(), 1);
    }

    #[tokio::test]
    async fn spawned_executor_drains_and_shuts_down() {
        let store = InMemoryJobStore::arc();
        let executor = JobExecutor::new(store.clone(), Arc::new(AlwaysSucceeds));

        store.enqueue(notice_job()).await.unwrap();

        let handle = executor.spawn(
            JobExecutorConfig::default()
                .with_name("test-executor")
                .with_poll_interval(Duration::from_millis(5)),
        );

        // Wait for the job to drain.
        for _ in 0..200 {
            if handle.stats().jobs_processed >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let stats = handle.stats();
        assert_eq!(stats.jobs_processed, 1);
        assert_eq!(stats.jobs_succeeded, 1);

        handle.shutdown().await;
    }
}
