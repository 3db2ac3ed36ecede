//! Worker pool that drains eligible jobs under the live concurrency limit

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::job_executor::TaskExecutor;
use super::job_store::JobStore;
use super::run_lifecycle::RunLifecycleTracker;
use super::run_store::RunStore;
use super::types::{LoopOutcome, WorkerPoolStats};
use crate::concurrency::{ResizableSemaphore, StaggerGate};
use crate::config::WorkerConfig;
use crate::errors::AppResult;
use crate::models::PacingMode;
use crate::utils::jitter::with_jitter_percent;

const ERROR_BACKOFF_JITTER_PERCENT: u8 = 20;

#[derive(Debug, Default)]
struct Counters {
    executed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    conflicts: AtomicU64,
}

/// Fixed set of polling loops sharing one semaphore and one stagger gate
#[derive(Clone)]
pub struct WorkerPool {
    job_store: Arc<dyn JobStore>,
    run_store: Arc<dyn RunStore>,
    executor: Arc<dyn TaskExecutor>,
    lifecycle: Arc<RunLifecycleTracker>,
    semaphore: ResizableSemaphore,
    stagger: Arc<StaggerGate>,
    config: WorkerConfig,
    loops: Arc<AtomicUsize>,
    counters: Arc<Counters>,
}

impl WorkerPool {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        run_store: Arc<dyn RunStore>,
        executor: Arc<dyn TaskExecutor>,
        lifecycle: Arc<RunLifecycleTracker>,
        semaphore: ResizableSemaphore,
        config: WorkerConfig,
    ) -> Self {
        let stagger = Arc::new(StaggerGate::new(config.launch_stagger));
        Self {
            job_store,
            run_store,
            executor,
            lifecycle,
            semaphore,
            stagger,
            config,
            loops: Arc::new(AtomicUsize::new(0)),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn semaphore(&self) -> &ResizableSemaphore {
        &self.semaphore
    }

    /// Loops to provision for a concurrency target: a little headroom above
    /// it, capped
    pub fn loop_count_for(&self, concurrency: usize) -> usize {
        (concurrency + self.config.loop_headroom)
            .min(self.config.max_loops)
            .max(1)
    }

    pub fn stats(&self) -> WorkerPoolStats {
        WorkerPoolStats {
            loops: self.loops.load(Ordering::Relaxed),
            capacity: self.semaphore.capacity(),
            in_use: self.semaphore.in_use(),
            executed: self.counters.executed.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            conflicts: self.counters.conflicts.load(Ordering::Relaxed),
        }
    }

    /// Run `loops` worker loops until the token is cancelled
    pub async fn run(&self, loops: usize, cancellation_token: CancellationToken) -> Result<()> {
        let loops = loops.max(1);
        self.loops.store(loops, Ordering::Relaxed);
        info!(
            "Starting worker pool with {} loops (concurrency {}, stagger {:?}, bound run: {})",
            loops,
            self.semaphore.capacity(),
            self.config.launch_stagger,
            self.config.run_id.as_deref().unwrap_or("any")
        );

        let handles: Vec<_> = (0..loops)
            .map(|loop_id| {
                let pool = self.clone();
                let token = cancellation_token.clone();
                tokio::spawn(async move { pool.worker_loop(loop_id, token).await })
            })
            .collect();
        let mut all = futures::future::join_all(handles);

        tokio::select! {
            results = &mut all => {
                Self::log_join_results(results);
                info!("Worker pool stopped");
                return Ok(());
            }
            _ = cancellation_token.cancelled() => {
                info!("Worker pool received cancellation signal");
            }
        }

        let in_flight = self.semaphore.in_use();
        if in_flight > 0 {
            info!("Waiting for {} in-flight jobs to complete...", in_flight);
        }
        match tokio::time::timeout(self.config.shutdown_grace, all).await {
            Ok(results) => {
                Self::log_join_results(results);
                info!("All worker loops stopped");
            }
            Err(_) => {
                warn!(
                    "Timeout waiting for {} jobs to complete, proceeding with shutdown",
                    self.semaphore.in_use()
                );
            }
        }

        let stats = self.stats();
        info!(
            "Worker pool stopped: executed {}, succeeded {}, failed {}, rejected {}, conflicts {}",
            stats.executed, stats.succeeded, stats.failed, stats.rejected, stats.conflicts
        );
        Ok(())
    }

    fn log_join_results(results: Vec<Result<(), tokio::task::JoinError>>) {
        for result in results {
            if let Err(e) = result {
                error!("Worker loop terminated abnormally: {}", e);
            }
        }
    }

    async fn worker_loop(&self, loop_id: usize, cancellation_token: CancellationToken) {
        debug!("Worker loop {} started", loop_id);

        loop {
            if cancellation_token.is_cancelled() {
                break;
            }

            let delay = match self.process_next(&cancellation_token).await {
                Ok(LoopOutcome::Cancelled) => break,
                Ok(LoopOutcome::Idle) => self.config.poll_interval,
                Ok(LoopOutcome::NotDue { job_id }) => {
                    debug!("Loop {}: job {} not due yet, backing off", loop_id, job_id);
                    self.config.poll_interval
                }
                Ok(LoopOutcome::Conflict { .. }) | Ok(LoopOutcome::Rejected { .. }) => {
                    Duration::ZERO
                }
                Ok(LoopOutcome::Executed { .. }) => self.config.post_job_delay,
                Err(e) => {
                    error!("Worker loop {} error: {}", loop_id, e);
                    with_jitter_percent(self.config.error_backoff, ERROR_BACKOFF_JITTER_PERCENT)
                }
            };

            if delay.is_zero() {
                continue;
            }
            tokio::select! {
                _ = cancellation_token.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }

        debug!("Worker loop {} stopped", loop_id);
    }

    /// One iteration: permit, stagger, claim, verify, execute, record.
    ///
    /// The permit is released before the completion check.
    pub async fn process_next(
        &self,
        cancellation_token: &CancellationToken,
    ) -> AppResult<LoopOutcome> {
        let permit = tokio::select! {
            biased;
            _ = cancellation_token.cancelled() => return Ok(LoopOutcome::Cancelled),
            permit = self.semaphore.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return Ok(LoopOutcome::Cancelled),
            },
        };

        tokio::select! {
            biased;
            _ = cancellation_token.cancelled() => return Ok(LoopOutcome::Cancelled),
            _ = self.stagger.wait() => {}
        }

        let now = Utc::now();
        let Some(job) = self
            .job_store
            .claim_next(
                self.config.run_id.as_deref(),
                self.config.process_immediately,
                now,
            )
            .await?
        else {
            return Ok(LoopOutcome::Idle);
        };

        let run = match self.run_store.get(&job.run_id).await? {
            Some(run) if run.status.accepts_work() => run,
            other => {
                let reason = match other {
                    Some(run) => format!("Run not active: {}", run.status),
                    None => "Run not active: not found".to_string(),
                };
                if self.job_store.fail_pending(&job.id, &reason).await? {
                    self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                    warn!("Rejected job {}: {}", job.id, reason);
                    drop(permit);
                    self.record_completion(&job.run_id).await;
                    return Ok(LoopOutcome::Rejected { job_id: job.id });
                }
                self.counters.conflicts.fetch_add(1, Ordering::Relaxed);
                return Ok(LoopOutcome::Conflict { job_id: job.id });
            }
        };

        if run.pacing_mode == PacingMode::Human && !job.is_due(now) {
            return Ok(LoopOutcome::NotDue { job_id: job.id });
        }

        if !self.job_store.mark_active(&job.id).await? {
            self.counters.conflicts.fetch_add(1, Ordering::Relaxed);
            debug!("Job {} claimed by another worker", job.id);
            return Ok(LoopOutcome::Conflict { job_id: job.id });
        }

        debug!(
            "Executing job {} (run {}, {} position {})",
            job.id, job.run_id, job.cohort_id, job.cohort_position
        );
        let outcome = self
            .executor
            .execute(&job.id, job.cohort_position, job.assignment.as_ref())
            .await;
        self.counters.executed.fetch_add(1, Ordering::Relaxed);

        let recorded = if outcome.success {
            self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
            self.job_store.mark_completed(&job.id).await?
        } else {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            let reason = outcome.error.as_deref().unwrap_or("Unknown error");
            warn!("Job {} failed: {}", job.id, reason);
            self.job_store.mark_failed(&job.id, reason).await?
        };
        if !recorded {
            warn!("Job {} was no longer active when recording its outcome", job.id);
        }
        drop(permit);
        self.record_completion(&job.run_id).await;

        Ok(LoopOutcome::Executed {
            job_id: job.id,
            success: outcome.success,
        })
    }

    async fn record_completion(&self, run_id: &str) {
        if let Err(e) = self.lifecycle.check_completion(run_id).await {
            warn!("Completion check failed for run {}: {}", run_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EconomicsConfig;
    use crate::job_scheduling::job_executor::SimulatedExecutor;
    use crate::job_scheduling::job_store::InMemoryJobStore;
    use crate::job_scheduling::run_store::InMemoryRunStore;
    use crate::models::{Job, JobStatus, Run, RunCreateRequest, RunStatus};
    use tracing_test::traced_test;

    struct Fixture {
        jobs: Arc<InMemoryJobStore>,
        runs: Arc<InMemoryRunStore>,
        pool: WorkerPool,
    }

    fn worker_config() -> WorkerConfig {
        WorkerConfig {
            launch_stagger: Duration::ZERO,
            poll_interval: Duration::from_millis(10),
            post_job_delay: Duration::ZERO,
            ..WorkerConfig::default()
        }
    }

    async fn fixture(mode: PacingMode, offsets_secs: &[i64], success_ratio: f64) -> Fixture {
        let jobs = Arc::new(InMemoryJobStore::new());
        let runs = Arc::new(InMemoryRunStore::new());
        runs.create(Run::from_request(
            "run-1".to_string(),
            &RunCreateRequest {
                name: "pool".to_string(),
                target_units: offsets_secs.len() as u64,
                pacing_mode: mode,
                ..Default::default()
            },
            10,
            1,
        ))
        .await
        .unwrap();

        let now = Utc::now();
        for (i, offset) in offsets_secs.iter().enumerate() {
            let position = i as u32 + 1;
            jobs.enqueue(Job {
                id: Job::compose_id("run-1", 0, position),
                run_id: "run-1".to_string(),
                cohort_id: Job::compose_cohort_id(0),
                cohort_position: position,
                scheduled_at: now + chrono::Duration::seconds(*offset),
                status: JobStatus::Pending,
                assignment: None,
                error_message: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        }

        let lifecycle = Arc::new(RunLifecycleTracker::new(
            jobs.clone(),
            runs.clone(),
            EconomicsConfig::default(),
        ));
        let pool = WorkerPool::new(
            jobs.clone(),
            runs.clone(),
            Arc::new(SimulatedExecutor::new(success_ratio, Duration::ZERO, Duration::ZERO)),
            lifecycle,
            ResizableSemaphore::new(2),
            worker_config(),
        );
        Fixture { jobs, runs, pool }
    }

    #[tokio::test]
    async fn test_process_next_executes_and_completes_run() {
        let f = fixture(PacingMode::Fast, &[0], 1.0).await;
        let token = CancellationToken::new();

        let outcome = f.pool.process_next(&token).await.unwrap();
        assert!(matches!(outcome, LoopOutcome::Executed { success: true, .. }));
        assert_eq!(f.pool.process_next(&token).await.unwrap(), LoopOutcome::Idle);

        let run = f.runs.get("run-1").await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(f.pool.stats().succeeded, 1);
        assert_eq!(f.pool.semaphore().in_use(), 0);
    }

    #[tokio::test]
    async fn test_failed_execution_records_reason() {
        let f = fixture(PacingMode::Fast, &[0], 0.0).await;
        let token = CancellationToken::new();

        f.pool.process_next(&token).await.unwrap();
        let job = f
            .jobs
            .find_by_id(&Job::compose_id("run-1", 0, 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("Simulated failure"));
    }

    #[tokio::test]
    async fn test_stopped_run_rejects_without_executing() {
        let f = fixture(PacingMode::Fast, &[0, 1], 1.0).await;
        f.runs
            .transition_status("run-1", &[RunStatus::Pending], RunStatus::Stopped)
            .await
            .unwrap();
        let token = CancellationToken::new();

        let outcome = f.pool.process_next(&token).await.unwrap();
        assert!(matches!(outcome, LoopOutcome::Rejected { .. }));

        let job = f
            .jobs
            .find_by_id(&Job::compose_id("run-1", 0, 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("Run not active: stopped"));
        assert_eq!(f.pool.stats().executed, 0);
    }

    #[tokio::test]
    async fn test_rejecting_last_job_leaves_stopped_run_open() {
        let f = fixture(PacingMode::Fast, &[0, 1], 1.0).await;
        let token = CancellationToken::new();
        assert!(matches!(
            f.pool.process_next(&token).await.unwrap(),
            LoopOutcome::Executed { success: true, .. }
        ));
        f.runs
            .transition_status("run-1", &[RunStatus::Pending], RunStatus::Stopped)
            .await
            .unwrap();

        let outcome = f.pool.process_next(&token).await.unwrap();
        assert!(matches!(outcome, LoopOutcome::Rejected { .. }));
        assert_eq!(f.pool.semaphore().in_use(), 0);

        // Every job is terminal but a stopped run is only closed once resumed
        let stats = f.jobs.stats_for_run("run-1").await.unwrap();
        assert!(stats.is_exhausted());
        let run = f.runs.get("run-1").await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Stopped);
    }

    #[tokio::test]
    async fn test_job_of_missing_run_is_rejected() {
        let f = fixture(PacingMode::Fast, &[], 1.0).await;
        let now = Utc::now();
        f.jobs
            .enqueue(Job {
                id: Job::compose_id("ghost", 0, 1),
                run_id: "ghost".to_string(),
                cohort_id: Job::compose_cohort_id(0),
                cohort_position: 1,
                scheduled_at: now,
                status: JobStatus::Pending,
                assignment: None,
                error_message: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        let outcome = f.pool.process_next(&CancellationToken::new()).await.unwrap();
        assert!(matches!(outcome, LoopOutcome::Rejected { .. }));
        let job = f
            .jobs
            .find_by_id(&Job::compose_id("ghost", 0, 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.error_message.as_deref(), Some("Run not active: not found"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_rejection_is_logged_with_reason() {
        let f = fixture(PacingMode::Fast, &[0], 1.0).await;
        f.runs
            .transition_status("run-1", &[RunStatus::Pending], RunStatus::Cancelled)
            .await
            .unwrap();

        f.pool.process_next(&CancellationToken::new()).await.unwrap();
        assert!(logs_contain("Run not active: cancelled"));
        assert_eq!(f.pool.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_human_job_not_due_is_left_pending() {
        let f = fixture(PacingMode::Human, &[3600], 1.0).await;
        let token = CancellationToken::new();

        let outcome = f.pool.process_next(&token).await.unwrap();
        assert!(matches!(outcome, LoopOutcome::NotDue { .. }));
        assert_eq!(f.jobs.stats_for_run("run-1").await.unwrap().waiting, 1);
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_claiming() {
        let f = fixture(PacingMode::Fast, &[0], 1.0).await;
        let token = CancellationToken::new();
        token.cancel();

        assert_eq!(
            f.pool.process_next(&token).await.unwrap(),
            LoopOutcome::Cancelled
        );
        f.pool.run(2, token).await.unwrap();
        assert_eq!(f.jobs.stats_for_run("run-1").await.unwrap().waiting, 1);
    }

    #[tokio::test]
    async fn test_run_drains_all_jobs() {
        let f = fixture(PacingMode::Fast, &[0, 0, 0, 0, 0], 1.0).await;
        let token = CancellationToken::new();

        let pool = f.pool.clone();
        let runner_token = token.clone();
        let handle = tokio::spawn(async move { pool.run(3, runner_token).await });

        for _ in 0..200 {
            if f.jobs.stats_for_run("run-1").await.unwrap().completed == 5 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        token.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(f.jobs.stats_for_run("run-1").await.unwrap().completed, 5);
        assert_eq!(f.pool.stats().executed, 5);
    }

    #[test]
    fn test_loop_count_has_headroom_and_cap() {
        let pool = WorkerPool::new(
            Arc::new(InMemoryJobStore::new()),
            Arc::new(InMemoryRunStore::new()),
            Arc::new(SimulatedExecutor::new(1.0, Duration::ZERO, Duration::ZERO)),
            Arc::new(RunLifecycleTracker::new(
                Arc::new(InMemoryJobStore::new()),
                Arc::new(InMemoryRunStore::new()),
                EconomicsConfig::default(),
            )),
            ResizableSemaphore::new(2),
            WorkerConfig::default(),
        );
        assert_eq!(pool.loop_count_for(2), 7);
        assert_eq!(pool.loop_count_for(100), 15);
    }
}
