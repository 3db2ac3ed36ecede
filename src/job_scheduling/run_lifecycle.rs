//! Run completion detection

use std::sync::Arc;
use tracing::{debug, info};

use super::job_store::JobStore;
use super::run_store::RunStore;
use crate::config::EconomicsConfig;
use crate::errors::AppResult;
use crate::models::{JobStats, RunMetrics, RunStatus};

/// Result of a completion check
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionCheck {
    /// This call moved the run to completed
    Completed(RunMetrics),
    /// The run was already completed or cancelled, or another caller won the transition
    AlreadyFinal,
    /// Work remains, or nothing has succeeded yet
    InProgress(JobStats),
    /// Stopped runs are left alone until resumed
    Inactive(RunStatus),
    NotFound,
}

/// Recomputes run counts and closes out exhausted runs
pub struct RunLifecycleTracker {
    job_store: Arc<dyn JobStore>,
    run_store: Arc<dyn RunStore>,
    economics: EconomicsConfig,
}

impl RunLifecycleTracker {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        run_store: Arc<dyn RunStore>,
        economics: EconomicsConfig,
    ) -> Self {
        Self {
            job_store,
            run_store,
            economics,
        }
    }

    /// Complete the run if every target job exists, none is waiting or
    /// active and at least one succeeded. Safe to call repeatedly and
    /// concurrently.
    pub async fn check_completion(&self, run_id: &str) -> AppResult<CompletionCheck> {
        let Some(run) = self.run_store.get(run_id).await? else {
            return Ok(CompletionCheck::NotFound);
        };
        if run.status.is_final() {
            return Ok(CompletionCheck::AlreadyFinal);
        }
        if !run.status.accepts_work() {
            return Ok(CompletionCheck::Inactive(run.status));
        }

        let stats = self.job_store.stats_for_run(run_id).await?;
        // Population may still be inserting batches
        if stats.total < run.target_units || !stats.is_exhausted() {
            return Ok(CompletionCheck::InProgress(stats));
        }

        let metrics = RunMetrics::from_stats(&stats, &self.economics);
        if !self.run_store.complete(run_id, &stats, &metrics).await? {
            debug!("Run {} already transitioned by another caller", run_id);
            return Ok(CompletionCheck::AlreadyFinal);
        }

        info!(
            "Run {} ({}) completed: {} completed, {} failed, success rate {:.1}%, value ${:.2}, data {:.2}GB, cost ${:.2}, profit ${:.2} ({:.1}% margin)",
            run.id,
            run.name,
            stats.completed,
            stats.failed,
            metrics.success_rate,
            metrics.estimated_value,
            metrics.data_volume_gb,
            metrics.estimated_cost,
            metrics.estimated_profit,
            metrics.profit_margin
        );
        Ok(CompletionCheck::Completed(metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_scheduling::job_store::InMemoryJobStore;
    use crate::job_scheduling::run_store::InMemoryRunStore;
    use crate::models::{Job, JobStatus, Run, RunCreateRequest};
    use chrono::Utc;

    async fn setup(statuses: &[JobStatus]) -> (Arc<InMemoryJobStore>, Arc<InMemoryRunStore>) {
        setup_with_target(statuses, statuses.len() as u64).await
    }

    async fn setup_with_target(
        statuses: &[JobStatus],
        target_units: u64,
    ) -> (Arc<InMemoryJobStore>, Arc<InMemoryRunStore>) {
        let jobs = Arc::new(InMemoryJobStore::new());
        let runs = Arc::new(InMemoryRunStore::new());
        runs.create(Run::from_request(
            "run-1".to_string(),
            &RunCreateRequest {
                name: "lifecycle".to_string(),
                target_units,
                ..Default::default()
            },
            10,
            1,
        ))
        .await
        .unwrap();

        let now = Utc::now();
        for (i, status) in statuses.iter().enumerate() {
            let id = Job::compose_id("run-1", 0, i as u32 + 1);
            jobs.enqueue(Job {
                id: id.clone(),
                run_id: "run-1".to_string(),
                cohort_id: Job::compose_cohort_id(0),
                cohort_position: i as u32 + 1,
                scheduled_at: now,
                status: JobStatus::Pending,
                assignment: None,
                error_message: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

            match status {
                JobStatus::Pending => {}
                JobStatus::Active => assert!(jobs.mark_active(&id).await.unwrap()),
                JobStatus::Completed => {
                    assert!(jobs.mark_active(&id).await.unwrap());
                    assert!(jobs.mark_completed(&id).await.unwrap());
                }
                JobStatus::Failed => {
                    assert!(jobs.mark_active(&id).await.unwrap());
                    assert!(jobs.mark_failed(&id, "boom").await.unwrap());
                }
            }
        }
        (jobs, runs)
    }

    fn tracker(jobs: Arc<InMemoryJobStore>, runs: Arc<InMemoryRunStore>) -> RunLifecycleTracker {
        RunLifecycleTracker::new(jobs, runs, EconomicsConfig::default())
    }

    #[tokio::test]
    async fn test_completes_exactly_once() {
        let (jobs, runs) = setup(&[JobStatus::Completed, JobStatus::Failed]).await;
        let tracker = tracker(jobs, runs.clone());

        let first = tracker.check_completion("run-1").await.unwrap();
        assert!(matches!(first, CompletionCheck::Completed(_)));
        let second = tracker.check_completion("run-1").await.unwrap();
        assert_eq!(second, CompletionCheck::AlreadyFinal);

        let run = runs.get("run-1").await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.metrics.unwrap().processed_units, 2);
    }

    #[tokio::test]
    async fn test_waiting_jobs_keep_run_open() {
        let (jobs, runs) = setup(&[JobStatus::Completed, JobStatus::Pending]).await;
        let tracker = tracker(jobs, runs);

        match tracker.check_completion("run-1").await.unwrap() {
            CompletionCheck::InProgress(stats) => assert_eq!(stats.waiting, 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_all_failed_never_completes() {
        let (jobs, runs) = setup(&[JobStatus::Failed, JobStatus::Failed]).await;
        let tracker = tracker(jobs, runs);

        assert!(matches!(
            tracker.check_completion("run-1").await.unwrap(),
            CompletionCheck::InProgress(_)
        ));
        assert_eq!(
            tracker.check_completion("missing").await.unwrap(),
            CompletionCheck::NotFound
        );
    }

    #[tokio::test]
    async fn test_partially_populated_run_stays_open() {
        let (jobs, runs) = setup_with_target(&[JobStatus::Completed], 3).await;
        let tracker = tracker(jobs, runs.clone());

        match tracker.check_completion("run-1").await.unwrap() {
            CompletionCheck::InProgress(stats) => {
                assert_eq!(stats.completed, 1);
                assert_eq!(stats.total, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
        let run = runs.get("run-1").await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Pending);
    }
}
