//! Job storage with exactly-once status transitions

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::errors::{RepositoryError, RepositoryResult};
use crate::models::{Job, JobStats, JobStatus};

/// Persistent queue of jobs.
///
/// Every status change is a conditional update guarded by the expected
/// current status, so concurrent callers racing on the same job see exactly
/// one `true`.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a job as pending; any other status on `job` is ignored
    async fn enqueue(&self, job: Job) -> RepositoryResult<()>;

    /// Insert many jobs as pending, returning how many were stored
    async fn enqueue_batch(&self, jobs: Vec<Job>) -> RepositoryResult<usize>;

    async fn find_by_id(&self, job_id: &str) -> RepositoryResult<Option<Job>>;

    /// Oldest pending job by scheduled time, ties broken by id.
    ///
    /// With `ignore_schedule = false` only jobs due at `now` are returned.
    /// The job is not claimed; follow up with [`JobStore::mark_active`].
    async fn claim_next(
        &self,
        run_filter: Option<&str>,
        ignore_schedule: bool,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Option<Job>>;

    /// pending -> active
    async fn mark_active(&self, job_id: &str) -> RepositoryResult<bool>;

    /// pending -> failed, used to reject jobs without executing them
    async fn fail_pending(&self, job_id: &str, reason: &str) -> RepositoryResult<bool>;

    /// active -> completed
    async fn mark_completed(&self, job_id: &str) -> RepositoryResult<bool>;

    /// active -> failed
    async fn mark_failed(&self, job_id: &str, reason: &str) -> RepositoryResult<bool>;

    async fn stats_for_run(&self, run_id: &str) -> RepositoryResult<JobStats>;

    async fn global_stats(&self) -> RepositoryResult<JobStats>;

    /// Jobs in `status` ordered by scheduled time, at most `limit`
    async fn jobs_by_status(&self, status: JobStatus, limit: u64) -> RepositoryResult<Vec<Job>>;
}

type ScheduleKey = (i64, String);

fn schedule_key(job: &Job) -> ScheduleKey {
    (job.scheduled_at.timestamp_millis(), job.id.clone())
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<String, Job>,
    /// Pending jobs across all runs in FIFO order
    pending: BTreeSet<ScheduleKey>,
    /// Pending jobs per run in FIFO order
    run_pending: HashMap<String, BTreeSet<ScheduleKey>>,
    run_stats: HashMap<String, JobStats>,
    global: JobStats,
}

impl Inner {
    fn insert(&mut self, mut job: Job) -> RepositoryResult<()> {
        if self.jobs.contains_key(&job.id) {
            return Err(RepositoryError::duplicate_key("jobs", job.id));
        }
        job.status = JobStatus::Pending;
        job.error_message = None;

        let key = schedule_key(&job);
        self.pending.insert(key.clone());
        self.run_pending
            .entry(job.run_id.clone())
            .or_default()
            .insert(key);
        self.run_stats
            .entry(job.run_id.clone())
            .or_default()
            .add(JobStatus::Pending, 1);
        self.global.add(JobStatus::Pending, 1);
        self.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    /// Apply `from -> to` if the job is currently in `from`
    fn transition(
        &mut self,
        job_id: &str,
        from: JobStatus,
        to: JobStatus,
        reason: Option<&str>,
    ) -> bool {
        let Some(job) = self.jobs.get_mut(job_id) else {
            return false;
        };
        if job.status != from {
            return false;
        }

        job.status = to;
        job.updated_at = Utc::now();
        if let Some(reason) = reason {
            job.error_message = Some(reason.to_string());
        }

        if from == JobStatus::Pending {
            let key = schedule_key(job);
            self.pending.remove(&key);
            if let Some(run_index) = self.run_pending.get_mut(&job.run_id) {
                run_index.remove(&key);
            }
        }
        if let Some(stats) = self.run_stats.get_mut(&job.run_id) {
            stats.transition(from, to);
        }
        self.global.transition(from, to);
        true
    }
}

/// In-process job store backed by ordered indexes
#[derive(Default)]
pub struct InMemoryJobStore {
    inner: RwLock<Inner>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, job: Job) -> RepositoryResult<()> {
        let mut inner = self.inner.write().await;
        trace!("Enqueued job {} for run {}", job.id, job.run_id);
        inner.insert(job)
    }

    async fn enqueue_batch(&self, jobs: Vec<Job>) -> RepositoryResult<usize> {
        let mut inner = self.inner.write().await;
        let mut seen = HashSet::with_capacity(jobs.len());
        if let Some(dup) = jobs
            .iter()
            .find(|job| inner.jobs.contains_key(&job.id) || !seen.insert(job.id.as_str()))
        {
            return Err(RepositoryError::duplicate_key("jobs", dup.id.clone()));
        }
        let count = jobs.len();
        for job in jobs {
            inner.insert(job)?;
        }
        debug!("Enqueued batch of {} jobs", count);
        Ok(count)
    }

    async fn find_by_id(&self, job_id: &str) -> RepositoryResult<Option<Job>> {
        Ok(self.inner.read().await.jobs.get(job_id).cloned())
    }

    async fn claim_next(
        &self,
        run_filter: Option<&str>,
        ignore_schedule: bool,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Option<Job>> {
        let inner = self.inner.read().await;
        let index = match run_filter {
            Some(run_id) => match inner.run_pending.get(run_id) {
                Some(index) => index,
                None => return Ok(None),
            },
            None => &inner.pending,
        };

        let Some((scheduled_ms, job_id)) = index.first() else {
            return Ok(None);
        };
        if !ignore_schedule && *scheduled_ms > now.timestamp_millis() {
            return Ok(None);
        }
        Ok(inner.jobs.get(job_id).cloned())
    }

    async fn mark_active(&self, job_id: &str) -> RepositoryResult<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner.transition(job_id, JobStatus::Pending, JobStatus::Active, None))
    }

    async fn fail_pending(&self, job_id: &str, reason: &str) -> RepositoryResult<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner.transition(job_id, JobStatus::Pending, JobStatus::Failed, Some(reason)))
    }

    async fn mark_completed(&self, job_id: &str) -> RepositoryResult<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner.transition(job_id, JobStatus::Active, JobStatus::Completed, None))
    }

    async fn mark_failed(&self, job_id: &str, reason: &str) -> RepositoryResult<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner.transition(job_id, JobStatus::Active, JobStatus::Failed, Some(reason)))
    }

    async fn stats_for_run(&self, run_id: &str) -> RepositoryResult<JobStats> {
        let inner = self.inner.read().await;
        Ok(inner.run_stats.get(run_id).copied().unwrap_or_default())
    }

    async fn global_stats(&self) -> RepositoryResult<JobStats> {
        Ok(self.inner.read().await.global)
    }

    async fn jobs_by_status(&self, status: JobStatus, limit: u64) -> RepositoryResult<Vec<Job>> {
        let inner = self.inner.read().await;
        if status == JobStatus::Pending {
            return Ok(inner
                .pending
                .iter()
                .take(limit as usize)
                .filter_map(|(_, id)| inner.jobs.get(id).cloned())
                .collect());
        }

        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect();
        jobs.sort_by_key(schedule_key);
        jobs.truncate(limit as usize);
        Ok(jobs)
    }
}
