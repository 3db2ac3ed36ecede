//! SeaORM-based job repository
//!
//! Status transitions are single guarded `UPDATE ... WHERE id = ? AND status = ?`
//! statements that also bump the `version` column; `rows_affected == 1` means
//! this caller won the transition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, FromQueryResult, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::entities::{jobs, prelude::Jobs};
use crate::errors::{RepositoryError, RepositoryResult};
use crate::job_scheduling::JobStore;
use crate::models::{DistributionAssignment, Job, JobStats, JobStatus};

#[derive(Debug, FromQueryResult)]
struct StatusCount {
    status: String,
    count: i64,
}

/// SeaORM-based repository for jobs
#[derive(Clone)]
pub struct JobSeaOrmRepository {
    connection: Arc<DatabaseConnection>,
}

impl JobSeaOrmRepository {
    pub fn new(connection: Arc<DatabaseConnection>) -> Self {
        Self { connection }
    }

    /// New rows always start pending
    fn domain_to_active(job: &Job) -> jobs::ActiveModel {
        let assignment = job.assignment.as_ref();
        jobs::ActiveModel {
            id: Set(job.id.clone()),
            run_id: Set(job.run_id.clone()),
            cohort_id: Set(job.cohort_id.clone()),
            cohort_position: Set(job.cohort_position as i32),
            scheduled_at_ms: Set(job.scheduled_at.timestamp_millis()),
            status: Set(JobStatus::Pending.to_string()),
            country: Set(assignment.map(|a| a.country.clone())),
            device_type: Set(assignment.map(|a| a.device_type.clone())),
            device_name: Set(assignment.map(|a| a.device_name.clone())),
            browser_type: Set(assignment.map(|a| a.browser_type.clone())),
            error_message: Set(None),
            version: Set(0),
            created_at: Set(job.created_at),
            updated_at: Set(job.updated_at),
        }
    }

    fn model_to_domain(model: jobs::Model) -> RepositoryResult<Job> {
        let status = JobStatus::from_str(&model.status)
            .map_err(|_| RepositoryError::invalid_value("jobs.status", &model.status))?;
        let scheduled_at = DateTime::<Utc>::from_timestamp_millis(model.scheduled_at_ms)
            .ok_or_else(|| {
                RepositoryError::invalid_value(
                    "jobs.scheduled_at_ms",
                    model.scheduled_at_ms.to_string(),
                )
            })?;
        let cohort_position = u32::try_from(model.cohort_position).map_err(|_| {
            RepositoryError::invalid_value(
                "jobs.cohort_position",
                model.cohort_position.to_string(),
            )
        })?;

        let assignment = match (
            model.country,
            model.device_type,
            model.device_name,
            model.browser_type,
        ) {
            (Some(country), Some(device_type), Some(device_name), Some(browser_type)) => {
                Some(DistributionAssignment {
                    country,
                    device_type,
                    device_name,
                    browser_type,
                })
            }
            _ => None,
        };

        Ok(Job {
            id: model.id,
            run_id: model.run_id,
            cohort_id: model.cohort_id,
            cohort_position,
            scheduled_at,
            status,
            assignment,
            error_message: model.error_message,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }

    /// Guarded status update; true when exactly this call moved the job
    async fn transition(
        &self,
        job_id: &str,
        from: JobStatus,
        to: JobStatus,
        reason: Option<&str>,
    ) -> RepositoryResult<bool> {
        let mut update = Jobs::update_many()
            .col_expr(jobs::Column::Status, Expr::value(to.to_string()))
            .col_expr(
                jobs::Column::Version,
                Expr::col(jobs::Column::Version).add(1),
            )
            .col_expr(jobs::Column::UpdatedAt, Expr::value(Utc::now()));
        if let Some(reason) = reason {
            update = update.col_expr(jobs::Column::ErrorMessage, Expr::value(reason.to_string()));
        }

        let result = update
            .filter(jobs::Column::Id.eq(job_id))
            .filter(jobs::Column::Status.eq(from.to_string()))
            .exec(&*self.connection)
            .await?;

        let won = result.rows_affected == 1;
        trace!("Job {} {} -> {}: {}", job_id, from, to, won);
        Ok(won)
    }

    async fn count_by_status(&self, run_id: Option<&str>) -> RepositoryResult<JobStats> {
        let mut query = Jobs::find()
            .select_only()
            .column(jobs::Column::Status)
            .column_as(Expr::col(jobs::Column::Id).count(), "count");
        if let Some(run_id) = run_id {
            query = query.filter(jobs::Column::RunId.eq(run_id));
        }

        let rows = query
            .group_by(jobs::Column::Status)
            .into_model::<StatusCount>()
            .all(&*self.connection)
            .await?;

        let mut stats = JobStats::default();
        for row in rows {
            let status = JobStatus::from_str(&row.status)
                .map_err(|_| RepositoryError::invalid_value("jobs.status", &row.status))?;
            stats.add(status, row.count.max(0) as u64);
        }
        Ok(stats)
    }
}

#[async_trait]
impl JobStore for JobSeaOrmRepository {
    async fn enqueue(&self, job: Job) -> RepositoryResult<()> {
        Jobs::insert(Self::domain_to_active(&job))
            .exec_without_returning(&*self.connection)
            .await?;
        trace!("Enqueued job {} for run {}", job.id, job.run_id);
        Ok(())
    }

    async fn enqueue_batch(&self, jobs: Vec<Job>) -> RepositoryResult<usize> {
        if jobs.is_empty() {
            return Ok(0);
        }

        let count = jobs.len();
        let models: Vec<jobs::ActiveModel> = jobs.iter().map(Self::domain_to_active).collect();

        let txn = self.connection.begin().await?;
        Jobs::insert_many(models).exec_without_returning(&txn).await?;
        txn.commit().await?;

        debug!("Inserted batch of {} jobs", count);
        Ok(count)
    }

    async fn find_by_id(&self, job_id: &str) -> RepositoryResult<Option<Job>> {
        Jobs::find_by_id(job_id.to_string())
            .one(&*self.connection)
            .await?
            .map(Self::model_to_domain)
            .transpose()
    }

    async fn claim_next(
        &self,
        run_filter: Option<&str>,
        ignore_schedule: bool,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Option<Job>> {
        let mut query = Jobs::find().filter(jobs::Column::Status.eq(JobStatus::Pending.to_string()));
        if let Some(run_id) = run_filter {
            query = query.filter(jobs::Column::RunId.eq(run_id));
        }
        if !ignore_schedule {
            query = query.filter(jobs::Column::ScheduledAtMs.lte(now.timestamp_millis()));
        }

        query
            .order_by_asc(jobs::Column::ScheduledAtMs)
            .order_by_asc(jobs::Column::Id)
            .one(&*self.connection)
            .await?
            .map(Self::model_to_domain)
            .transpose()
    }

    async fn mark_active(&self, job_id: &str) -> RepositoryResult<bool> {
        self.transition(job_id, JobStatus::Pending, JobStatus::Active, None)
            .await
    }

    async fn fail_pending(&self, job_id: &str, reason: &str) -> RepositoryResult<bool> {
        self.transition(job_id, JobStatus::Pending, JobStatus::Failed, Some(reason))
            .await
    }

    async fn mark_completed(&self, job_id: &str) -> RepositoryResult<bool> {
        self.transition(job_id, JobStatus::Active, JobStatus::Completed, None)
            .await
    }

    async fn mark_failed(&self, job_id: &str, reason: &str) -> RepositoryResult<bool> {
        self.transition(job_id, JobStatus::Active, JobStatus::Failed, Some(reason))
            .await
    }

    async fn stats_for_run(&self, run_id: &str) -> RepositoryResult<JobStats> {
        self.count_by_status(Some(run_id)).await
    }

    async fn global_stats(&self) -> RepositoryResult<JobStats> {
        self.count_by_status(None).await
    }

    async fn jobs_by_status(&self, status: JobStatus, limit: u64) -> RepositoryResult<Vec<Job>> {
        Jobs::find()
            .filter(jobs::Column::Status.eq(status.to_string()))
            .order_by_asc(jobs::Column::ScheduledAtMs)
            .order_by_asc(jobs::Column::Id)
            .limit(limit)
            .all(&*self.connection)
            .await?
            .into_iter()
            .map(Self::model_to_domain)
            .collect()
    }
}
