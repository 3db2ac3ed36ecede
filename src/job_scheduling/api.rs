//! Run control entry points
//!
//! Thin layer over the stores, allocator, calculator and factory. Every
//! request is validated before anything is persisted.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::job_factory::{JobFactory, default_cohort_count};
use super::job_store::JobStore;
use super::run_lifecycle::{CompletionCheck, RunLifecycleTracker};
use super::run_store::RunStore;
use super::types::SchedulingError;
use crate::concurrency::{ConcurrencyCalculator, ConcurrencyRecommendation};
use crate::distribution::DistributionAllocator;
use crate::errors::{AppError, AppResult};
use crate::models::{
    DistributionMatrixEntry, Job, JobStats, JobStatus, PacingMode, Run, RunCreateRequest,
    RunStatus,
};

/// Result of a successful run creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCreated {
    pub run: Run,
    pub jobs_created: usize,
    pub recommendation: ConcurrencyRecommendation,
}

/// Health of the scheduling system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingHealthStatus {
    pub is_healthy: bool,
    pub active_runs: usize,
    pub waiting_jobs: u64,
    pub active_jobs: u64,
}

#[derive(Clone)]
pub struct RunControlApi {
    job_store: Arc<dyn JobStore>,
    run_store: Arc<dyn RunStore>,
    allocator: Arc<DistributionAllocator>,
    calculator: Arc<ConcurrencyCalculator>,
    factory: Arc<JobFactory>,
    lifecycle: Arc<RunLifecycleTracker>,
    default_units_per_cohort: u32,
}

impl RunControlApi {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        run_store: Arc<dyn RunStore>,
        allocator: Arc<DistributionAllocator>,
        calculator: Arc<ConcurrencyCalculator>,
        factory: Arc<JobFactory>,
        lifecycle: Arc<RunLifecycleTracker>,
        default_units_per_cohort: u32,
    ) -> Self {
        Self {
            job_store,
            run_store,
            allocator,
            calculator,
            factory,
            lifecycle,
            default_units_per_cohort,
        }
    }

    fn validate_request(&self, request: &RunCreateRequest) -> AppResult<(u32, u32)> {
        if request.name.trim().is_empty() {
            return Err(AppError::validation("name", "must not be empty"));
        }
        if request.target_units == 0 {
            return Err(AppError::validation(
                "target_units",
                "must be greater than zero",
            ));
        }
        if let Some(hours) = request.pacing_hours {
            if !hours.is_finite() || hours <= 0.0 {
                return Err(AppError::validation(
                    "pacing_hours",
                    format!("must be a positive number of hours, got {hours}"),
                ));
            }
        }
        if request.concurrency == Some(0) {
            return Err(AppError::validation(
                "concurrency",
                "must be greater than zero",
            ));
        }

        let units_per_cohort = request
            .units_per_cohort
            .unwrap_or(self.default_units_per_cohort);
        if units_per_cohort == 0 {
            return Err(AppError::validation(
                "units_per_cohort",
                "must be greater than zero",
            ));
        }

        let cohort_count = match request.cohort_count {
            Some(0) => {
                return Err(AppError::validation(
                    "cohort_count",
                    "must be greater than zero",
                ));
            }
            Some(count) => {
                if (count as u64) * (units_per_cohort as u64) < request.target_units {
                    return Err(AppError::validation(
                        "cohort_count",
                        format!(
                            "{} cohorts of {} units cannot cover {} units",
                            count, units_per_cohort, request.target_units
                        ),
                    ));
                }
                count
            }
            None => default_cohort_count(request.target_units, units_per_cohort),
        };

        Ok((units_per_cohort, cohort_count))
    }

    /// Validate, persist and populate a new run
    pub async fn create_run(&self, request: RunCreateRequest) -> AppResult<RunCreated> {
        let (units_per_cohort, cohort_count) = self.validate_request(&request)?;

        let entries: Vec<DistributionMatrixEntry> = match &request.distribution {
            Some(spec) => {
                let mut rng = rand::rng();
                self.allocator
                    .allocate(spec, request.target_units, &mut rng)?
            }
            None => Vec::new(),
        };

        let recommendation = self.calculator.recommend(
            request.target_units,
            request.pacing_mode,
            request.pacing_hours,
        );

        let mut run = Run::from_request(Run::generate_id(), &request, units_per_cohort, cohort_count);
        if run.concurrency.is_none() {
            run.concurrency = Some(recommendation.concurrency);
        }

        info!(
            "API: Creating run {} ({}) for {} units, {} pacing, concurrency {}, {} cohorts",
            run.id,
            run.name,
            run.target_units,
            run.pacing_mode,
            run.concurrency.unwrap_or(recommendation.concurrency),
            run.cohort_count
        );
        self.run_store.create(run.clone()).await?;

        let jobs_created = match self.factory.populate(&run, &entries).await {
            Ok(created) => created,
            Err(e) => {
                warn!("Failed to populate jobs for run {}: {}", run.id, e);
                if let Err(cancel_err) = self
                    .run_store
                    .transition_status(
                        &run.id,
                        &[RunStatus::Pending, RunStatus::Running, RunStatus::Stopped],
                        RunStatus::Cancelled,
                    )
                    .await
                {
                    warn!("Failed to cancel run {} after populate error: {}", run.id, cancel_err);
                }
                return Err(e);
            }
        };

        if request.start_immediately {
            // Workers may already have drained the run to completion
            if self
                .run_store
                .transition_status(&run.id, &[RunStatus::Pending], RunStatus::Running)
                .await?
            {
                info!("API: Started run {}", run.id);
            } else {
                debug!("Run {} left pending before it could be started", run.id);
            }
        }

        let run = self
            .run_store
            .get(&run.id)
            .await?
            .ok_or_else(|| AppError::not_found("run", run.id.clone()))?;

        Ok(RunCreated {
            run,
            jobs_created,
            recommendation,
        })
    }

    /// Move a run between statuses, mapping a lost transition to a precise error
    async fn transition(
        &self,
        run_id: &str,
        from: &[RunStatus],
        to: RunStatus,
    ) -> AppResult<Run> {
        if self.run_store.transition_status(run_id, from, to).await? {
            return self
                .run_store
                .get(run_id)
                .await?
                .ok_or_else(|| AppError::not_found("run", run_id));
        }

        let current = self.run_store.get(run_id).await?;
        let err = match current {
            None => SchedulingError::RunNotFound {
                run_id: run_id.to_string(),
            },
            Some(run) if run.status == RunStatus::Running && to == RunStatus::Running => {
                SchedulingError::AlreadyRunning {
                    run_id: run_id.to_string(),
                }
            }
            Some(run) => SchedulingError::InvalidTransition {
                run_id: run_id.to_string(),
                from: run.status,
                to,
            },
        };
        Err(err.into())
    }

    /// Start a pending run or resume a stopped one
    pub async fn start_run(&self, run_id: &str) -> AppResult<Run> {
        info!("API: Starting run {}", run_id);
        self.transition(
            run_id,
            &[RunStatus::Pending, RunStatus::Stopped],
            RunStatus::Running,
        )
        .await
    }

    /// Stop a run; waiting jobs are failed as workers reach them
    pub async fn stop_run(&self, run_id: &str) -> AppResult<Run> {
        info!("API: Stopping run {}", run_id);
        self.transition(
            run_id,
            &[RunStatus::Pending, RunStatus::Running],
            RunStatus::Stopped,
        )
        .await
    }

    pub async fn cancel_run(&self, run_id: &str) -> AppResult<Run> {
        info!("API: Cancelling run {}", run_id);
        self.transition(
            run_id,
            &[RunStatus::Pending, RunStatus::Running, RunStatus::Stopped],
            RunStatus::Cancelled,
        )
        .await
    }

    /// Current job counts of a run; completes the run if it is exhausted
    pub async fn run_stats(&self, run_id: &str) -> AppResult<JobStats> {
        if self.run_store.get(run_id).await?.is_none() {
            return Err(SchedulingError::RunNotFound {
                run_id: run_id.to_string(),
            }
            .into());
        }
        let stats = self.job_store.stats_for_run(run_id).await?;
        if let CompletionCheck::Completed(_) = self.lifecycle.check_completion(run_id).await? {
            info!("API: Run {} completed during stats query", run_id);
        }
        Ok(stats)
    }

    pub async fn global_stats(&self) -> AppResult<JobStats> {
        Ok(self.job_store.global_stats().await?)
    }

    pub async fn get_run(&self, run_id: &str) -> AppResult<Option<Run>> {
        Ok(self.run_store.get(run_id).await?)
    }

    pub async fn list_runs(&self) -> AppResult<Vec<Run>> {
        Ok(self.run_store.list().await?)
    }

    pub async fn jobs_by_status(&self, status: JobStatus, limit: u64) -> AppResult<Vec<Job>> {
        Ok(self.job_store.jobs_by_status(status, limit).await?)
    }

    pub fn recommend(
        &self,
        target_units: u64,
        mode: PacingMode,
        window_hours: Option<f64>,
    ) -> ConcurrencyRecommendation {
        self.calculator.recommend(target_units, mode, window_hours)
    }

    /// Health check for the scheduling system
    pub async fn health_check(&self) -> SchedulingHealthStatus {
        let active_runs = self.run_store.list_active().await;
        let stats = self.job_store.global_stats().await;

        match (active_runs, stats) {
            (Ok(runs), Ok(stats)) => SchedulingHealthStatus {
                is_healthy: true,
                active_runs: runs.len(),
                waiting_jobs: stats.waiting,
                active_jobs: stats.active,
            },
            (runs, stats) => {
                if let Err(e) = &runs {
                    warn!("Health check could not list active runs: {}", e);
                }
                if let Err(e) = &stats {
                    warn!("Health check could not read job stats: {}", e);
                }
                SchedulingHealthStatus {
                    is_healthy: false,
                    active_runs: runs.map(|r| r.len()).unwrap_or_default(),
                    waiting_jobs: 0,
                    active_jobs: 0,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConcurrencyConfig, EconomicsConfig, FactoryConfig, PacingConfig};
    use crate::distribution::DeviceCatalog;
    use crate::errors::ValidationError;
    use crate::job_scheduling::job_store::InMemoryJobStore;
    use crate::job_scheduling::run_store::InMemoryRunStore;
    use crate::models::DistributionSpec;
    use crate::pacing::PacingScheduler;

    fn api() -> (RunControlApi, Arc<InMemoryJobStore>) {
        let jobs = Arc::new(InMemoryJobStore::new());
        let runs = Arc::new(InMemoryRunStore::new());
        let pacing = PacingConfig::without_randomness();
        let calculator = Arc::new(ConcurrencyCalculator::new(
            ConcurrencyConfig::default(),
            &pacing,
        ));
        let factory = Arc::new(JobFactory::new(
            jobs.clone(),
            PacingScheduler::new(pacing),
            FactoryConfig::default(),
        ));
        let lifecycle = Arc::new(RunLifecycleTracker::new(
            jobs.clone(),
            runs.clone(),
            EconomicsConfig::default(),
        ));
        let api = RunControlApi::new(
            jobs.clone(),
            runs,
            Arc::new(DistributionAllocator::new(Arc::new(DeviceCatalog::builtin()))),
            calculator,
            factory,
            lifecycle,
            10,
        );
        (api, jobs)
    }

    fn request(target: u64) -> RunCreateRequest {
        RunCreateRequest {
            name: "campaign".to_string(),
            target_units: target,
            pacing_mode: PacingMode::Fast,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_run_populates_jobs() {
        let (api, jobs) = api();
        let created = api.create_run(request(25)).await.unwrap();

        assert_eq!(created.jobs_created, 25);
        assert_eq!(created.run.status, RunStatus::Pending);
        assert_eq!(created.run.cohort_count, 3);
        assert_eq!(created.run.concurrency, Some(created.recommendation.concurrency));
        assert_eq!(jobs.stats_for_run(&created.run.id).await.unwrap().waiting, 25);
    }

    #[tokio::test]
    async fn test_create_run_with_distribution_assigns_every_job() {
        let (api, jobs) = api();
        let created = api
            .create_run(RunCreateRequest {
                distribution: Some(DistributionSpec::from_pairs(
                    &[("us", 50.0), ("uk", 50.0)],
                    &[("mobile", 100.0)],
                    &[("safari", 100.0)],
                )),
                start_immediately: true,
                ..request(40)
            })
            .await
            .unwrap();

        assert_eq!(created.run.status, RunStatus::Running);
        let pending = jobs.jobs_by_status(JobStatus::Pending, 100).await.unwrap();
        assert_eq!(pending.len(), 40);
        assert!(pending.iter().all(|j| j.assignment.is_some()));
    }

    #[tokio::test]
    async fn test_invalid_requests_persist_nothing() {
        let (api, jobs) = api();

        let err = api.create_run(request(0)).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = api
            .create_run(RunCreateRequest {
                distribution: Some(DistributionSpec::from_pairs(
                    &[("us", 60.0)],
                    &[("mobile", 100.0)],
                    &[("safari", 100.0)],
                )),
                ..request(10)
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation(ValidationError::PercentageSum { .. })
        ));

        let err = api
            .create_run(RunCreateRequest {
                cohort_count: Some(2),
                ..request(50)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        assert!(api.list_runs().await.unwrap().is_empty());
        assert_eq!(jobs.global_stats().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_run_control_transitions() {
        let (api, _) = api();
        let run = api.create_run(request(5)).await.unwrap().run;

        assert_eq!(api.start_run(&run.id).await.unwrap().status, RunStatus::Running);
        assert!(matches!(
            api.start_run(&run.id).await.unwrap_err(),
            AppError::Scheduling(SchedulingError::AlreadyRunning { .. })
        ));
        assert_eq!(api.stop_run(&run.id).await.unwrap().status, RunStatus::Stopped);
        assert_eq!(api.start_run(&run.id).await.unwrap().status, RunStatus::Running);
        assert_eq!(api.cancel_run(&run.id).await.unwrap().status, RunStatus::Cancelled);
        assert!(matches!(
            api.start_run(&run.id).await.unwrap_err(),
            AppError::Scheduling(SchedulingError::InvalidTransition {
                from: RunStatus::Cancelled,
                ..
            })
        ));
        assert!(matches!(
            api.stop_run("missing").await.unwrap_err(),
            AppError::Scheduling(SchedulingError::RunNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_health_reports_waiting_jobs() {
        let (api, _) = api();
        api.create_run(request(7)).await.unwrap();

        let health = api.health_check().await;
        assert!(health.is_healthy);
        assert_eq!(health.active_runs, 1);
        assert_eq!(health.waiting_jobs, 7);
    }
}
