//! Materializes the jobs of a run
//!
//! A run's target is split across cohorts, every job gets a paced
//! scheduled time from its cohort slot, and distribution assignments are
//! shuffled across jobs so neighbouring jobs do not share a profile.

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::seq::SliceRandom;
use std::sync::Arc;
use tracing::{debug, info};

use super::job_store::JobStore;
use crate::config::FactoryConfig;
use crate::distribution::flatten;
use crate::errors::AppResult;
use crate::models::{DistributionMatrixEntry, Job, JobStatus, Run};
use crate::pacing::{CohortSlot, PacingScheduler};

/// Split `target` units over `cohorts`; the first `target % cohorts` get one extra
pub fn cohort_sizes(target: u64, cohorts: u32) -> Vec<u32> {
    let cohorts = cohorts.max(1);
    let base = target / cohorts as u64;
    let extra = target % cohorts as u64;
    (0..cohorts as u64)
        .map(|i| (base + u64::from(i < extra)) as u32)
        .collect()
}

/// Number of cohorts needed so none exceeds `units_per_cohort`
pub fn default_cohort_count(target: u64, units_per_cohort: u32) -> u32 {
    let per = units_per_cohort.max(1) as u64;
    target.div_ceil(per).max(1).min(u32::MAX as u64) as u32
}

pub struct JobFactory {
    job_store: Arc<dyn JobStore>,
    pacing: PacingScheduler,
    config: FactoryConfig,
}

impl JobFactory {
    pub fn new(job_store: Arc<dyn JobStore>, pacing: PacingScheduler, config: FactoryConfig) -> Self {
        Self {
            job_store,
            pacing,
            config,
        }
    }

    pub fn pacing(&self) -> &PacingScheduler {
        &self.pacing
    }

    /// Build every job for `run`, sorted by scheduled time then id
    pub fn plan_jobs<R: Rng>(
        &self,
        run: &Run,
        entries: &[DistributionMatrixEntry],
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Vec<Job> {
        let sizes = cohort_sizes(run.target_units, run.cohort_count);
        let cohort_count = sizes.len() as u32;
        let window_hours = self.pacing.window_hours(run.target_units, run.pacing_hours);

        let mut slots = flatten(entries);
        slots.shuffle(rng);
        let mut assignments = slots.into_iter();

        let mut jobs = Vec::with_capacity(run.target_units as usize);
        for (cohort_index, &cohort_size) in sizes.iter().enumerate() {
            let cohort_index = cohort_index as u32;
            for position in 1..=cohort_size {
                let slot = CohortSlot {
                    cohort_index,
                    cohort_count,
                    position,
                    cohort_size,
                };
                let scheduled_at =
                    self.pacing
                        .schedule(now, run.pacing_mode, window_hours, &slot, rng);

                jobs.push(Job {
                    id: Job::compose_id(&run.id, cohort_index, position),
                    run_id: run.id.clone(),
                    cohort_id: Job::compose_cohort_id(cohort_index),
                    cohort_position: position,
                    scheduled_at,
                    status: JobStatus::Pending,
                    assignment: assignments.next(),
                    error_message: None,
                    created_at: now,
                    updated_at: now,
                });
            }
        }

        jobs.sort_by(|a, b| {
            a.scheduled_at
                .cmp(&b.scheduled_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        jobs
    }

    /// Plan and persist the jobs of `run` in batches
    pub async fn populate(&self, run: &Run, entries: &[DistributionMatrixEntry]) -> AppResult<usize> {
        let jobs = {
            let mut rng = rand::rng();
            self.plan_jobs(run, entries, Utc::now(), &mut rng)
        };

        if let (Some(first), Some(last)) = (jobs.first(), jobs.last()) {
            debug!(
                "Run {} schedule spans {} to {}",
                run.id,
                first.scheduled_at.format("%Y-%m-%d %H:%M:%S UTC"),
                last.scheduled_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }

        let batch_size = self.config.insert_batch_size.max(1);
        let mut created = 0;
        let mut batch = Vec::with_capacity(batch_size);
        for job in jobs {
            batch.push(job);
            if batch.len() == batch_size {
                created += self.job_store.enqueue_batch(std::mem::take(&mut batch)).await?;
            }
        }
        if !batch.is_empty() {
            created += self.job_store.enqueue_batch(batch).await?;
        }

        info!(
            "Created {} jobs for run {} across {} cohorts",
            created, run.id, run.cohort_count
        );
        Ok(created)
    }
}
