//! Periodic re-tuning of the live concurrency limit

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::job_store::JobStore;
use super::run_lifecycle::{CompletionCheck, RunLifecycleTracker};
use super::run_store::RunStore;
use super::types::RunSummary;
use crate::concurrency::{ConcurrencyCalculator, ResizableSemaphore};
use crate::config::WorkerConfig;
use crate::errors::AppResult;
use crate::models::Run;

/// What one tuning pass observed and changed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningReport {
    pub previous_capacity: usize,
    pub capacity: usize,
    pub active_runs: usize,
    pub completed_runs: Vec<String>,
    pub summaries: Vec<RunSummary>,
}

pub struct ConcurrencyTuner {
    job_store: Arc<dyn JobStore>,
    run_store: Arc<dyn RunStore>,
    calculator: Arc<ConcurrencyCalculator>,
    lifecycle: Arc<RunLifecycleTracker>,
    semaphore: ResizableSemaphore,
    fallback_concurrency: usize,
    max_safe_concurrency: usize,
    retune_interval: Duration,
}

impl ConcurrencyTuner {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        run_store: Arc<dyn RunStore>,
        calculator: Arc<ConcurrencyCalculator>,
        lifecycle: Arc<RunLifecycleTracker>,
        semaphore: ResizableSemaphore,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            job_store,
            run_store,
            calculator,
            lifecycle,
            semaphore,
            fallback_concurrency: config.fallback_concurrency,
            max_safe_concurrency: config.max_safe_concurrency,
            retune_interval: config.retune_interval,
        }
    }

    /// Concurrency the active runs call for, capped at what this worker can host
    pub async fn target_concurrency(&self) -> AppResult<usize> {
        let runs = self.run_store.list_active().await?;
        Ok(self.capacity_for(&runs).1)
    }

    /// (required by the runs, capacity after the safety cap)
    fn capacity_for(&self, runs: &[Run]) -> (usize, usize) {
        let required = self
            .calculator
            .required_for_runs(runs, self.fallback_concurrency);
        (required, required.min(self.max_safe_concurrency).max(1))
    }

    /// Re-tune the semaphore, log a per-run summary and sweep for completed runs
    pub async fn tune_once(&self) -> AppResult<TuningReport> {
        let runs = self.run_store.list_active().await?;
        let (required, capacity) = self.capacity_for(&runs);

        let previous_capacity = self.semaphore.capacity();
        if capacity != previous_capacity {
            self.semaphore.set_capacity(capacity);
            info!(
                "Updated worker concurrency from {} to {} ({} active runs, required {})",
                previous_capacity,
                capacity,
                runs.len(),
                required
            );
        } else {
            debug!("Worker concurrency unchanged at {}", capacity);
        }

        let mut summaries = Vec::with_capacity(runs.len());
        let mut completed_runs = Vec::new();
        for run in &runs {
            let stats = self.job_store.stats_for_run(&run.id).await?;
            if let Err(e) = self.run_store.update_stats(&run.id, &stats).await {
                warn!("Failed to cache stats for run {}: {}", run.id, e);
            }
            info!(
                "Run {} ({}) [{}]: {} waiting, {} active, {} completed, {} failed, {:.1}% done, {:.1}% success",
                run.id,
                run.name,
                run.status,
                stats.waiting,
                stats.active,
                stats.completed,
                stats.failed,
                stats.progress_percent(),
                stats.success_rate()
            );

            if let CompletionCheck::Completed(_) = self.lifecycle.check_completion(&run.id).await? {
                completed_runs.push(run.id.clone());
            }
            summaries.push(RunSummary {
                run_id: run.id.clone(),
                name: run.name.clone(),
                status: run.status,
                stats,
            });
        }

        Ok(TuningReport {
            previous_capacity,
            capacity,
            active_runs: runs.len(),
            completed_runs,
            summaries,
        })
    }

    /// Run the tuner until cancelled
    pub async fn run(&self, cancellation_token: CancellationToken) -> Result<()> {
        info!(
            "Starting concurrency tuner (interval: {})",
            humantime::format_duration(self.retune_interval)
        );
        let mut ticker = interval(self.retune_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; the caller has just tuned
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tune_once().await {
                        error!("Concurrency tuning failed: {}", e);
                    }
                }
                _ = cancellation_token.cancelled() => {
                    info!("Concurrency tuner received cancellation signal");
                    break;
                }
            }
        }

        info!("Concurrency tuner stopped");
        Ok(())
    }
}
