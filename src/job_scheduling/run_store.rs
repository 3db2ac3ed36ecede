//! Run storage

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::errors::{RepositoryError, RepositoryResult};
use crate::models::{JobStats, Run, RunMetrics, RunStatus};

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create(&self, run: Run) -> RepositoryResult<Run>;

    async fn get(&self, run_id: &str) -> RepositoryResult<Option<Run>>;

    /// All runs, newest first
    async fn list(&self) -> RepositoryResult<Vec<Run>>;

    /// Runs whose jobs may still execute (pending or running)
    async fn list_active(&self) -> RepositoryResult<Vec<Run>>;

    /// Move the run to `to` if its current status is one of `from`.
    ///
    /// Entering `running` stamps `started_at` the first time.
    async fn transition_status(
        &self,
        run_id: &str,
        from: &[RunStatus],
        to: RunStatus,
    ) -> RepositoryResult<bool>;

    /// Conditionally close the run out as completed with its final figures.
    ///
    /// Only a pending or running run can complete, so a second call returns
    /// `false`.
    async fn complete(
        &self,
        run_id: &str,
        stats: &JobStats,
        metrics: &RunMetrics,
    ) -> RepositoryResult<bool>;

    /// Cache the latest job counts on the run
    async fn update_stats(&self, run_id: &str, stats: &JobStats) -> RepositoryResult<()>;
}

/// In-process run store
#[derive(Default)]
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<String, Run>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn create(&self, run: Run) -> RepositoryResult<Run> {
        let mut runs = self.runs.write().await;
        if runs.contains_key(&run.id) {
            return Err(RepositoryError::duplicate_key("runs", run.id));
        }
        runs.insert(run.id.clone(), run.clone());
        Ok(run)
    }

    async fn get(&self, run_id: &str) -> RepositoryResult<Option<Run>> {
        Ok(self.runs.read().await.get(run_id).cloned())
    }

    async fn list(&self) -> RepositoryResult<Vec<Run>> {
        let mut runs: Vec<Run> = self.runs.read().await.values().cloned().collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(runs)
    }

    async fn list_active(&self) -> RepositoryResult<Vec<Run>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|run| run.status.accepts_work())
            .collect())
    }

    async fn transition_status(
        &self,
        run_id: &str,
        from: &[RunStatus],
        to: RunStatus,
    ) -> RepositoryResult<bool> {
        let mut runs = self.runs.write().await;
        let Some(run) = runs.get_mut(run_id) else {
            return Ok(false);
        };
        if !from.contains(&run.status) {
            return Ok(false);
        }

        let now = Utc::now();
        run.status = to;
        run.updated_at = now;
        if to == RunStatus::Running && run.started_at.is_none() {
            run.started_at = Some(now);
        }
        Ok(true)
    }

    async fn complete(
        &self,
        run_id: &str,
        stats: &JobStats,
        metrics: &RunMetrics,
    ) -> RepositoryResult<bool> {
        let mut runs = self.runs.write().await;
        let Some(run) = runs.get_mut(run_id) else {
            return Ok(false);
        };
        if !run.status.accepts_work() {
            return Ok(false);
        }

        let now = Utc::now();
        run.status = RunStatus::Completed;
        run.stats = Some(*stats);
        run.metrics = Some(metrics.clone());
        run.completed_at = Some(now);
        run.updated_at = now;
        Ok(true)
    }

    async fn update_stats(&self, run_id: &str, stats: &JobStats) -> RepositoryResult<()> {
        let mut runs = self.runs.write().await;
        match runs.get_mut(run_id) {
            Some(run) => {
                run.stats = Some(*stats);
                run.updated_at = Utc::now();
                Ok(())
            }
            None => Err(RepositoryError::RecordNotFound {
                table: "runs".to_string(),
                field: "id".to_string(),
                value: run_id.to_string(),
            }),
        }
    }
}
