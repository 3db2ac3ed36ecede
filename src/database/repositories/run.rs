//! SeaORM-based run repository

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::{Expr, Func};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::entities::{prelude::Runs, runs};
use crate::errors::{RepositoryError, RepositoryResult};
use crate::job_scheduling::RunStore;
use crate::models::{JobStats, PacingMode, Run, RunMetrics, RunStatus};

/// SeaORM-based repository for runs
#[derive(Clone)]
pub struct RunSeaOrmRepository {
    connection: Arc<DatabaseConnection>,
}

impl RunSeaOrmRepository {
    pub fn new(connection: Arc<DatabaseConnection>) -> Self {
        Self { connection }
    }

    fn encode<T: serde::Serialize>(value: Option<&T>) -> RepositoryResult<Option<String>> {
        Ok(value.map(serde_json::to_string).transpose()?)
    }

    fn decode<T: serde::de::DeserializeOwned>(raw: Option<String>) -> RepositoryResult<Option<T>> {
        Ok(raw.as_deref().map(serde_json::from_str).transpose()?)
    }

    fn model_to_domain(model: runs::Model) -> RepositoryResult<Run> {
        let status = RunStatus::from_str(&model.status)
            .map_err(|_| RepositoryError::invalid_value("runs.status", &model.status))?;
        let pacing_mode = PacingMode::from_str(&model.pacing_mode)
            .map_err(|_| RepositoryError::invalid_value("runs.pacing_mode", &model.pacing_mode))?;

        Ok(Run {
            id: model.id,
            name: model.name,
            status,
            target_units: model.target_units.max(0) as u64,
            pacing_mode,
            pacing_hours: model.pacing_hours,
            distribution: Self::decode(model.distribution)?,
            concurrency: model.concurrency.map(|c| c.max(0) as usize),
            units_per_cohort: model.units_per_cohort.max(0) as u32,
            cohort_count: model.cohort_count.max(0) as u32,
            stats: Self::decode(model.stats)?,
            metrics: Self::decode(model.metrics)?,
            created_at: model.created_at,
            updated_at: model.updated_at,
            started_at: model.started_at,
            completed_at: model.completed_at,
        })
    }

    fn status_values(statuses: &[RunStatus]) -> Vec<String> {
        statuses.iter().map(ToString::to_string).collect()
    }
}

#[async_trait]
impl RunStore for RunSeaOrmRepository {
    async fn create(&self, run: Run) -> RepositoryResult<Run> {
        let active_model = runs::ActiveModel {
            id: Set(run.id.clone()),
            name: Set(run.name.clone()),
            status: Set(run.status.to_string()),
            target_units: Set(run.target_units as i64),
            pacing_mode: Set(run.pacing_mode.to_string()),
            pacing_hours: Set(run.pacing_hours),
            distribution: Set(Self::encode(run.distribution.as_ref())?),
            concurrency: Set(run.concurrency.map(|c| c as i32)),
            units_per_cohort: Set(run.units_per_cohort as i32),
            cohort_count: Set(run.cohort_count as i32),
            stats: Set(Self::encode(run.stats.as_ref())?),
            metrics: Set(Self::encode(run.metrics.as_ref())?),
            created_at: Set(run.created_at),
            updated_at: Set(run.updated_at),
            started_at: Set(run.started_at),
            completed_at: Set(run.completed_at),
        };

        let model = active_model.insert(&*self.connection).await?;
        debug!("Created run {} ({})", model.id, model.name);
        Self::model_to_domain(model)
    }

    async fn get(&self, run_id: &str) -> RepositoryResult<Option<Run>> {
        Runs::find_by_id(run_id.to_string())
            .one(&*self.connection)
            .await?
            .map(Self::model_to_domain)
            .transpose()
    }

    async fn list(&self) -> RepositoryResult<Vec<Run>> {
        Runs::find()
            .order_by_desc(runs::Column::CreatedAt)
            .order_by_asc(runs::Column::Id)
            .all(&*self.connection)
            .await?
            .into_iter()
            .map(Self::model_to_domain)
            .collect()
    }

    async fn list_active(&self) -> RepositoryResult<Vec<Run>> {
        Runs::find()
            .filter(
                runs::Column::Status
                    .is_in(Self::status_values(&[RunStatus::Pending, RunStatus::Running])),
            )
            .order_by_desc(runs::Column::CreatedAt)
            .order_by_asc(runs::Column::Id)
            .all(&*self.connection)
            .await?
            .into_iter()
            .map(Self::model_to_domain)
            .collect()
    }

    async fn transition_status(
        &self,
        run_id: &str,
        from: &[RunStatus],
        to: RunStatus,
    ) -> RepositoryResult<bool> {
        if from.is_empty() {
            return Ok(false);
        }

        let now = Utc::now();
        let mut update = Runs::update_many()
            .col_expr(runs::Column::Status, Expr::value(to.to_string()))
            .col_expr(runs::Column::UpdatedAt, Expr::value(now));
        if to == RunStatus::Running {
            update = update.col_expr(
                runs::Column::StartedAt,
                Func::coalesce([Expr::col(runs::Column::StartedAt).into(), Expr::value(now)])
                    .into(),
            );
        }

        let result = update
            .filter(runs::Column::Id.eq(run_id))
            .filter(runs::Column::Status.is_in(Self::status_values(from)))
            .exec(&*self.connection)
            .await?;
        Ok(result.rows_affected == 1)
    }

    async fn complete(
        &self,
        run_id: &str,
        stats: &JobStats,
        metrics: &RunMetrics,
    ) -> RepositoryResult<bool> {
        let now = Utc::now();
        let result = Runs::update_many()
            .col_expr(
                runs::Column::Status,
                Expr::value(RunStatus::Completed.to_string()),
            )
            .col_expr(runs::Column::Stats, Expr::value(serde_json::to_string(stats)?))
            .col_expr(
                runs::Column::Metrics,
                Expr::value(serde_json::to_string(metrics)?),
            )
            .col_expr(runs::Column::CompletedAt, Expr::value(now))
            .col_expr(runs::Column::UpdatedAt, Expr::value(now))
            .filter(runs::Column::Id.eq(run_id))
            .filter(
                runs::Column::Status
                    .is_in(Self::status_values(&[RunStatus::Pending, RunStatus::Running])),
            )
            .exec(&*self.connection)
            .await?;
        Ok(result.rows_affected == 1)
    }

    async fn update_stats(&self, run_id: &str, stats: &JobStats) -> RepositoryResult<()> {
        let result = Runs::update_many()
            .col_expr(runs::Column::Stats, Expr::value(serde_json::to_string(stats)?))
            .col_expr(runs::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(runs::Column::Id.eq(run_id))
            .exec(&*self.connection)
            .await?;

        if result.rows_affected == 0 {
            return Err(RepositoryError::RecordNotFound {
                table: "runs".to_string(),
                field: "id".to_string(),
                value: run_id.to_string(),
            });
        }
        Ok(())
    }
}
