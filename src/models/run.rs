use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use super::distribution::DistributionSpec;
use super::job::JobStats;
use crate::config::EconomicsConfig;

/// Lifecycle of a run
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Stopped,
    Cancelled,
    Completed,
}

impl RunStatus {
    /// Jobs of a run in this status may still be executed
    pub fn accepts_work(&self) -> bool {
        matches!(self, RunStatus::Pending | RunStatus::Running)
    }

    pub fn is_final(&self) -> bool {
        matches!(self, RunStatus::Cancelled | RunStatus::Completed)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PacingMode {
    /// Every job is due immediately
    Fast,
    /// Jobs are spread over a pacing window with eased, jittered timing
    #[default]
    Human,
}

/// Figures derived from the final job counts of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub processed_units: u64,
    pub success_rate: f64,
    pub estimated_value: f64,
    pub data_volume_mb: f64,
    pub data_volume_gb: f64,
    pub estimated_cost: f64,
    pub estimated_profit: f64,
    /// Profit as a percentage of value; zero when there is no value
    pub profit_margin: f64,
}

impl RunMetrics {
    pub fn from_stats(stats: &JobStats, economics: &EconomicsConfig) -> Self {
        let completed = stats.completed as f64;
        let estimated_value = completed / 1000.0 * economics.value_per_thousand_units;
        let data_volume_mb = completed * economics.data_mb_per_unit;
        let data_volume_gb = data_volume_mb / 1024.0;
        let estimated_cost = data_volume_gb * economics.cost_per_gb;
        let estimated_profit = estimated_value - estimated_cost;
        let profit_margin = if estimated_value > 0.0 {
            estimated_profit / estimated_value * 100.0
        } else {
            0.0
        };

        Self {
            processed_units: stats.processed(),
            success_rate: stats.success_rate(),
            estimated_value,
            data_volume_mb,
            data_volume_gb,
            estimated_cost,
            estimated_profit,
            profit_margin,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub name: String,
    pub status: RunStatus,
    pub target_units: u64,
    pub pacing_mode: PacingMode,
    /// Explicit pacing window in hours; tiered by target size when absent
    pub pacing_hours: Option<f64>,
    pub distribution: Option<DistributionSpec>,
    /// Declared or derived concurrency for this run
    pub concurrency: Option<usize>,
    pub units_per_cohort: u32,
    pub cohort_count: u32,
    /// Last observed job counts
    pub stats: Option<JobStats>,
    pub metrics: Option<RunMetrics>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Request to create a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunCreateRequest {
    pub name: String,
    pub target_units: u64,
    #[serde(default)]
    pub pacing_mode: PacingMode,
    #[serde(default)]
    pub pacing_hours: Option<f64>,
    #[serde(default)]
    pub distribution: Option<DistributionSpec>,
    /// Overrides the computed concurrency
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub units_per_cohort: Option<u32>,
    #[serde(default)]
    pub cohort_count: Option<u32>,
    /// Transition straight to running after the jobs are created
    #[serde(default)]
    pub start_immediately: bool,
}

impl Run {
    /// Build a pending run from a validated request
    pub fn from_request(
        id: String,
        request: &RunCreateRequest,
        units_per_cohort: u32,
        cohort_count: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: request.name.trim().to_string(),
            status: RunStatus::Pending,
            target_units: request.target_units,
            pacing_mode: request.pacing_mode,
            pacing_hours: request.pacing_hours,
            distribution: request.distribution.clone(),
            concurrency: request.concurrency,
            units_per_cohort,
            cohort_count,
            stats: None,
            metrics: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn generate_id() -> String {
        format!("run-{}", uuid::Uuid::new_v4().simple())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_work() {
        assert!(RunStatus::Pending.accepts_work());
        assert!(RunStatus::Running.accepts_work());
        assert!(!RunStatus::Stopped.accepts_work());
        assert!(!RunStatus::Cancelled.accepts_work());
        assert!(!RunStatus::Completed.accepts_work());
    }

    #[test]
    fn test_metrics_from_stats() {
        let stats = JobStats {
            waiting: 0,
            active: 0,
            completed: 1000,
            failed: 250,
            total: 1250,
        };
        let metrics = RunMetrics::from_stats(&stats, &EconomicsConfig::default());

        assert_eq!(metrics.processed_units, 1250);
        assert!((metrics.success_rate - 80.0).abs() < 1e-9);
        assert!((metrics.estimated_value - 2.365).abs() < 1e-9);
        assert!((metrics.data_volume_mb - 50.0).abs() < 1e-9);
        let expected_cost = 50.0 / 1024.0 * 8.0;
        assert!((metrics.estimated_cost - expected_cost).abs() < 1e-9);
        assert!((metrics.estimated_profit - (2.365 - expected_cost)).abs() < 1e-9);
        assert!(metrics.profit_margin > 0.0 && metrics.profit_margin < 100.0);
    }

    #[test]
    fn test_metrics_without_completions() {
        let stats = JobStats {
            failed: 4,
            total: 4,
            ..JobStats::default()
        };
        let metrics = RunMetrics::from_stats(&stats, &EconomicsConfig::default());
        assert_eq!(metrics.estimated_value, 0.0);
        assert_eq!(metrics.profit_margin, 0.0);
        assert_eq!(metrics.success_rate, 0.0);
    }

    #[test]
    fn test_pacing_mode_defaults_to_human() {
        let request: RunCreateRequest =
            serde_json::from_str(r#"{"name":"x","target_units":5}"#).unwrap();
        assert_eq!(request.pacing_mode, PacingMode::Human);
        assert!(!request.start_immediately);
    }
}
