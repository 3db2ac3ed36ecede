//! Concurrency sizing from throughput goals

use serde::{Deserialize, Serialize};

use crate::config::{ConcurrencyConfig, PacingConfig};
use crate::models::{PacingMode, Run};
use crate::pacing::{WindowTier, tier_index, tiered_hours};

/// Suggested concurrency for a run, with the reasoning behind it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcurrencyRecommendation {
    pub concurrency: usize,
    pub window_hours: f64,
    pub estimated_hours: f64,
    pub explanation: String,
}

#[derive(Debug, Clone)]
pub struct ConcurrencyCalculator {
    config: ConcurrencyConfig,
    human_tiers: Vec<WindowTier>,
    min_window_hours: f64,
    max_window_hours: f64,
}

impl ConcurrencyCalculator {
    pub fn new(config: ConcurrencyConfig, pacing: &PacingConfig) -> Self {
        Self {
            config,
            human_tiers: pacing.human_window_tiers.clone(),
            min_window_hours: pacing.min_window_hours,
            max_window_hours: pacing.max_window_hours,
        }
    }

    pub fn min_concurrency(&self) -> usize {
        self.config.min_concurrency
    }

    pub fn max_concurrency(&self) -> usize {
        self.config.max_concurrency
    }

    /// Explicit human windows are used as-is; everything else is tiered
    fn explicit_window(&self, mode: PacingMode, window_hours: Option<f64>) -> Option<f64> {
        match (mode, window_hours) {
            (PacingMode::Human, Some(hours)) if hours.is_finite() && hours > 0.0 => {
                Some(hours.clamp(self.min_window_hours, self.max_window_hours))
            }
            _ => None,
        }
    }

    fn tiers(&self, mode: PacingMode) -> &[WindowTier] {
        match mode {
            PacingMode::Fast => &self.config.fast_window_tiers,
            PacingMode::Human => &self.human_tiers,
        }
    }

    /// Hours the run is expected to take
    pub fn effective_window_hours(
        &self,
        target_units: u64,
        mode: PacingMode,
        window_hours: Option<f64>,
    ) -> f64 {
        self.explicit_window(mode, window_hours)
            .unwrap_or_else(|| tiered_hours(self.tiers(mode), target_units))
    }

    /// Unclamped worker count.
    ///
    /// With tiered windows every lower tier's worker count at its own limit
    /// carries forward as a floor, so crossing into a longer window never
    /// lowers the result.
    pub fn required_workers(
        &self,
        target_units: u64,
        mode: PacingMode,
        window_hours: Option<f64>,
    ) -> u64 {
        let rate = self.config.units_per_hour_per_worker;
        let workers_for = |units: u64, hours: f64| (units as f64 / (rate * hours)).ceil() as u64;

        if let Some(hours) = self.explicit_window(mode, window_hours) {
            return workers_for(target_units, hours);
        }

        let tiers = self.tiers(mode);
        if tiers.is_empty() {
            return workers_for(target_units, 1.0);
        }
        let index = tier_index(tiers, target_units);
        let own = workers_for(target_units, tiers[index].hours);

        tiers[..index]
            .iter()
            .filter_map(|t| t.max_units.map(|limit| workers_for(limit, t.hours)))
            .fold(own, u64::max)
    }

    /// Worker count clamped to the configured bounds
    pub fn optimal_concurrency(
        &self,
        target_units: u64,
        mode: PacingMode,
        window_hours: Option<f64>,
    ) -> usize {
        let required = self.required_workers(target_units, mode, window_hours);
        let required = usize::try_from(required).unwrap_or(usize::MAX);
        required.clamp(self.config.min_concurrency, self.config.max_concurrency)
    }

    pub fn recommend(
        &self,
        target_units: u64,
        mode: PacingMode,
        window_hours: Option<f64>,
    ) -> ConcurrencyRecommendation {
        let concurrency = self.optimal_concurrency(target_units, mode, window_hours);
        let window = self.effective_window_hours(target_units, mode, window_hours);
        let estimated_hours =
            target_units as f64 / (concurrency as f64 * self.config.units_per_hour_per_worker);

        let explanation = if concurrency <= self.config.min_concurrency {
            format!(
                "Minimum concurrency ({}) for a small run, estimated {:.1}h",
                concurrency, estimated_hours
            )
        } else if concurrency >= self.config.max_concurrency {
            format!(
                "Maximum concurrency ({}) reached, estimated {:.1}h completion",
                concurrency, estimated_hours
            )
        } else if mode == PacingMode::Human {
            format!(
                "Human pacing: {} concurrent workers spread {} units across {:.1}h (estimated {:.1}h of work)",
                concurrency, target_units, window, estimated_hours
            )
        } else {
            format!(
                "Fast mode: {} concurrent workers complete in ~{:.1}h",
                concurrency, estimated_hours
            )
        };

        ConcurrencyRecommendation {
            concurrency,
            window_hours: window,
            estimated_hours,
            explanation,
        }
    }

    /// Concurrency needed to serve every run that still accepts work.
    ///
    /// Declared run concurrency wins over the computed value. With no such
    /// runs the fallback applies. The result is always within bounds.
    pub fn required_for_runs(&self, runs: &[Run], fallback: usize) -> usize {
        runs.iter()
            .filter(|run| run.status.accepts_work())
            .map(|run| {
                run.concurrency.unwrap_or_else(|| {
                    self.optimal_concurrency(run.target_units, run.pacing_mode, run.pacing_hours)
                })
            })
            .max()
            .unwrap_or(fallback)
            .clamp(self.config.min_concurrency, self.config.max_concurrency)
    }
}
