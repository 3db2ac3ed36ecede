//! Temporal pacing of jobs
//!
//! Fast runs make every job due immediately. Human runs spread each cohort's
//! jobs across a pacing window using smoothstep easing, so activity starts
//! slowly, peaks in the middle and tails off. Jitter, occasional long pauses
//! and a per-cohort offset keep parallel cohorts from moving in lockstep.

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::PacingConfig;
use crate::models::PacingMode;
use crate::utils::jitter::{duration_between, jitter_duration};

const MS_PER_HOUR: f64 = 3_600_000.0;

/// A window length that applies to targets up to `max_units`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowTier {
    /// Inclusive upper bound on target units; `None` matches everything
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_units: Option<u64>,
    pub hours: f64,
}

impl WindowTier {
    pub fn up_to(max_units: u64, hours: f64) -> Self {
        Self {
            max_units: Some(max_units),
            hours,
        }
    }

    pub fn unbounded(hours: f64) -> Self {
        Self {
            max_units: None,
            hours,
        }
    }

    pub fn covers(&self, target_units: u64) -> bool {
        self.max_units.is_none_or(|max| target_units <= max)
    }
}

/// Index of the tier covering `target_units`, falling back to the last tier
pub fn tier_index(tiers: &[WindowTier], target_units: u64) -> usize {
    tiers
        .iter()
        .position(|t| t.covers(target_units))
        .unwrap_or(tiers.len().saturating_sub(1))
}

/// Window hours of the tier covering `target_units`
pub fn tiered_hours(tiers: &[WindowTier], target_units: u64) -> f64 {
    tiers
        .get(tier_index(tiers, target_units))
        .map(|t| t.hours)
        .unwrap_or(1.0)
}

/// Smoothstep easing `3u² − 2u³` over a clamped `u`
pub fn smoothstep(u: f64) -> f64 {
    let u = u.clamp(0.0, 1.0);
    u * u * (3.0 - 2.0 * u)
}

/// Where a job sits among its siblings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CohortSlot {
    /// 0-based index of the cohort
    pub cohort_index: u32,
    pub cohort_count: u32,
    /// 1-based position within the cohort
    pub position: u32,
    pub cohort_size: u32,
}

impl CohortSlot {
    /// Progress through the cohort in `[0, 1]`
    pub fn progress(&self) -> f64 {
        let k = self.position.max(1) as f64;
        let span = self.cohort_size.saturating_sub(1).max(1) as f64;
        ((k - 1.0) / span).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone)]
pub struct PacingScheduler {
    config: PacingConfig,
}

impl PacingScheduler {
    pub fn new(config: PacingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PacingConfig {
        &self.config
    }

    /// Window for a human-paced run: the explicit window clamped to the
    /// configured bounds, otherwise tiered by target size
    pub fn window_hours(&self, target_units: u64, explicit_hours: Option<f64>) -> f64 {
        match explicit_hours {
            Some(hours) if hours.is_finite() => {
                hours.clamp(self.config.min_window_hours, self.config.max_window_hours)
            }
            _ => tiered_hours(&self.config.human_window_tiers, target_units),
        }
    }

    /// Deterministic part of a human-paced delay: eased progress plus cohort offset
    pub fn base_offset(&self, window_hours: f64, slot: &CohortSlot) -> Duration {
        let window_ms = window_hours.max(0.0) * MS_PER_HOUR;
        let eased_ms = smoothstep(slot.progress()) * window_ms;

        let cohort_offset_ms = if slot.cohort_count > 0 {
            let spacing = (window_ms / slot.cohort_size.max(1) as f64).clamp(0.0, window_ms);
            slot.cohort_index as f64 / slot.cohort_count as f64 * spacing
        } else {
            0.0
        };

        Duration::from_millis((eased_ms + cohort_offset_ms).round() as u64)
    }

    /// Full delay from `now` for one job
    pub fn offset<R: Rng>(
        &self,
        mode: PacingMode,
        window_hours: f64,
        slot: &CohortSlot,
        rng: &mut R,
    ) -> Duration {
        if mode == PacingMode::Fast {
            return Duration::ZERO;
        }

        let mut delay =
            self.base_offset(window_hours, slot) + jitter_duration(rng, self.config.max_jitter);

        if self.config.long_pause_probability > 0.0
            && rng.random_bool(self.config.long_pause_probability.min(1.0))
        {
            delay += duration_between(rng, self.config.long_pause_min, self.config.long_pause_max);
        }

        delay
    }

    /// Scheduled time for one job
    pub fn schedule<R: Rng>(
        &self,
        now: DateTime<Utc>,
        mode: PacingMode,
        window_hours: f64,
        slot: &CohortSlot,
        rng: &mut R,
    ) -> DateTime<Utc> {
        let delay = self.offset(mode, window_hours, slot, rng);
        now + TimeDelta::milliseconds(delay.as_millis() as i64)
    }
}
