use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Lifecycle of a single job
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// The client profile a job impersonates
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DistributionAssignment {
    pub country: String,
    pub device_type: String,
    pub device_name: String,
    pub browser_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub run_id: String,
    /// Cohort this job belongs to, e.g. `cohort-00042`
    pub cohort_id: String,
    /// 1-based position of the job within its cohort
    pub cohort_position: u32,
    pub scheduled_at: DateTime<Utc>,
    pub status: JobStatus,
    pub assignment: Option<DistributionAssignment>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Deterministic job id derived from its run and cohort slot
    pub fn compose_id(run_id: &str, cohort_index: u32, position: u32) -> String {
        format!("{run_id}-{}-unit-{position}", Self::compose_cohort_id(cohort_index))
    }

    pub fn compose_cohort_id(cohort_index: u32) -> String {
        format!("cohort-{cohort_index:05}")
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at <= now
    }
}

/// Aggregate job counts for a run or for the whole store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    /// Jobs still pending
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub total: u64,
}

impl JobStats {
    /// Add `count` jobs in `status`
    pub fn add(&mut self, status: JobStatus, count: u64) {
        match status {
            JobStatus::Pending => self.waiting += count,
            JobStatus::Active => self.active += count,
            JobStatus::Completed => self.completed += count,
            JobStatus::Failed => self.failed += count,
        }
        self.total += count;
    }

    /// Move one job between two statuses
    pub fn transition(&mut self, from: JobStatus, to: JobStatus) {
        self.remove(from);
        self.add(to, 1);
    }

    fn remove(&mut self, status: JobStatus) {
        let slot = match status {
            JobStatus::Pending => &mut self.waiting,
            JobStatus::Active => &mut self.active,
            JobStatus::Completed => &mut self.completed,
            JobStatus::Failed => &mut self.failed,
        };
        *slot = slot.saturating_sub(1);
        self.total = self.total.saturating_sub(1);
    }

    /// Nothing left to run and at least one success
    pub fn is_exhausted(&self) -> bool {
        self.waiting == 0 && self.active == 0 && self.completed > 0
    }

    pub fn processed(&self) -> u64 {
        self.completed + self.failed
    }

    /// Completed share of processed jobs, in percent
    pub fn success_rate(&self) -> f64 {
        match self.processed() {
            0 => 0.0,
            processed => self.completed as f64 / processed as f64 * 100.0,
        }
    }

    pub fn progress_percent(&self) -> f64 {
        match self.total {
            0 => 0.0,
            total => self.processed() as f64 / total as f64 * 100.0,
        }
    }
}

impl std::ops::AddAssign for JobStats {
    fn add_assign(&mut self, other: Self) {
        self.waiting += other.waiting;
        self.active += other.active;
        self.completed += other.completed;
        self.failed += other.failed;
        self.total += other.total;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_status_string_round_trip() {
        assert_eq!(JobStatus::Active.as_ref(), "active");
        assert_eq!(JobStatus::from_str("failed").unwrap(), JobStatus::Failed);
        assert!(JobStatus::from_str("paused").is_err());
    }

    #[test]
    fn test_compose_id() {
        assert_eq!(Job::compose_id("run-1", 7, 3), "run-1-cohort-00007-unit-3");
    }

    #[test]
    fn test_stats_transition_and_exhaustion() {
        let mut stats = JobStats::default();
        stats.add(JobStatus::Pending, 2);
        assert!(!stats.is_exhausted());

        stats.transition(JobStatus::Pending, JobStatus::Active);
        stats.transition(JobStatus::Active, JobStatus::Completed);
        stats.transition(JobStatus::Pending, JobStatus::Failed);

        assert_eq!(stats.total, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert!(stats.is_exhausted());
        assert_eq!(stats.success_rate(), 50.0);
        assert_eq!(stats.progress_percent(), 100.0);
    }

    #[test]
    fn test_all_failed_is_not_exhausted() {
        let mut stats = JobStats::default();
        stats.add(JobStatus::Failed, 3);
        assert!(!stats.is_exhausted());
    }
}
