//! Job scheduling type definitions

use serde::{Deserialize, Serialize};

use crate::models::{JobStats, RunStatus};

/// Result reported by a task executor for one unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ExecutionOutcome {
    pub fn succeeded(duration_ms: u64) -> Self {
        Self {
            success: true,
            error: None,
            duration_ms: Some(duration_ms),
        }
    }

    pub fn failed(error: impl Into<String>, duration_ms: Option<u64>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            duration_ms,
        }
    }
}

/// What a single worker-loop iteration did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    /// No eligible job was found
    Idle,
    /// The oldest job belongs to a human-paced run and is not due yet
    NotDue { job_id: String },
    /// The owning run was not accepting work; the job was failed unexecuted
    Rejected { job_id: String },
    /// Another worker claimed the job first
    Conflict { job_id: String },
    /// The job ran and its outcome was recorded
    Executed { job_id: String, success: bool },
    /// The loop was cancelled while waiting
    Cancelled,
}

/// Counters exposed by the worker pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPoolStats {
    pub loops: usize,
    pub capacity: usize,
    pub in_use: usize,
    pub executed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub rejected: u64,
    pub conflicts: u64,
}

/// Snapshot of one run's progress used by periodic summaries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub name: String,
    pub status: RunStatus,
    pub stats: JobStats,
}

/// Errors raised by run-control operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchedulingError {
    #[error("Run '{run_id}' not found")]
    RunNotFound { run_id: String },

    #[error("Run '{run_id}' is already running")]
    AlreadyRunning { run_id: String },

    #[error("Run '{run_id}' cannot move from {from} to {to}")]
    InvalidTransition {
        run_id: String,
        from: RunStatus,
        to: RunStatus,
    },
}
