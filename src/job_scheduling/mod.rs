//! Job scheduling subsystem for the impression scheduler
//!
//! Runs are turned into individually scheduled jobs which a pool of worker
//! loops drains under a live concurrency limit:
//! - `JobStore` / `RunStore`: persistence seams with exactly-once transitions
//! - `JobFactory`: materializes a run's jobs with paced schedule times
//! - `WorkerPool`: polling loops that claim, execute and record jobs
//! - `ConcurrencyTuner`: periodic capacity re-tuning and run summaries
//! - `RunLifecycleTracker`: closes out exhausted runs exactly once
//! - `RunControlApi`: create, start, stop and query runs

pub mod api;
pub mod concurrency_tuner;
pub mod job_executor;
pub mod job_factory;
pub mod job_store;
pub mod run_lifecycle;
pub mod run_store;
pub mod types;
pub mod worker_pool;

pub use api::{RunControlApi, RunCreated, SchedulingHealthStatus};
pub use concurrency_tuner::{ConcurrencyTuner, TuningReport};
pub use job_executor::{CommandExecutor, SimulatedExecutor, TaskExecutor, executor_from_config};
pub use job_factory::JobFactory;
pub use job_store::{InMemoryJobStore, JobStore};
pub use run_lifecycle::{CompletionCheck, RunLifecycleTracker};
pub use run_store::{InMemoryRunStore, RunStore};
pub use types::*;
pub use worker_pool::WorkerPool;
