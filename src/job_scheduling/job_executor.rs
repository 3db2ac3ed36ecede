//! Task executors that perform one unit of work per job

use async_trait::async_trait;
use rand::Rng;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

use super::types::ExecutionOutcome;
use crate::config::ExecutorConfig;
use crate::models::DistributionAssignment;
use crate::utils::jitter::duration_between;

/// Performs the work behind a job. Failures are reported in the outcome,
/// never as a panic or an error return.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(
        &self,
        job_id: &str,
        cohort_position: u32,
        assignment: Option<&DistributionAssignment>,
    ) -> ExecutionOutcome;
}

/// Build the executor described by the configuration: an external command
/// when one is set, otherwise the simulator
pub fn executor_from_config(config: &ExecutorConfig) -> Arc<dyn TaskExecutor> {
    match &config.command {
        Some(command) => Arc::new(CommandExecutor::new(command.clone(), config)),
        None => Arc::new(SimulatedExecutor::from_config(config)),
    }
}

/// Runs an external program per job.
///
/// The job is passed through `IMPRESSION_*` environment variables. Exit
/// status 0 is success; otherwise the tail of stderr becomes the error.
pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
    stderr_tail_bytes: usize,
}

impl CommandExecutor {
    pub fn new(program: String, config: &ExecutorConfig) -> Self {
        Self {
            program,
            args: config.args.clone(),
            timeout: config.timeout,
            stderr_tail_bytes: config.stderr_tail_bytes,
        }
    }

    fn build_command(
        &self,
        job_id: &str,
        cohort_position: u32,
        assignment: Option<&DistributionAssignment>,
    ) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env("IMPRESSION_JOB_ID", job_id)
            .env("IMPRESSION_COHORT_POSITION", cohort_position.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(a) = assignment {
            cmd.env("IMPRESSION_COUNTRY", &a.country)
                .env("IMPRESSION_DEVICE_TYPE", &a.device_type)
                .env("IMPRESSION_DEVICE_NAME", &a.device_name)
                .env("IMPRESSION_BROWSER_TYPE", &a.browser_type);
        }
        cmd
    }

    fn stderr_tail(&self, stderr: &[u8]) -> String {
        let start = stderr.len().saturating_sub(self.stderr_tail_bytes);
        String::from_utf8_lossy(&stderr[start..]).trim().to_string()
    }
}

#[async_trait]
impl TaskExecutor for CommandExecutor {
    async fn execute(
        &self,
        job_id: &str,
        cohort_position: u32,
        assignment: Option<&DistributionAssignment>,
    ) -> ExecutionOutcome {
        let started = Instant::now();
        let mut cmd = self.build_command(job_id, cohort_position, assignment);

        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, cmd.output()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("Job {} timed out after {:?}", job_id, limit);
                    return ExecutionOutcome::failed(
                        format!("Timed out after {}", humantime::format_duration(limit)),
                        Some(started.elapsed().as_millis() as u64),
                    );
                }
            },
            None => cmd.output().await,
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match output {
            Ok(output) if output.status.success() => {
                debug!("Job {} finished in {}ms", job_id, duration_ms);
                ExecutionOutcome::succeeded(duration_ms)
            }
            Ok(output) => {
                let tail = self.stderr_tail(&output.stderr);
                let message = if tail.is_empty() {
                    format!("Executor exited with {}", output.status)
                } else {
                    tail
                };
                ExecutionOutcome::failed(message, Some(duration_ms))
            }
            Err(e) => ExecutionOutcome::failed(
                format!("Failed to spawn '{}': {}", self.program, e),
                Some(duration_ms),
            ),
        }
    }
}

/// Stand-in executor that sleeps for a random duration and succeeds with a
/// fixed probability
pub struct SimulatedExecutor {
    success_ratio: f64,
    min_duration: Duration,
    max_duration: Duration,
}

impl SimulatedExecutor {
    pub fn new(success_ratio: f64, min_duration: Duration, max_duration: Duration) -> Self {
        Self {
            success_ratio: success_ratio.clamp(0.0, 1.0),
            min_duration,
            max_duration,
        }
    }

    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self::new(
            config.simulated_success_ratio,
            config.simulated_min_duration,
            config.simulated_max_duration,
        )
    }
}

#[async_trait]
impl TaskExecutor for SimulatedExecutor {
    async fn execute(
        &self,
        job_id: &str,
        _cohort_position: u32,
        _assignment: Option<&DistributionAssignment>,
    ) -> ExecutionOutcome {
        let (duration, success) = {
            let mut rng = rand::rng();
            (
                duration_between(&mut rng, self.min_duration, self.max_duration),
                rng.random_bool(self.success_ratio),
            )
        };

        tokio::time::sleep(duration).await;
        let duration_ms = duration.as_millis() as u64;

        if success {
            ExecutionOutcome::succeeded(duration_ms)
        } else {
            debug!("Simulated failure for job {}", job_id);
            ExecutionOutcome::failed("Simulated failure", Some(duration_ms))
        }
    }
}
