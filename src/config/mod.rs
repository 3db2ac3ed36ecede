use anyhow::Result;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub mod defaults;
pub mod duration_serde;

use crate::errors::{AppError, AppResult};
use crate::pacing::WindowTier;
use defaults::*;
use duration_serde::parse_default;

/// Environment variable prefix for configuration overrides.
///
/// Nested keys are separated by a double underscore, e.g.
/// `IMPRESSION_SCHEDULER_WORKER__POLL_INTERVAL=2s`.
pub const ENV_PREFIX: &str = "IMPRESSION_SCHEDULER_";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub factory: FactoryConfig,
    #[serde(default)]
    pub economics: EconomicsConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Device catalogue override; the built-in catalogue is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<CatalogConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
}

/// Worker pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Sleep between polls when no job is eligible
    #[serde(default = "default_poll_interval", with = "duration_serde::duration")]
    pub poll_interval: Duration,
    /// Minimum spacing between two job launches across all loops
    #[serde(default = "default_launch_stagger", with = "duration_serde::duration")]
    pub launch_stagger: Duration,
    /// Look up jobs regardless of their scheduled time; human-paced jobs
    /// that are not yet due are still held back by the worker
    #[serde(default = "default_process_immediately")]
    pub process_immediately: bool,
    /// Bind every loop of this process to a single run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Extra loops provisioned above the concurrency target
    #[serde(default = "default_loop_headroom")]
    pub loop_headroom: usize,
    #[serde(default = "default_max_worker_loops")]
    pub max_loops: usize,
    /// Hard cap on the live semaphore capacity for this process
    #[serde(default = "default_max_safe_concurrency")]
    pub max_safe_concurrency: usize,
    /// Concurrency used when no run is active
    #[serde(default = "default_fallback_concurrency")]
    pub fallback_concurrency: usize,
    #[serde(default = "default_retune_interval", with = "duration_serde::duration")]
    pub retune_interval: Duration,
    #[serde(default = "default_post_job_delay", with = "duration_serde::duration")]
    pub post_job_delay: Duration,
    #[serde(default = "default_error_backoff", with = "duration_serde::duration")]
    pub error_backoff: Duration,
    /// How long shutdown waits for in-flight jobs
    #[serde(default = "default_shutdown_grace", with = "duration_serde::duration")]
    pub shutdown_grace: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_units_per_hour_per_worker")]
    pub units_per_hour_per_worker: f64,
    #[serde(default = "default_min_concurrency")]
    pub min_concurrency: usize,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Completion windows assumed for fast-paced runs, by target size
    #[serde(default = "default_fast_window_tiers")]
    pub fast_window_tiers: Vec<WindowTier>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    #[serde(default = "default_max_jitter", with = "duration_serde::duration")]
    pub max_jitter: Duration,
    #[serde(default = "default_long_pause_probability")]
    pub long_pause_probability: f64,
    #[serde(default = "default_long_pause_min", with = "duration_serde::duration")]
    pub long_pause_min: Duration,
    #[serde(default = "default_long_pause_max", with = "duration_serde::duration")]
    pub long_pause_max: Duration,
    #[serde(default = "default_min_window_hours")]
    pub min_window_hours: f64,
    #[serde(default = "default_max_window_hours")]
    pub max_window_hours: f64,
    /// Pacing windows for human-paced runs without an explicit window
    #[serde(default = "default_human_window_tiers")]
    pub human_window_tiers: Vec<WindowTier>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactoryConfig {
    #[serde(default = "default_units_per_cohort")]
    pub units_per_cohort: u32,
    #[serde(default = "default_insert_batch_size")]
    pub insert_batch_size: usize,
}

/// Constants used to derive the financial metrics of a completed run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EconomicsConfig {
    #[serde(default = "default_value_per_thousand_units")]
    pub value_per_thousand_units: f64,
    #[serde(default = "default_data_mb_per_unit")]
    pub data_mb_per_unit: f64,
    #[serde(default = "default_cost_per_gb")]
    pub cost_per_gb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// External command run once per job; the simulated executor is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(
        default = "default_executor_timeout",
        with = "duration_serde::option_duration",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
    #[serde(default = "default_stderr_tail_bytes")]
    pub stderr_tail_bytes: usize,
    #[serde(default = "default_simulated_success_ratio")]
    pub simulated_success_ratio: f64,
    #[serde(default = "default_simulated_min_duration", with = "duration_serde::duration")]
    pub simulated_min_duration: Duration,
    #[serde(default = "default_simulated_max_duration", with = "duration_serde::duration")]
    pub simulated_max_duration: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Keep the built-in device identities and add `devices` on top
    #[serde(default = "default_include_builtin")]
    pub include_builtin: bool,
    /// Browser key to rendering engine, e.g. `safari = "webkit"`
    #[serde(default)]
    pub browser_engines: BTreeMap<String, String>,
    #[serde(default)]
    pub devices: Vec<CatalogDeviceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogDeviceConfig {
    pub device_type: String,
    pub engine: String,
    pub name: String,
    #[serde(default = "default_device_weight")]
    pub weight: f64,
}

fn default_database_url() -> String {
    DEFAULT_DATABASE_URL.to_string()
}
fn default_poll_interval() -> Duration {
    parse_default(DEFAULT_POLL_INTERVAL)
}
fn default_launch_stagger() -> Duration {
    parse_default(DEFAULT_LAUNCH_STAGGER)
}
fn default_process_immediately() -> bool {
    DEFAULT_PROCESS_IMMEDIATELY
}
fn default_loop_headroom() -> usize {
    DEFAULT_LOOP_HEADROOM
}
fn default_max_worker_loops() -> usize {
    DEFAULT_MAX_WORKER_LOOPS
}
fn default_max_safe_concurrency() -> usize {
    DEFAULT_MAX_SAFE_CONCURRENCY
}
fn default_fallback_concurrency() -> usize {
    DEFAULT_FALLBACK_CONCURRENCY
}
fn default_retune_interval() -> Duration {
    parse_default(DEFAULT_RETUNE_INTERVAL)
}
fn default_post_job_delay() -> Duration {
    parse_default(DEFAULT_POST_JOB_DELAY)
}
fn default_error_backoff() -> Duration {
    parse_default(DEFAULT_ERROR_BACKOFF)
}
fn default_shutdown_grace() -> Duration {
    parse_default(DEFAULT_SHUTDOWN_GRACE)
}
fn default_units_per_hour_per_worker() -> f64 {
    DEFAULT_UNITS_PER_HOUR_PER_WORKER
}
fn default_min_concurrency() -> usize {
    DEFAULT_MIN_CONCURRENCY
}
fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}
fn default_fast_window_tiers() -> Vec<WindowTier> {
    vec![
        WindowTier::up_to(DEFAULT_FAST_SMALL_TARGET_LIMIT, DEFAULT_FAST_SMALL_WINDOW_HOURS),
        WindowTier::unbounded(DEFAULT_FAST_LARGE_WINDOW_HOURS),
    ]
}
fn default_max_jitter() -> Duration {
    parse_default(DEFAULT_MAX_JITTER)
}
fn default_long_pause_probability() -> f64 {
    DEFAULT_LONG_PAUSE_PROBABILITY
}
fn default_long_pause_min() -> Duration {
    parse_default(DEFAULT_LONG_PAUSE_MIN)
}
fn default_long_pause_max() -> Duration {
    parse_default(DEFAULT_LONG_PAUSE_MAX)
}
fn default_min_window_hours() -> f64 {
    DEFAULT_MIN_WINDOW_HOURS
}
fn default_max_window_hours() -> f64 {
    DEFAULT_MAX_WINDOW_HOURS
}
fn default_human_window_tiers() -> Vec<WindowTier> {
    DEFAULT_HUMAN_WINDOW_TIERS
        .iter()
        .map(|(limit, hours)| WindowTier {
            max_units: *limit,
            hours: *hours,
        })
        .collect()
}
fn default_units_per_cohort() -> u32 {
    DEFAULT_UNITS_PER_COHORT
}
fn default_insert_batch_size() -> usize {
    DEFAULT_INSERT_BATCH_SIZE
}
fn default_value_per_thousand_units() -> f64 {
    DEFAULT_VALUE_PER_THOUSAND_UNITS
}
fn default_data_mb_per_unit() -> f64 {
    DEFAULT_DATA_MB_PER_UNIT
}
fn default_cost_per_gb() -> f64 {
    DEFAULT_COST_PER_GB
}
fn default_executor_timeout() -> Option<Duration> {
    Some(parse_default(DEFAULT_EXECUTOR_TIMEOUT))
}
fn default_stderr_tail_bytes() -> usize {
    DEFAULT_STDERR_TAIL_BYTES
}
fn default_simulated_success_ratio() -> f64 {
    DEFAULT_SIMULATED_SUCCESS_RATIO
}
fn default_simulated_min_duration() -> Duration {
    parse_default(DEFAULT_SIMULATED_MIN_DURATION)
}
fn default_simulated_max_duration() -> Duration {
    parse_default(DEFAULT_SIMULATED_MAX_DURATION)
}
fn default_include_builtin() -> bool {
    true
}
fn default_device_weight() -> f64 {
    1.0
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: Some(DEFAULT_MAX_CONNECTIONS),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            launch_stagger: default_launch_stagger(),
            process_immediately: default_process_immediately(),
            run_id: None,
            loop_headroom: default_loop_headroom(),
            max_loops: default_max_worker_loops(),
            max_safe_concurrency: default_max_safe_concurrency(),
            fallback_concurrency: default_fallback_concurrency(),
            retune_interval: default_retune_interval(),
            post_job_delay: default_post_job_delay(),
            error_backoff: default_error_backoff(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            units_per_hour_per_worker: default_units_per_hour_per_worker(),
            min_concurrency: default_min_concurrency(),
            max_concurrency: default_max_concurrency(),
            fast_window_tiers: default_fast_window_tiers(),
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            max_jitter: default_max_jitter(),
            long_pause_probability: default_long_pause_probability(),
            long_pause_min: default_long_pause_min(),
            long_pause_max: default_long_pause_max(),
            min_window_hours: default_min_window_hours(),
            max_window_hours: default_max_window_hours(),
            human_window_tiers: default_human_window_tiers(),
        }
    }
}

impl PacingConfig {
    /// Pacing with no jitter and no long pauses, fully deterministic
    pub fn without_randomness() -> Self {
        Self {
            max_jitter: Duration::ZERO,
            long_pause_probability: 0.0,
            ..Self::default()
        }
    }
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            units_per_cohort: default_units_per_cohort(),
            insert_batch_size: default_insert_batch_size(),
        }
    }
}

impl Default for EconomicsConfig {
    fn default() -> Self {
        Self {
            value_per_thousand_units: default_value_per_thousand_units(),
            data_mb_per_unit: default_data_mb_per_unit(),
            cost_per_gb: default_cost_per_gb(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            timeout: default_executor_timeout(),
            stderr_tail_bytes: default_stderr_tail_bytes(),
            simulated_success_ratio: default_simulated_success_ratio(),
            simulated_min_duration: default_simulated_min_duration(),
            simulated_max_duration: default_simulated_max_duration(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_file =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());
        Self::load_from_file(&config_file)
    }

    /// Load configuration from a TOML file layered over defaults and under
    /// environment overrides. A missing file is created with the defaults.
    pub fn load_from_file(config_file: &str) -> Result<Self> {
        if !Path::new(config_file).exists() {
            let contents = toml::to_string_pretty(&Self::default())?;
            std::fs::write(config_file, contents)?;
            info!("Created default config file: {}", config_file);
        }

        let config: Self = Self::figment(config_file).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Provider stack: defaults, then the TOML file, then `IMPRESSION_SCHEDULER_*` variables
    pub fn figment(config_file: &str) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Reject settings that would make the scheduler misbehave at runtime
    pub fn validate(&self) -> AppResult<()> {
        let c = &self.concurrency;
        if c.min_concurrency == 0 || c.min_concurrency > c.max_concurrency {
            return Err(AppError::configuration(format!(
                "concurrency bounds must satisfy 1 <= min ({}) <= max ({})",
                c.min_concurrency, c.max_concurrency
            )));
        }
        if !(c.units_per_hour_per_worker.is_finite() && c.units_per_hour_per_worker > 0.0) {
            return Err(AppError::configuration(
                "concurrency.units_per_hour_per_worker must be positive",
            ));
        }
        validate_tiers("concurrency.fast_window_tiers", &c.fast_window_tiers)?;

        let p = &self.pacing;
        validate_tiers("pacing.human_window_tiers", &p.human_window_tiers)?;
        if !(0.0..=1.0).contains(&p.long_pause_probability) {
            return Err(AppError::configuration(
                "pacing.long_pause_probability must be within [0, 1]",
            ));
        }
        if p.long_pause_min > p.long_pause_max {
            return Err(AppError::configuration(
                "pacing.long_pause_min must not exceed pacing.long_pause_max",
            ));
        }
        if !(p.min_window_hours > 0.0 && p.min_window_hours <= p.max_window_hours) {
            return Err(AppError::configuration(
                "pacing window clamp must satisfy 0 < min_window_hours <= max_window_hours",
            ));
        }

        if self.factory.units_per_cohort == 0 || self.factory.insert_batch_size == 0 {
            return Err(AppError::configuration(
                "factory.units_per_cohort and factory.insert_batch_size must be positive",
            ));
        }
        if self.worker.max_loops == 0 || self.worker.max_safe_concurrency == 0 {
            return Err(AppError::configuration(
                "worker.max_loops and worker.max_safe_concurrency must be positive",
            ));
        }

        let e = &self.executor;
        if !(0.0..=1.0).contains(&e.simulated_success_ratio) {
            return Err(AppError::configuration(
                "executor.simulated_success_ratio must be within [0, 1]",
            ));
        }
        if e.simulated_min_duration > e.simulated_max_duration {
            return Err(AppError::configuration(
                "executor.simulated_min_duration must not exceed simulated_max_duration",
            ));
        }
        Ok(())
    }
}

fn validate_tiers(name: &str, tiers: &[WindowTier]) -> AppResult<()> {
    if tiers.is_empty() {
        return Err(AppError::configuration(format!("{name} must not be empty")));
    }
    if tiers.iter().any(|t| !(t.hours.is_finite() && t.hours > 0.0)) {
        return Err(AppError::configuration(format!(
            "{name} windows must be positive hours"
        )));
    }
    let bounded: Vec<u64> = tiers.iter().filter_map(|t| t.max_units).collect();
    if bounded.windows(2).any(|w| w[0] >= w[1]) {
        return Err(AppError::configuration(format!(
            "{name} limits must be strictly increasing"
        )));
    }
    if tiers[..tiers.len() - 1].iter().any(|t| t.max_units.is_none()) {
        return Err(AppError::configuration(format!(
            "{name}: only the last tier may be unbounded"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.worker.poll_interval, Duration::from_secs(1));
        assert_eq!(config.worker.retune_interval, Duration::from_secs(300));
        assert_eq!(config.pacing.human_window_tiers.len(), 4);
        assert_eq!(config.concurrency.fast_window_tiers[0].max_units, Some(59_999));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let toml_text = r#"
            [worker]
            poll_interval = "250ms"
            run_id = "run-1"

            [concurrency]
            max_concurrency = 40
        "#;
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::string(toml_text))
            .extract()
            .unwrap();

        assert_eq!(config.worker.poll_interval, Duration::from_millis(250));
        assert_eq!(config.worker.run_id.as_deref(), Some("run-1"));
        assert_eq!(config.worker.launch_stagger, Duration::from_secs(5));
        assert_eq!(config.concurrency.max_concurrency, 40);
        assert_eq!(config.concurrency.min_concurrency, 2);
        assert!(config.catalog.is_none());
    }

    #[test]
    fn test_env_overrides_file_values() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "scheduler.toml",
                "[worker]\nmax_safe_concurrency = 4\n",
            )?;
            jail.set_env("IMPRESSION_SCHEDULER_WORKER__MAX_SAFE_CONCURRENCY", "12");
            jail.set_env("IMPRESSION_SCHEDULER_ECONOMICS__COST_PER_GB", "6.5");

            let config: Config = Config::figment("scheduler.toml").extract()?;
            assert_eq!(config.worker.max_safe_concurrency, 12);
            assert_eq!(config.economics.cost_per_gb, 6.5);
            Ok(())
        });
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let mut config = Config::default();
        config.concurrency.min_concurrency = 10;
        config.concurrency.max_concurrency = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unbounded_middle_tier() {
        let mut config = Config::default();
        config.pacing.human_window_tiers = vec![
            WindowTier::unbounded(8.0),
            WindowTier::up_to(100, 12.0),
        ];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_writes_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path_str = path.to_str().unwrap();

        let config = Config::load_from_file(path_str).unwrap();
        assert!(path.exists());
        assert_eq!(config.factory.units_per_cohort, DEFAULT_UNITS_PER_COHORT);

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("[worker]"));
        assert!(written.contains("poll_interval = \"1s\""));
    }
}
