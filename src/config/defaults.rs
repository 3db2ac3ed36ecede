/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
// Database defaults
pub const DEFAULT_DATABASE_URL: &str = "sqlite://./data/impression-scheduler.db";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

// Worker defaults
pub const DEFAULT_POLL_INTERVAL: &str = "1s";
pub const DEFAULT_LAUNCH_STAGGER: &str = "5s";
pub const DEFAULT_PROCESS_IMMEDIATELY: bool = true;
pub const DEFAULT_LOOP_HEADROOM: usize = 5;
pub const DEFAULT_MAX_WORKER_LOOPS: usize = 15;
pub const DEFAULT_MAX_SAFE_CONCURRENCY: usize = 10;
pub const DEFAULT_FALLBACK_CONCURRENCY: usize = 50;
pub const DEFAULT_RETUNE_INTERVAL: &str = "5m";
pub const DEFAULT_POST_JOB_DELAY: &str = "50ms";
pub const DEFAULT_ERROR_BACKOFF: &str = "5s";
pub const DEFAULT_SHUTDOWN_GRACE: &str = "30s";

// Concurrency defaults
pub const DEFAULT_UNITS_PER_HOUR_PER_WORKER: f64 = 60.0;
pub const DEFAULT_MIN_CONCURRENCY: usize = 2;
pub const DEFAULT_MAX_CONCURRENCY: usize = 500;
pub const DEFAULT_FAST_SMALL_TARGET_LIMIT: u64 = 59_999;
pub const DEFAULT_FAST_SMALL_WINDOW_HOURS: f64 = 3.5;
pub const DEFAULT_FAST_LARGE_WINDOW_HOURS: f64 = 10.0;

// Pacing defaults
pub const DEFAULT_MAX_JITTER: &str = "60s";
pub const DEFAULT_LONG_PAUSE_PROBABILITY: f64 = 0.02;
pub const DEFAULT_LONG_PAUSE_MIN: &str = "5m";
pub const DEFAULT_LONG_PAUSE_MAX: &str = "25m";
pub const DEFAULT_MIN_WINDOW_HOURS: f64 = 1.0;
pub const DEFAULT_MAX_WINDOW_HOURS: f64 = 24.0;
pub const DEFAULT_HUMAN_WINDOW_TIERS: &[(Option<u64>, f64)] = &[
    (Some(10_000), 8.0),
    (Some(25_000), 12.0),
    (Some(50_000), 16.0),
    (None, 20.0),
];

// Job factory defaults
pub const DEFAULT_UNITS_PER_COHORT: u32 = 10;
pub const DEFAULT_INSERT_BATCH_SIZE: usize = 25;

// Economics defaults
pub const DEFAULT_VALUE_PER_THOUSAND_UNITS: f64 = 2.365;
pub const DEFAULT_DATA_MB_PER_UNIT: f64 = 0.05;
pub const DEFAULT_COST_PER_GB: f64 = 8.0;

// Executor defaults
pub const DEFAULT_EXECUTOR_TIMEOUT: &str = "3m";
pub const DEFAULT_SIMULATED_SUCCESS_RATIO: f64 = 0.95;
pub const DEFAULT_SIMULATED_MIN_DURATION: &str = "500ms";
pub const DEFAULT_SIMULATED_MAX_DURATION: &str = "3s";
pub const DEFAULT_STDERR_TAIL_BYTES: usize = 512;
