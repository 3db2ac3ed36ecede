use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use impression_scheduler::{
    concurrency::{ConcurrencyCalculator, ResizableSemaphore},
    config::Config,
    database::{
        Database,
        repositories::{JobSeaOrmRepository, RunSeaOrmRepository},
    },
    distribution::{DeviceCatalog, DistributionAllocator},
    job_scheduling::{
        ConcurrencyTuner, JobFactory, JobStore, RunControlApi, RunLifecycleTracker, RunStore,
        WorkerPool, executor_from_config,
    },
    models::{DistributionSpec, JobStatus, PacingMode, RunCreateRequest},
    pacing::PacingScheduler,
};

#[derive(Parser)]
#[command(name = "impression-scheduler")]
#[command(version)]
#[command(about = "Paced, distribution-aware impression task scheduler")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Database URL (overrides config file)
    #[arg(short = 'd', long, value_name = "URL")]
    database_url: Option<String>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the worker pool and the concurrency tuner (default)
    Worker {
        /// Only process jobs of this run
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Create a run and materialize its jobs
    CreateRun {
        #[arg(long)]
        name: String,
        #[arg(long)]
        target: u64,
        #[arg(long, default_value = "human")]
        mode: PacingMode,
        /// Pacing window in hours for human-paced runs
        #[arg(long)]
        hours: Option<f64>,
        /// JSON file holding the distribution spec
        #[arg(long, value_name = "FILE")]
        distribution: Option<String>,
        #[arg(long)]
        concurrency: Option<usize>,
        #[arg(long)]
        units_per_cohort: Option<u32>,
        #[arg(long)]
        cohort_count: Option<u32>,
        /// Start the run once its jobs exist
        #[arg(long)]
        start: bool,
    },
    StartRun { run_id: String },
    StopRun { run_id: String },
    CancelRun { run_id: String },
    /// Job counts for one run, or across all runs
    Stats { run_id: Option<String> },
    /// List runs, newest first
    ListRuns,
    /// List jobs in a given status
    Jobs {
        #[arg(long, default_value = "failed")]
        status: JobStatus,
        #[arg(long, default_value_t = 50)]
        limit: u64,
    },
    /// Suggest a concurrency for a planned run
    Recommend {
        #[arg(long)]
        target: u64,
        #[arg(long, default_value = "human")]
        mode: PacingMode,
        #[arg(long)]
        hours: Option<f64>,
    },
}

struct Services {
    job_store: Arc<dyn JobStore>,
    run_store: Arc<dyn RunStore>,
    calculator: Arc<ConcurrencyCalculator>,
    lifecycle: Arc<RunLifecycleTracker>,
    api: RunControlApi,
}

fn init_tracing(level: &str, format: LogFormat) {
    let log_filter = format!("impression_scheduler={}", level);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| log_filter.into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

fn build_services(config: &Config, database: &Database) -> Services {
    let connection = database.connection();
    let job_store: Arc<dyn JobStore> = Arc::new(JobSeaOrmRepository::new(connection.clone()));
    let run_store: Arc<dyn RunStore> = Arc::new(RunSeaOrmRepository::new(connection));

    let catalog = Arc::new(DeviceCatalog::from_config(config.catalog.as_ref()));
    let allocator = Arc::new(DistributionAllocator::new(catalog));
    let calculator = Arc::new(ConcurrencyCalculator::new(
        config.concurrency.clone(),
        &config.pacing,
    ));
    let factory = Arc::new(JobFactory::new(
        job_store.clone(),
        PacingScheduler::new(config.pacing.clone()),
        config.factory.clone(),
    ));
    let lifecycle = Arc::new(RunLifecycleTracker::new(
        job_store.clone(),
        run_store.clone(),
        config.economics.clone(),
    ));
    let api = RunControlApi::new(
        job_store.clone(),
        run_store.clone(),
        allocator,
        calculator.clone(),
        factory,
        lifecycle.clone(),
        config.factory.units_per_cohort,
    );

    Services {
        job_store,
        run_store,
        calculator,
        lifecycle,
        api,
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Cancel the token on Ctrl-C or SIGTERM
fn spawn_shutdown_listener(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut sigterm =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(signal) => signal,
                    Err(e) => {
                        error!("Failed to install SIGTERM handler: {}", e);
                        if tokio::signal::ctrl_c().await.is_ok() {
                            info!("Received Ctrl-C, shutting down");
                        }
                        token.cancel();
                        return;
                    }
                };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C, shutting down"),
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            }
        }
        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl-C, shutting down");
            }
        }
        token.cancel();
    });
}

async fn run_worker(config: Config, services: Services) -> Result<()> {
    let semaphore = ResizableSemaphore::new(config.worker.fallback_concurrency.max(1));
    let executor = executor_from_config(&config.executor);

    let tuner = Arc::new(ConcurrencyTuner::new(
        services.job_store.clone(),
        services.run_store.clone(),
        services.calculator.clone(),
        services.lifecycle.clone(),
        semaphore.clone(),
        &config.worker,
    ));
    let report = tuner.tune_once().await?;

    let pool = WorkerPool::new(
        services.job_store,
        services.run_store,
        executor,
        services.lifecycle,
        semaphore,
        config.worker.clone(),
    );
    // Loops are provisioned once; later re-tuning only moves the semaphore
    let loops = pool.loop_count_for(config.worker.max_safe_concurrency.max(report.capacity));

    let token = CancellationToken::new();
    spawn_shutdown_listener(token.clone());

    let tuner_token = token.clone();
    let tuner_handle = tokio::spawn(async move {
        if let Err(e) = tuner.run(tuner_token).await {
            error!("Concurrency tuner failed: {}", e);
        }
    });

    pool.run(loops, token.clone()).await?;
    token.cancel();
    if let Err(e) = tuner_handle.await {
        error!("Concurrency tuner task panicked: {}", e);
    }

    info!("Impression scheduler shut down cleanly");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_format);

    info!(
        "Starting Impression Scheduler v{}",
        env!("CARGO_PKG_VERSION")
    );

    let mut config = Config::load_from_file(&cli.config)?;
    info!("Configuration loaded from: {}", cli.config);

    if let Some(database_url) = cli.database_url {
        config.database.url = database_url;
    }
    info!("Using database: {}", config.database.url);

    let database = Database::new(&config.database).await?;
    database.migrate().await?;
    info!("Database connection established and migrations applied");

    let services = build_services(&config, &database);

    match cli.command.unwrap_or(Command::Worker { run_id: None }) {
        Command::Worker { run_id } => {
            if run_id.is_some() {
                config.worker.run_id = run_id;
            }
            run_worker(config, services).await?;
        }
        Command::CreateRun {
            name,
            target,
            mode,
            hours,
            distribution,
            concurrency,
            units_per_cohort,
            cohort_count,
            start,
        } => {
            let distribution = match distribution {
                Some(path) => {
                    let raw = tokio::fs::read_to_string(&path)
                        .await
                        .with_context(|| format!("Failed to read distribution file {}", path))?;
                    let spec: DistributionSpec = serde_json::from_str(&raw)
                        .with_context(|| format!("Invalid distribution spec in {}", path))?;
                    Some(spec)
                }
                None => None,
            };
            let created = services
                .api
                .create_run(RunCreateRequest {
                    name,
                    target_units: target,
                    pacing_mode: mode,
                    pacing_hours: hours,
                    distribution,
                    concurrency,
                    units_per_cohort,
                    cohort_count,
                    start_immediately: start,
                })
                .await?;
            print_json(&created)?;
        }
        Command::StartRun { run_id } => print_json(&services.api.start_run(&run_id).await?)?,
        Command::StopRun { run_id } => print_json(&services.api.stop_run(&run_id).await?)?,
        Command::CancelRun { run_id } => print_json(&services.api.cancel_run(&run_id).await?)?,
        Command::Stats { run_id: Some(run_id) } => {
            print_json(&services.api.run_stats(&run_id).await?)?
        }
        Command::Stats { run_id: None } => {
            print_json(&services.api.global_stats().await?)?;
            print_json(&services.api.health_check().await)?;
        }
        Command::ListRuns => print_json(&services.api.list_runs().await?)?,
        Command::Jobs { status, limit } => {
            print_json(&services.api.jobs_by_status(status, limit).await?)?
        }
        Command::Recommend {
            target,
            mode,
            hours,
        } => print_json(&services.api.recommend(target, mode, hours))?,
    }

    Ok(())
}
