//! qmill binary: launch a worker pool against the configured Redis queue
//! and Postgres connection pool, then drain and stop on Ctrl-C.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use qmill::config::{Config, MAX_WORKERS};
use qmill::core::WorkerPool;
use qmill::db::{BackendPool, PgBackendPool};
use qmill::processor::EchoProcessor;
use qmill::queue::{QueueBackend, RedisListQueue};

#[derive(Debug, Parser)]
#[command(name = "qmill", version, about = "Queue-backed worker pool")]
struct Args {
    /// Quantity of workers to be launched in the current session
    #[arg(
        short = 'w',
        long,
        default_value_t = 1,
        value_parser = clap::value_parser!(u64).range(1..=MAX_WORKERS as u64)
    )]
    workers: u64,

    /// Path to the configuration file
    #[arg(long)]
    conf_path: PathBuf,
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Configuration failures are reported before logging exists.
    let config = match Config::from_path(&args.conf_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("qmill: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.logging.level);

    match run(args, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal error, exiting");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args, config: Config) -> qmill::Result<()> {
    let queue: Arc<dyn QueueBackend> = Arc::new(RedisListQueue::connect(&config.redis).await?);
    let db = Arc::new(PgBackendPool::connect(&config.database).await?);

    let pool = WorkerPool::new(
        queue,
        Arc::clone(&db),
        Arc::new(EchoProcessor),
        args.workers as usize,
        config.workers.clone(),
    );
    pool.start_pool().await?;
    info!(workers = args.workers, "qmill running, Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, draining workers");

    pool.close_pool().await?;
    db.close_all().await;
    info!("shutdown complete");
    Ok(())
}
