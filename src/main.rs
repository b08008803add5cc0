//! Drover coordinator entry point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use drover::adapters::ledger::RpcLedgerClient;
use drover::adapters::sqlite::{
    self, PoolConfig, SqliteFederatedRepository, SqlitePromptRepository,
    SqliteReputationRepository, SqliteRunnerRepository, SqliteTaskRepository,
};
use drover::api::{router, AppState};
use drover::domain::models::Config;
use drover::domain::ports::LedgerClient;
use drover::infrastructure::config::ConfigLoader;
use drover::infrastructure::logging::init_tracing;
use drover::services::{
    Dispatcher, DispatcherConfig, FlCoordinator, HeartbeatMonitor, HeartbeatMonitorConfig,
    PromptQueue, PromptQueueConfig, WebhookHub,
};

/// Bound on connection draining after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

#[derive(Parser)]
#[command(name = "drover", about = "Decentralized compute marketplace coordinator", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator: HTTP API plus background workers.
    Serve {
        /// Path to a config file (defaults to drover.yaml + environment).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Apply pending database migrations and exit.
    Migrate {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => serve(load_config(config)?).await,
        Commands::Migrate { config } => migrate(load_config(config)?).await,
    }
}

fn pool_config(config: &Config) -> PoolConfig {
    PoolConfig {
        max_connections: config.database.max_connections,
        ..PoolConfig::default()
    }
}

async fn migrate(config: Config) -> Result<()> {
    let pool = sqlite::initialize_database(&config.database.url, Some(pool_config(&config)))
        .await
        .context("Failed to open and migrate database")?;
    let version = sqlite::Migrator::new(pool)
        .get_current_version()
        .await
        .context("Failed to read schema version")?;
    println!("database at schema version {version}");
    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    let _log_guard = init_tracing(&config.logging).context("Failed to initialize logging")?;

    let pool = sqlite::initialize_database(&config.database.url, Some(pool_config(&config)))
        .await
        .context("Failed to open and migrate database")?;

    // Repositories
    let tasks = Arc::new(SqliteTaskRepository::new(pool.clone()));
    let runners = Arc::new(SqliteRunnerRepository::new(pool.clone()));
    let prompts = Arc::new(SqlitePromptRepository::new(pool.clone()));
    let federated_repo = Arc::new(SqliteFederatedRepository::new(pool.clone()));
    let reputation = Arc::new(SqliteReputationRepository::new(pool.clone()));
    let ledger: Arc<dyn LedgerClient> = Arc::new(RpcLedgerClient::new(config.ledger.clone()));

    // Services
    let hub = Arc::new(WebhookHub::new(tasks.clone()));
    let dispatcher = Arc::new(
        Dispatcher::new(
            tasks.clone(),
            runners.clone(),
            reputation,
            ledger,
            DispatcherConfig::default(),
        )
        .with_hub(hub.clone()),
    );
    let heartbeat_monitor = Arc::new(
        HeartbeatMonitor::new(
            runners.clone(),
            HeartbeatMonitorConfig::with_timeout_minutes(config.scheduler.interval),
        )
        .with_dispatcher_wake(dispatcher.wake_handle()),
    );
    let prompt_queue = Arc::new(PromptQueue::new(
        prompts,
        runners.clone(),
        PromptQueueConfig::default(),
    ));
    let federated = Arc::new(FlCoordinator::new(
        federated_repo,
        runners.clone(),
        dispatcher.clone(),
    ));

    // Background workers
    dispatcher.start();
    heartbeat_monitor.start();
    prompt_queue.start();

    let state = AppState {
        dispatcher: dispatcher.clone(),
        hub: hub.clone(),
        prompt_queue: prompt_queue.clone(),
        federated,
        tasks,
        runners,
    };
    let app = router(state, &config.server.endpoint);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(addr = %addr, endpoint = %config.server.endpoint, "coordinator listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(dispatcher, heartbeat_monitor, prompt_queue, hub))
        .await
        .context("HTTP server failed")?;

    tracing::info!("coordinator stopped");
    Ok(())
}

/// Wait for ctrl-c, then fan the stop signal out to every worker. A missed
/// sweep is acceptable; a deadlocked shutdown is not, so a watchdog bounds
/// the connection drain.
async fn shutdown_signal(
    dispatcher: Arc<Dispatcher>,
    heartbeat_monitor: Arc<HeartbeatMonitor>,
    prompt_queue: Arc<PromptQueue>,
    hub: Arc<WebhookHub>,
) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        return;
    }

    tracing::info!("shutdown signal received, stopping workers");
    hub.stop();
    dispatcher.stop();
    heartbeat_monitor.stop();
    prompt_queue.stop();

    tokio::spawn(async {
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        tracing::warn!("shutdown grace elapsed, exiting");
        std::process::exit(0);
    });
}
