// Job dispatcher worker
//
// Design Decision: Use clap derive for argument parsing; everything else comes from
// the settings file.
// Design Decision: Ctrl-C requests a graceful shutdown: running jobs are cancelled
// and their final state is recorded before exit.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use jobdispatch::telemetry::{init_telemetry, TelemetryConfig};
use jobdispatch::{
    Dispatcher, DispatcherOptions, PluginLoader, PostgresJobQueue, RunExit, Settings,
};

#[derive(Parser)]
#[command(name = "jobdispatch-worker")]
#[command(about = "Polling job dispatcher - claims queued jobs and runs their plugins")]
#[command(version)]
struct Cli {
    /// Settings file (KEY=VALUE lines)
    #[arg(long, short = 'c', env = "JOBDISPATCH_CONFIG_FILE")]
    config_file: PathBuf,

    /// Apply database migrations before starting
    #[arg(long)]
    migrate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Configure via environment variables:
    // - RUST_LOG: log filter, overrides executor_config.log_level
    // - LOG_FORMAT=json: structured output
    let log_control = init_telemetry(TelemetryConfig::from_env());
    if log_control.is_pinned() {
        tracing::info!("RUST_LOG is set, executor_config.log_level will be ignored");
    }

    let settings = Settings::load(&cli.config_file)
        .with_context(|| format!("Failed to load settings from {}", cli.config_file.display()))?;
    tracing::info!(settings = ?settings, "jobdispatch-worker starting...");

    let queue = PostgresJobQueue::connect_lazy(
        &settings.database_url,
        settings.database_max_connections,
    )
    .context("Invalid database configuration")?;
    if cli.migrate {
        queue.migrate().await.context("Failed to apply migrations")?;
        tracing::info!("Database migrations applied");
    }

    let loader = PluginLoader::new(&settings.plugins_dir);
    let mut dispatcher = Dispatcher::new(
        Arc::new(queue),
        Arc::new(loader),
        DispatcherOptions::from_settings(&settings),
    )
    .await
    .context("Failed to create dispatcher")?
    .with_log_control(log_control);

    let shutdown = dispatcher.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal");
            shutdown.shutdown();
        }
    });

    match dispatcher.run().await {
        RunExit::Drained => tracing::info!("Outdated version drained, worker exiting"),
        RunExit::Shutdown => tracing::info!("Worker shutdown complete"),
    }
    Ok(())
}
