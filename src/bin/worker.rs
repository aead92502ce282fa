//! LLM Switchboard - Queue worker entry point

use anyhow::Result;
use clap::Parser;
use llm_switchboard::{
    HttpBackend, JobRunner, RunnerSettings, build_controller, config::SwitchboardConfig, jobs,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(name = "switchboard-worker")]
#[command(about = "Executes queued LLM Switchboard jobs", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "json")]
    log_format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.log_format.as_str() {
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .json()
                .init();
        }
    }

    tracing::info!("Starting LLM Switchboard worker");

    let config = SwitchboardConfig::load(cli.config)?;
    config.validate()?;

    if config.jobs.store_path.is_none() {
        tracing::warn!(
            "No jobs.store_path configured; this worker uses a private in-memory queue the gateway cannot see"
        );
    }

    let controller = build_controller(&config)?;
    let store = jobs::open_store(&config.jobs)?;
    let backend = Arc::new(HttpBackend::new(config.backend.host.clone())?);

    let settings = RunnerSettings {
        job_timeout: Duration::from_secs(config.jobs.job_timeout_secs),
        poll_interval: Duration::from_millis(config.jobs.poll_interval_ms),
        inference_timeout: Duration::from_secs(config.timeouts.inference_secs),
    };

    let runner = JobRunner::new(controller, store, backend, settings);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    runner.run(shutdown_rx).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        _ = terminate => tracing::info!("Received SIGTERM signal"),
    }
}
