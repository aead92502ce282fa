//! LLM Switchboard - Gateway entry point

use anyhow::{Context, Result};
use clap::Parser;
use llm_switchboard::{
    HttpBackend, JobOrchestrator, api, build_controller, config::SwitchboardConfig, jobs, metrics,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(name = "llm-switchboard")]
#[command(about = "Single-slot GPU inference gateway", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override API port
    #[arg(long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "json")]
    log_format: String,

    /// Stop the backend container on shutdown
    #[arg(long)]
    stop_backend_on_exit: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
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

    tracing::info!("Starting LLM Switchboard gateway");

    // Load configuration
    let mut config = SwitchboardConfig::load(cli.config)?;

    // CLI overrides
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    config.validate()?;

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        models = config.models.len(),
        lock_file = ?config.paths.lock_file,
        job_store = ?config.jobs.store_path,
        "Configuration loaded"
    );

    // Setup metrics
    let prometheus_handle = metrics::setup_metrics()?;

    let controller = build_controller(&config)?;
    let snapshot = controller.snapshot().await;
    tracing::info!(
        active_model = ?snapshot.active_model,
        state = %snapshot.state,
        "Backend slot state"
    );

    let store = jobs::open_store(&config.jobs)?;
    let backend = Arc::new(HttpBackend::new(config.backend.host.clone())?);

    let orchestrator = Arc::new(JobOrchestrator::new(
        controller.clone(),
        store,
        backend,
        jobs::RetentionPolicy::from(&config.jobs),
        Duration::from_secs(config.timeouts.inference_secs),
    ));

    // Setup API
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let app_state = api::AppState {
        orchestrator,
        config: Arc::new(config),
        prometheus_handle,
    };

    let app = api::create_router(app_state);

    tracing::info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind API server")?;

    // Graceful shutdown
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("API server error")?;

    tracing::info!("Shutting down...");

    if cli.stop_backend_on_exit {
        tracing::info!("Stopping backend");
        if let Err(e) = controller.stop_current().await {
            tracing::error!(error = %e, "Failed to stop backend during shutdown");
        }
    }

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
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
