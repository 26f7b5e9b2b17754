//! Snapsight gateway binary.
//!
//! Wires the storage client, analysis client, history store, and auth
//! gateway into the API server. Configuration is loaded from optional TOML
//! files and `SNAPSIGHT`-prefixed environment variables.

use anyhow::{Context, Result};
use snapsight::analysis_client::AnalysisClient;
use snapsight::api::{start_api_server, AppState};
use snapsight::auth::AuthGateway;
use snapsight::config::Config;
use snapsight::history::HistoryStore;
use snapsight::orchestrator::{RetryPolicy, TokioSleeper};
use snapsight::storage_client::StorageClient;
use snapsight::validator::ImageValidator;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Snapsight gateway"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let storage_client = Arc::new(
        StorageClient::new(&config.storage)
            .await
            .context("Failed to initialize storage client")?,
    );

    let analysis_client = Arc::new(
        AnalysisClient::new(&config.analysis).context("Failed to initialize analysis client")?,
    );

    let state = AppState {
        object_store: storage_client,
        analysis_api: analysis_client,
        history: Arc::new(HistoryStore::new()),
        auth: Arc::new(AuthGateway::new(config.auth.clone())),
        validator: Arc::new(ImageValidator::new(config.upload.clone())),
        retry: RetryPolicy::from_config(&config.analysis),
        sleeper: Arc::new(TokioSleeper),
        key_prefix: config.upload.key_prefix.clone(),
    };

    // Spawn API server task
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Snapsight gateway started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down Snapsight gateway");

    api_handle.abort();

    info!("Snapsight gateway stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
