use std::net::SocketAddr;
use std::process::ExitCode;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lms_gateway::config::LogFormat;
use lms_gateway::lifecycle::{LifecycleController, ShutdownOutcome, spawn_signal_listener};
use lms_gateway::{AppState, Config, build_router, telemetry};

/// Capacity of the termination signal channel.
const SIGNAL_CHANNEL_CAPACITY: usize = 4;

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::from_env();

    // Logging comes up before the config error is reported
    let (format, level) = match &config {
        Ok(c) => (c.log_format, c.log_level.clone()),
        Err(_) => (LogFormat::Text, "info".to_string()),
    };
    init_tracing(format, &level);

    info!("Starting LMS Gateway v{}", env!("CARGO_PKG_VERSION"));

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {e}");
            return ExitCode::from(exitcode::CONFIG as u8);
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

fn init_tracing(format: LogFormat, level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .init(),
    }
}

/// Run the application, returning an exit code on error.
async fn run(config: Config) -> Result<(), exitcode::ExitCode> {
    info!(
        host = %config.host,
        port = %config.port,
        service_path = %config.service_path,
        debug_endpoints = config.debug_endpoints,
        shutdown_grace_secs = config.shutdown_grace.as_secs(),
        "Configuration loaded"
    );

    if let Some(metrics_addr) = config.metrics_addr() {
        telemetry::try_init_metrics(metrics_addr);
    }

    // Build application state and router
    let state = AppState::in_memory(config.clone()).map_err(|e| {
        error!("Failed to build application state: {e}");
        exitcode::CONFIG
    })?;
    let app = build_router(state.clone()).map_err(|e| {
        error!("Failed to build router: {e}");
        exitcode::CONFIG
    })?;

    // Start server
    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!(
        "Server listening on http://{addr}{}",
        config.service_prefix().unwrap_or_default()
    );

    let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
    let signal_listener = spawn_signal_listener(signal_tx);

    let controller = LifecycleController::new(state.cancellation_token(), config.shutdown_grace);
    let outcome = controller.run(listener, app, signal_rx).await;
    signal_listener.abort();

    match outcome {
        Ok(ShutdownOutcome::TimedOut) => {
            info!("Open connections force-closed after grace period, shutting down background tasks...");
        }
        Ok(_) => info!("HTTP server stopped, shutting down background tasks..."),
        Err(e) => {
            error!("Server error: {e}");
            state.shutdown().await;
            return Err(exitcode::SOFTWARE);
        }
    }

    state.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}
