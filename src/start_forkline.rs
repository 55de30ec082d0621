//! Startup helpers for the forkline server.

use std::process::ExitCode;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::core::config::EngineConfig;
use crate::engine::core::ChatEngine;
use crate::server::{self, AppState};

/// Run the server and the summarization worker until Ctrl+C.
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            init_tracing("info");
            error!(error = %err, "invalid configuration");
            return ExitCode::from(1);
        }
    };
    init_tracing(&config.server.log_level);
    info!(version = env!("CARGO_PKG_VERSION"), "starting forkline");

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            error!(error = %err, "failed to create runtime");
            return ExitCode::from(1);
        }
    };

    match rt.block_on(serve(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "server error");
            ExitCode::from(1)
        }
    }
}

/// Install the fmt subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Build the engine, start the worker and serve HTTP until Ctrl+C.
///
/// # Errors
/// Returns an error if a backend cannot be initialized or the server fails.
pub async fn serve(config: EngineConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let port = config.server.port;
    info!(
        db = %config.storage.sqlite_path.display(),
        model = %config.llm.model,
        "initializing backends"
    );
    let engine = ChatEngine::from_config(config).await?;

    let worker = engine.summary_worker();
    let stop_worker = worker.shutdown_notifier();
    let worker_handle = worker.spawn();

    let state = AppState::new(engine);
    let served = server::run_server_with_shutdown(state, port, shutdown_signal()).await;

    stop_worker.notify_one();
    if let Err(err) = worker_handle.await {
        warn!(error = %err, "summary worker ended abnormally");
    }

    served?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "cannot listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
