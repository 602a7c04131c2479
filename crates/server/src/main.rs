// crates/server/src/main.rs
//! Refactor-jobs server binary.
//!
//! Parses configuration, installs tracing and metrics, builds the single job
//! manager with the refactor handler registered, and serves the HTTP API.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use refactor_jobs_core::ProcessRunner;
use refactor_jobs_observability::init_tracing;
use refactor_jobs_server::{create_app, init_metrics, AppState, ServerConfig};
use refactor_jobs_server_jobs::{HandlerRegistry, JobManager, RefactorHandler, REFACTOR_JOB_TYPE};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::parse();

    // Keep the guard alive so the file layer flushes on exit.
    let _log_guard = init_tracing(config.log_format, config.log_dir.as_deref())?;
    init_metrics();

    let refactor = RefactorHandler::new(config.refactor_config(), Arc::new(ProcessRunner::new()));
    tracing::info!(
        repo_root = %refactor.config().repo_root.display(),
        "Refactor handler configured"
    );
    let registry = HandlerRegistry::new().with(REFACTOR_JOB_TYPE, Arc::new(refactor));

    let jobs = Arc::new(JobManager::new(config.manager_config(), registry));
    tracing::warn!("Job store is in memory and unbounded; jobs are lost on restart and never evicted");

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(
        %addr,
        workers = config.workers,
        cancel_policy = %config.cancel_policy,
        "Listening on http://{addr}"
    );

    let app = create_app(AppState::new(jobs));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
