//! API route handlers for the refactor-jobs server.

pub mod health;
pub mod jobs;
pub mod metrics;
pub mod refactor;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined router.
///
/// Routes:
/// - GET  /api/health - Health check
/// - POST /api/jobs - Submit a job of any registered type
/// - POST /api/jobs/start - Alias of `POST /api/jobs`
/// - GET  /api/jobs - Most recent jobs, newest first
/// - GET  /api/jobs/{id} - One job snapshot
/// - POST /api/jobs/{id}/cancel - Cancel a pending or running job
/// - GET  /api/jobs/{id}/stream - SSE stream of job updates
/// - POST /api/refactor/oneclick - Start the refactor pipeline
/// - GET  /metrics - Prometheus metrics (no `/api` prefix)
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", jobs::router())
        .nest("/api", refactor::router())
        .merge(metrics::router())
        .with_state(state)
}
