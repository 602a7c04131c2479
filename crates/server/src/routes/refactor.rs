// crates/server/src/routes/refactor.rs
//! One-click refactor endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use refactor_jobs_server_jobs::REFACTOR_JOB_TYPE;
use serde_json::Value;

use crate::error::{ApiError, ApiResult};
use crate::metrics::RequestTimer;
use crate::routes::jobs::JobStartedResponse;
use crate::state::AppState;

/// POST /api/refactor/oneclick - Start a refactor job with the body as input.
async fn refactor_oneclick(
    State(state): State<Arc<AppState>>,
    Json(input): Json<Value>,
) -> ApiResult<Json<JobStartedResponse>> {
    let timer = RequestTimer::new("refactor_oneclick");
    let result = state
        .jobs
        .submit(REFACTOR_JOB_TYPE, input)
        .map(|job_id| {
            let message = format!("Refactor job started. Use /api/jobs/{job_id} to track progress.");
            Json(JobStartedResponse {
                message: Some(message),
                ..JobStartedResponse::started(job_id)
            })
        })
        .map_err(ApiError::from);
    timer.finish(&result);
    result
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/refactor/oneclick", post(refactor_oneclick))
}
