// crates/server/src/routes/jobs.rs
//! API routes for background jobs.
//!
//! - POST /jobs - Create and start a job (alias: POST /jobs/start)
//! - GET /jobs - Most recent jobs, newest first
//! - GET /jobs/{id} - One job snapshot
//! - POST /jobs/{id}/cancel - Cancel a pending or running job
//! - GET /jobs/{id}/stream - SSE stream of job updates

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use refactor_jobs_server_jobs::{Job, JobStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_stream::{Stream, StreamExt};

use crate::error::{ApiError, ApiResult};
use crate::metrics::RequestTimer;
use crate::state::AppState;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 100;

fn empty_object() -> Value {
    Value::Object(Default::default())
}

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    #[serde(rename = "type")]
    pub job_type: String,
    #[serde(default = "empty_object")]
    pub input_data: Value,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct JobStartedResponse {
    pub job_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JobStartedResponse {
    pub fn started(job_id: String) -> Self {
        Self {
            job_id,
            status: "started".to_string(),
            message: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub job: Job,
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<Job>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct CancelResponse {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

/// Final SSE event payload.
#[derive(Debug, Serialize)]
struct DoneEvent<'a> {
    job_id: &'a str,
    status: JobStatus,
}

/// POST /api/jobs - Create a job of a registered type and start it.
async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubmitJobRequest>,
) -> ApiResult<Json<JobStartedResponse>> {
    let timer = RequestTimer::new("jobs_submit");
    let result = state
        .jobs
        .submit(&request.job_type, request.input_data)
        .map(|job_id| Json(JobStartedResponse::started(job_id)))
        .map_err(ApiError::from);
    timer.finish(&result);
    result
}

/// GET /api/jobs?limit=N - Most recent jobs, newest first.
async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<JobListResponse>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    if !(1..=MAX_LIST_LIMIT).contains(&limit) {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {MAX_LIST_LIMIT}"
        )));
    }
    Ok(Json(JobListResponse {
        jobs: state.jobs.list(limit),
    }))
}

/// GET /api/jobs/{id}
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobResponse>> {
    state
        .jobs
        .get(&id)
        .map(|job| Json(JobResponse { job }))
        .ok_or(ApiError::JobNotFound(id))
}

/// POST /api/jobs/{id}/cancel
async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    let timer = RequestTimer::new("jobs_cancel");
    let result = state
        .jobs
        .try_cancel(&id)
        .map(|()| {
            Json(CancelResponse {
                status: "cancelled".to_string(),
            })
        })
        .map_err(ApiError::from);
    timer.finish(&result);
    result
}

/// GET /api/jobs/{id}/stream - SSE stream of job snapshots.
///
/// Emits a `job` event on the first poll and whenever the step changes, then
/// the terminal snapshot followed by a `done` event. If the job vanishes
/// mid-stream an `error` event is sent instead of `done`.
async fn stream_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let updates = state.jobs.subscribe(&id)?;

    let stream = async_stream::stream! {
        let job_id = updates.id().to_string();
        let jobs = updates.into_stream();
        tokio::pin!(jobs);

        let mut last_status = None;
        while let Some(job) = jobs.next().await {
            last_status = Some(job.status);
            let json = serde_json::to_string(&job).unwrap_or_default();
            yield Ok(Event::default().event("job").data(json));
        }

        match last_status {
            Some(status) if status.is_terminal() => {
                let done = DoneEvent { job_id: &job_id, status };
                let json = serde_json::to_string(&done).unwrap_or_default();
                yield Ok(Event::default().event("done").data(json));
            }
            _ => {
                yield Ok(Event::default().event("error").data(r#"{"error":"Job not found"}"#));
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", get(list_jobs).post(submit_job))
        .route("/jobs/start", post(submit_job))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/cancel", post(cancel_job))
        .route("/jobs/{id}/stream", get(stream_job))
}
