// crates/server/src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use refactor_jobs_server_jobs::JobError;
use serde::Serialize;
use thiserror::Error;

/// Structured JSON error response for API errors
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(id) => ApiError::JobNotFound(id),
            JobError::UnknownJobType(job_type) => ApiError::UnknownJobType(job_type),
            err @ (JobError::NotCancellable { .. } | JobError::NotStartable { .. }) => {
                ApiError::Conflict(err.to_string())
            }
        }
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::JobNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::UnknownJobType(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error_response = match &self {
            ApiError::JobNotFound(id) => {
                tracing::warn!(job_id = %id, "Job not found");
                ErrorResponse::with_details("Job not found", format!("Job ID: {}", id))
            }
            ApiError::UnknownJobType(job_type) => {
                tracing::warn!(job_type = %job_type, "Unknown job type");
                ErrorResponse::with_details("Unknown job type", job_type.clone())
            }
            ApiError::BadRequest(msg) => {
                tracing::warn!(message = %msg, "Bad request");
                ErrorResponse::with_details("Bad request", msg.clone())
            }
            ApiError::Conflict(msg) => {
                tracing::warn!(message = %msg, "Conflict");
                ErrorResponse::with_details("Conflict", msg.clone())
            }
        };

        (self.status_code(), Json(error_response)).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use refactor_jobs_server_jobs::JobStatus;

    /// Helper to extract status code and body from a response
    async fn extract_response(response: Response) -> (StatusCode, ErrorResponse) {
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let error_response: ErrorResponse = serde_json::from_slice(&body).unwrap();
        (status, error_response)
    }

    #[tokio::test]
    async fn test_job_not_found_returns_404() {
        let error = ApiError::JobNotFound("abc123".to_string());
        let (status, body) = extract_response(error.into_response()).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.error, "Job not found");
        assert!(body.details.unwrap().contains("abc123"));
    }

    #[tokio::test]
    async fn test_unknown_job_type_returns_400() {
        let error: ApiError = JobError::UnknownJobType("deploy".to_string()).into();
        let (status, body) = extract_response(error.into_response()).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error, "Unknown job type");
        assert_eq!(body.details.as_deref(), Some("deploy"));
    }

    #[tokio::test]
    async fn test_not_cancellable_returns_409() {
        let error: ApiError = JobError::NotCancellable {
            id: "abc".to_string(),
            status: JobStatus::Completed,
        }
        .into();
        let (status, body) = extract_response(error.into_response()).await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.error, "Conflict");
        assert_eq!(body.details.as_deref(), Some("Job abc is already completed"));
    }

    #[tokio::test]
    async fn test_job_error_not_found_maps_to_404() {
        let error: ApiError = JobError::NotFound("xyz".to_string()).into();
        let (status, _) = extract_response(error.into_response()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bad_request_returns_400() {
        let error = ApiError::BadRequest("limit must be between 1 and 100".to_string());
        let (status, body) = extract_response(error.into_response()).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error, "Bad request");
        assert!(body.details.unwrap().contains("limit"));
    }

    #[test]
    fn test_error_response_serialization() {
        let response = ErrorResponse::new("Test error");
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"error":"Test error"}"#);

        let response = ErrorResponse::with_details("Test error", "More info");
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"error":"Test error","details":"More info"}"#);
    }
}
