// crates/server-jobs/src/error.rs
use thiserror::Error;

use crate::types::{JobId, JobStatus};

/// Boundary errors of the job system. None of these mutate state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    #[error("Job {id} is already {status}")]
    NotCancellable { id: JobId, status: JobStatus },

    #[error("Job {id} cannot be started from status {status}")]
    NotStartable { id: JobId, status: JobStatus },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_error_display() {
        let err = JobError::NotFound("abc".to_string());
        assert_eq!(err.to_string(), "Job not found: abc");

        let err = JobError::UnknownJobType("deploy".to_string());
        assert_eq!(err.to_string(), "Unknown job type: deploy");

        let err = JobError::NotCancellable {
            id: "abc".to_string(),
            status: JobStatus::Completed,
        };
        assert_eq!(err.to_string(), "Job abc is already completed");
    }
}
