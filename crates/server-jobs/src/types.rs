// crates/server-jobs/src/types.rs
//! Types for the background job system.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::progress::ProgressTrack;

/// Opaque, unguessable job identifier (UUID v4 text form).
pub type JobId = String;

/// Status of a background job.
///
/// Serialized names are part of the wire contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Completed, Failed and Cancelled admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one job record.
///
/// `started_at` is set iff the job has left `Pending`; `completed_at` is set
/// iff the status is terminal.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: ProgressTrack,
    pub result: Option<Value>,
    pub error: Option<String>,
    #[serde(rename = "input_data")]
    pub input: Value,
}

impl Job {
    pub(crate) fn new(id: JobId, job_type: impl Into<String>, input: Value) -> Self {
        Self {
            id,
            job_type: job_type.into(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            progress: ProgressTrack::default(),
            result: None,
            error: None,
            input,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_wire_names() {
        let all = [
            (JobStatus::Pending, "\"pending\""),
            (JobStatus::Running, "\"running\""),
            (JobStatus::Completed, "\"completed\""),
            (JobStatus::Failed, "\"failed\""),
            (JobStatus::Cancelled, "\"cancelled\""),
        ];
        for (status, wire) in all {
            assert_eq!(serde_json::to_string(&status).unwrap(), wire);
            assert_eq!(serde_json::from_str::<JobStatus>(wire).unwrap(), status);
            assert_eq!(format!("\"{status}\""), wire);
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_job_serialize() {
        let job = Job::new(
            "abc".to_string(),
            "refactor",
            serde_json::json!({"input_file": "A.sol"}),
        );
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["id"], "abc");
        assert_eq!(json["type"], "refactor");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["input_data"]["input_file"], "A.sol");
        assert!(json["started_at"].is_null());
        assert!(json["completed_at"].is_null());
        assert_eq!(json["progress"]["current_step"], 0);
    }
}
