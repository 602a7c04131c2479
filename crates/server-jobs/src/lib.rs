// crates/server-jobs/src/lib.rs
//! Background job engine: job records, a bounded worker pool, live update
//! streams and the refactor pipeline.

pub mod error;
pub mod handler;
pub mod manager;
pub mod pipeline;
pub mod progress;
pub mod store;
pub mod types;
pub mod updates;

pub use error::JobError;
pub use handler::{handler_fn, HandlerRegistry, JobContext, JobHandler};
pub use manager::{CancelPolicy, JobManager, ManagerConfig};
pub use pipeline::{
    Pipeline, PipelineReport, RefactorConfig, RefactorHandler, Stage, StageOutcome, StageResult,
    REFACTOR_JOB_TYPE,
};
pub use progress::{ProgressTrack, LOG_CAPACITY};
pub use store::JobStore;
pub use types::{Job, JobId, JobStatus};
pub use updates::UpdateChannel;
