// crates/server-jobs/src/manager.rs
//! Central job manager: owns the store, the worker pool and every lifecycle
//! transition.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, histogram};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::JobError;
use crate::handler::{HandlerRegistry, JobContext, JobHandler};
use crate::store::JobStore;
use crate::types::{Job, JobId, JobStatus};
use crate::updates::UpdateChannel;

/// Default number of jobs executing concurrently.
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Default cadence of [`UpdateChannel`] polling.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Who wins when `cancel` races with a handler finishing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CancelPolicy {
    /// Handler completion overwrites `cancelled` with its own outcome.
    #[default]
    LastWriteWins,
    /// First terminal write wins; a late handler result is attached but the
    /// status stays `cancelled`.
    Sticky,
}

impl CancelPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sticky => "sticky",
            Self::LastWriteWins => "last-write-wins",
        }
    }
}

impl fmt::Display for CancelPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CancelPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sticky" => Ok(Self::Sticky),
            "last-write-wins" | "lww" => Ok(Self::LastWriteWins),
            other => Err(format!(
                "unknown cancel policy '{other}' (expected 'sticky' or 'last-write-wins')"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub pool_size: usize,
    pub cancel_policy: CancelPolicy,
    pub poll_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            cancel_policy: CancelPolicy::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

enum Outcome {
    Success(Value),
    Fault { message: String, diagnostic: String },
}

/// Owns every job record and drives Pending -> Running -> terminal.
///
/// Thread-safe; share it as `Arc<JobManager>`. Handlers and API code only
/// read snapshots; every write goes through a method here.
pub struct JobManager {
    store: JobStore,
    registry: HandlerRegistry,
    workers: Arc<Semaphore>,
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
    config: ManagerConfig,
}

impl JobManager {
    pub fn new(config: ManagerConfig, registry: HandlerRegistry) -> Self {
        let permits = config.pool_size.max(1);
        Self {
            store: JobStore::new(),
            registry,
            workers: Arc::new(Semaphore::new(permits)),
            tokens: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn handler_for(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.registry.get(job_type)
    }

    /// Allocate a `Pending` job and return its id.
    pub fn create(&self, job_type: &str, input: Value) -> JobId {
        let id = uuid::Uuid::new_v4().to_string();
        self.store.insert(Job::new(id.clone(), job_type, input));
        match self.tokens.lock() {
            Ok(mut tokens) => {
                tokens.insert(id.clone(), CancellationToken::new());
            }
            Err(e) => tracing::error!("Mutex poisoned writing cancel tokens: {e}"),
        }
        counter!("jobs_created_total", "type" => job_type.to_string()).increment(1);
        tracing::debug!(job_id = %id, job_type, "Job created");
        id
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.store.get(id)
    }

    pub fn list(&self, limit: usize) -> Vec<Job> {
        self.store.list(limit)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Move a `Pending` job to `Running` and queue `handler` on the pool.
    ///
    /// Returns `false` if the id is unknown or the job is not `Pending`.
    pub fn start(self: &Arc<Self>, id: &str, handler: Arc<dyn JobHandler>) -> bool {
        self.try_start(id, handler).is_ok()
    }

    pub fn try_start(self: &Arc<Self>, id: &str, handler: Arc<dyn JobHandler>) -> Result<(), JobError> {
        // Taken before the status flip so a concurrent cancel is always observed.
        let token = self.token(id);

        let started = self
            .store
            .update(id, |job| {
                if job.status != JobStatus::Pending {
                    return Err(JobError::NotStartable {
                        id: job.id.clone(),
                        status: job.status,
                    });
                }
                job.status = JobStatus::Running;
                job.started_at = Some(Utc::now());
                Ok((job.job_type.clone(), job.input.clone()))
            })
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;
        let (job_type, input) = started?;

        let manager = Arc::clone(self);
        let id = id.to_string();
        tokio::spawn(async move {
            manager.execute(id, job_type, input, handler, token).await;
        });
        Ok(())
    }

    /// Create a job of a registered type and start it.
    ///
    /// Unknown types are rejected before anything is stored.
    pub fn submit(self: &Arc<Self>, job_type: &str, input: Value) -> Result<JobId, JobError> {
        let handler = self
            .registry
            .get(job_type)
            .ok_or_else(|| JobError::UnknownJobType(job_type.to_string()))?;
        let id = self.create(job_type, input);
        self.try_start(&id, handler)?;
        Ok(id)
    }

    /// Returns `true` if the job moved to `Cancelled`, `false` if it is
    /// unknown or already terminal.
    pub fn cancel(&self, id: &str) -> bool {
        self.try_cancel(id).is_ok()
    }

    /// Mark the job `Cancelled` and fire its cancellation token.
    ///
    /// Advisory: an external command already in flight runs to completion or
    /// timeout. The handler sees the token between steps.
    pub fn try_cancel(&self, id: &str) -> Result<(), JobError> {
        let job_type = self
            .store
            .update(id, |job| {
                if job.status.is_terminal() {
                    return Err(JobError::NotCancellable {
                        id: job.id.clone(),
                        status: job.status,
                    });
                }
                let now = Utc::now();
                job.status = JobStatus::Cancelled;
                job.started_at.get_or_insert(now);
                job.completed_at = Some(now);
                job.progress.step_label = "Cancelled".to_string();
                job.progress.push_log("Job was cancelled");
                Ok(job.job_type.clone())
            })
            .ok_or_else(|| JobError::NotFound(id.to_string()))??;

        if let Some(token) = self.take_token(id) {
            token.cancel();
        }
        counter!("jobs_finished_total", "type" => job_type.clone(), "status" => "cancelled")
            .increment(1);
        tracing::info!(job_id = %id, job_type = %job_type, "Job cancelled");
        Ok(())
    }

    /// Set step counters and label, optionally logging `message`.
    ///
    /// Unknown ids are ignored. Terminal jobs keep their final step and
    /// label; the message is still logged.
    pub fn update_progress(&self, id: &str, step: u32, total: u32, label: &str, message: Option<&str>) {
        self.store.update(id, |job| {
            if !job.status.is_terminal() {
                job.progress.set_step(step, total, label);
            }
            if let Some(message) = message {
                job.progress.push_log(message);
            }
        });
    }

    /// Append one log line without touching step, total or label.
    pub fn append_log(&self, id: &str, message: &str) {
        self.store.update(id, |job| job.progress.push_log(message));
    }

    /// Open a polling subscription on one job.
    pub fn subscribe(self: &Arc<Self>, id: &str) -> Result<UpdateChannel, JobError> {
        UpdateChannel::open(Arc::clone(self), id, self.config.poll_interval)
    }

    fn token(&self, id: &str) -> CancellationToken {
        match self.tokens.lock() {
            Ok(tokens) => tokens.get(id).cloned().unwrap_or_default(),
            Err(e) => {
                tracing::error!("Mutex poisoned reading cancel tokens: {e}");
                CancellationToken::new()
            }
        }
    }

    fn take_token(&self, id: &str) -> Option<CancellationToken> {
        match self.tokens.lock() {
            Ok(mut tokens) => tokens.remove(id),
            Err(e) => {
                tracing::error!("Mutex poisoned writing cancel tokens: {e}");
                None
            }
        }
    }

    async fn execute(
        self: Arc<Self>,
        id: JobId,
        job_type: String,
        input: Value,
        handler: Arc<dyn JobHandler>,
        cancel: CancellationToken,
    ) {
        let _permit = match Arc::clone(&self.workers).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                tracing::error!(job_id = %id, "Worker pool closed: {e}");
                self.finish(
                    &id,
                    &job_type,
                    Outcome::Fault {
                        message: "Worker pool unavailable".to_string(),
                        diagnostic: e.to_string(),
                    },
                    Duration::ZERO,
                );
                return;
            }
        };

        if cancel.is_cancelled() {
            tracing::debug!(job_id = %id, "Job cancelled while queued; handler skipped");
            self.take_token(&id);
            return;
        }

        let started = Instant::now();
        self.append_log(&id, &format!("Starting {job_type} job"));
        tracing::info!(job_id = %id, job_type = %job_type, "Job started");

        let ctx = JobContext::new(id.clone(), Arc::clone(&self), cancel);
        // Inner task so a panicking handler surfaces as a JoinError.
        let outcome = match tokio::spawn(async move { handler.run(ctx, input).await }).await {
            Ok(Ok(value)) => Outcome::Success(value),
            Ok(Err(err)) => Outcome::Fault {
                message: err.to_string(),
                diagnostic: format!("{err:?}"),
            },
            Err(join_err) => {
                let diagnostic = match join_err.try_into_panic() {
                    Ok(payload) => format!("handler panicked: {}", panic_message(payload.as_ref())),
                    Err(join_err) => join_err.to_string(),
                };
                Outcome::Fault {
                    message: "Job handler panicked".to_string(),
                    diagnostic,
                }
            }
        };

        self.finish(&id, &job_type, outcome, started.elapsed());
    }

    fn finish(&self, id: &str, job_type: &str, outcome: Outcome, elapsed: Duration) {
        self.take_token(id);
        let policy = self.config.cancel_policy;

        let status = self
            .store
            .update(id, move |job| {
                if policy == CancelPolicy::Sticky && job.status.is_terminal() {
                    match outcome {
                        Outcome::Success(value) => {
                            job.result = Some(value);
                            job.progress
                                .push_log("Job finished after cancellation; status left as cancelled");
                        }
                        Outcome::Fault { message, diagnostic } => {
                            job.progress.push_log(&format!("Job failed after cancellation: {message}"));
                            job.progress.push_entry(format!("[ERROR] {diagnostic}"));
                        }
                    }
                    return None;
                }

                job.started_at.get_or_insert_with(Utc::now);
                job.completed_at = Some(Utc::now());
                match outcome {
                    Outcome::Success(value) => {
                        job.status = JobStatus::Completed;
                        job.result = Some(value);
                        job.error = None;
                        let total = job.progress.total_steps;
                        job.progress.set_step(total, total, "Completed");
                        job.progress.push_log("Job completed successfully");
                    }
                    Outcome::Fault { message, diagnostic } => {
                        job.status = JobStatus::Failed;
                        job.progress.step_label = "Failed".to_string();
                        job.progress.push_log(&format!("Job failed: {message}"));
                        job.progress.push_entry(format!("[ERROR] {diagnostic}"));
                        job.error = Some(message);
                    }
                }
                Some(job.status)
            })
            .flatten();

        let Some(status) = status else {
            tracing::info!(job_id = %id, job_type, "Job finished after cancellation");
            return;
        };

        counter!("jobs_finished_total", "type" => job_type.to_string(), "status" => status.as_str())
            .increment(1);
        histogram!("job_duration_seconds", "type" => job_type.to_string()).record(elapsed.as_secs_f64());

        let elapsed_ms = elapsed.as_millis() as u64;
        match status {
            JobStatus::Failed => tracing::warn!(job_id = %id, job_type, elapsed_ms, "Job failed"),
            _ => tracing::info!(job_id = %id, job_type, elapsed_ms, status = %status, "Job finished"),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
