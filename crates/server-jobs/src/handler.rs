// crates/server-jobs/src/handler.rs
//! Job-type strategies and the context handed to a running job body.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use refactor_jobs_core::ProgressSink;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::manager::JobManager;

/// Body of one job type.
///
/// Returning `Err` (or panicking) fails the job; the manager records the
/// diagnostic. Recoverable problems belong in the returned value instead.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, ctx: JobContext, input: Value) -> anyhow::Result<Value>;
}

#[async_trait]
impl<F, Fut> JobHandler for F
where
    F: Fn(JobContext, Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn run(&self, ctx: JobContext, input: Value) -> anyhow::Result<Value> {
        (self)(ctx, input).await
    }
}

/// Box a closure as a [`JobHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn JobHandler>
where
    F: Fn(JobContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(f)
}

/// Maps a job type tag to its handler.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `job_type`, replacing any previous one.
    pub fn register(&mut self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) -> &mut Self {
        self.handlers.insert(job_type.into(), handler);
        self
    }

    pub fn with(mut self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) -> Self {
        self.register(job_type, handler);
        self
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Registered type tags, sorted.
    pub fn job_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

/// Handle given to a running job body for reporting progress.
///
/// All writes go through the owning [`JobManager`].
#[derive(Clone)]
pub struct JobContext {
    id: String,
    manager: Arc<JobManager>,
    cancel: CancellationToken,
}

impl JobContext {
    pub(crate) fn new(id: impl Into<String>, manager: Arc<JobManager>, cancel: CancellationToken) -> Self {
        Self {
            id: id.into(),
            manager,
            cancel,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn update_progress(&self, step: u32, total: u32, label: &str, message: Option<&str>) {
        self.manager.update_progress(&self.id, step, total, label, message);
    }

    /// Whether cancellation was requested. Checking it is up to the job body.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl ProgressSink for JobContext {
    fn log(&self, message: &str) {
        self.manager.append_log(&self.id, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::ManagerConfig;
    use serde_json::json;

    #[test]
    fn test_registry_lookup() {
        let registry = HandlerRegistry::new()
            .with("echo", handler_fn(|_ctx: JobContext, input: Value| async move { Ok(input) }))
            .with("noop", handler_fn(|_ctx: JobContext, _input: Value| async move { Ok(Value::Null) }));

        assert!(registry.contains("echo"));
        assert!(!registry.contains("refactor"));
        assert!(registry.get("noop").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.job_types(), ["echo", "noop"]);
    }

    #[tokio::test]
    async fn test_closure_handler_runs() {
        let manager = Arc::new(JobManager::new(ManagerConfig::default(), HandlerRegistry::new()));
        let id = manager.create("echo", json!({}));
        let ctx = JobContext::new(id, manager, CancellationToken::new());

        let handler: Arc<dyn JobHandler> =
            handler_fn(|_ctx: JobContext, input: Value| async move { Ok(json!({ "echo": input })) });
        let out = handler.run(ctx, json!(7)).await.unwrap();
        assert_eq!(out, json!({ "echo": 7 }));
    }

    #[tokio::test]
    async fn test_context_writes_through_manager() {
        let manager = Arc::new(JobManager::new(ManagerConfig::default(), HandlerRegistry::new()));
        let id = manager.create("test", json!({}));
        let ctx = JobContext::new(id.clone(), manager.clone(), CancellationToken::new());

        ctx.update_progress(2, 4, "Halfway", Some("at step two"));
        ctx.log("tool output line");

        let job = manager.get(&id).unwrap();
        assert_eq!(job.progress.current_step, 2);
        assert_eq!(job.progress.percent, 50.0);
        assert_eq!(job.progress.step_label, "Halfway");
        assert_eq!(job.progress.log.len(), 2);
        assert!(job.progress.log[0].ends_with("at step two"));
        assert!(job.progress.log[1].ends_with("tool output line"));
        assert!(!ctx.is_cancelled());
    }
}
