// crates/server-jobs/src/updates.rs
//! Per-job polling subscription.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_stream::Stream;

use crate::error::JobError;
use crate::manager::JobManager;
use crate::types::{Job, JobId};

/// Relays snapshots of one job until it reaches a terminal state.
///
/// A snapshot is yielded on the first poll, whenever `current_step` changes,
/// and exactly once when the job is terminal; the stream then ends. Dropping
/// the stream stops polling.
pub struct UpdateChannel {
    manager: Arc<JobManager>,
    id: JobId,
    interval: Duration,
}

impl UpdateChannel {
    /// Fails with [`JobError::NotFound`] if the job does not exist.
    pub fn open(manager: Arc<JobManager>, id: &str, interval: Duration) -> Result<Self, JobError> {
        if manager.get(id).is_none() {
            return Err(JobError::NotFound(id.to_string()));
        }
        Ok(Self {
            manager,
            id: id.to_string(),
            interval,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn into_stream(self) -> impl Stream<Item = Job> + Send + 'static {
        let Self {
            manager,
            id,
            interval,
        } = self;

        async_stream::stream! {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last_step: Option<u32> = None;

            loop {
                ticker.tick().await;
                let Some(job) = manager.get(&id) else {
                    tracing::debug!(job_id = %id, "Job disappeared; closing update stream");
                    break;
                };

                if job.status.is_terminal() {
                    yield job;
                    break;
                }
                if last_step != Some(job.progress.current_step) {
                    last_step = Some(job.progress.current_step);
                    yield job;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerRegistry;
    use crate::manager::ManagerConfig;
    use crate::types::JobStatus;
    use serde_json::json;
    use tokio_stream::StreamExt;

    fn manager() -> Arc<JobManager> {
        Arc::new(JobManager::new(ManagerConfig::default(), HandlerRegistry::new()))
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let manager = manager();
        let err = manager.subscribe("missing").err().unwrap();
        assert_eq!(err, JobError::NotFound("missing".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_poll_always_yields() {
        let manager = manager();
        let id = manager.create("test", json!({}));
        let stream = manager.subscribe(&id).unwrap().into_stream();
        tokio::pin!(stream);

        let first = stream.next().await.unwrap();
        assert_eq!(first.id, id);
        assert_eq!(first.status, JobStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_yields_on_step_change_then_terminal() {
        let manager = manager();
        let id = manager.create("test", json!({}));
        let stream = UpdateChannel::open(manager.clone(), &id, Duration::from_millis(100))
            .unwrap()
            .into_stream();
        tokio::pin!(stream);

        assert_eq!(stream.next().await.unwrap().progress.current_step, 0);

        // Same step is not re-sent; the next yield reflects the change.
        manager.update_progress(&id, 0, 3, "Still zero", Some("noise"));
        tokio::time::sleep(Duration::from_millis(250)).await;
        manager.update_progress(&id, 1, 3, "One", None);
        let next = stream.next().await.unwrap();
        assert_eq!(next.progress.current_step, 1);
        assert_eq!(next.progress.step_label, "One");

        manager.cancel(&id);
        let last = stream.next().await.unwrap();
        assert_eq!(last.status, JobStatus::Cancelled);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_job_yields_once_and_closes() {
        let manager = manager();
        let id = manager.create("test", json!({}));
        manager.cancel(&id);

        let updates: Vec<Job> = manager.subscribe(&id).unwrap().into_stream().collect().await;
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].status, JobStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_yields_even_without_step_change() {
        let manager = manager();
        let id = manager.create("test", json!({}));
        let stream = manager.subscribe(&id).unwrap().into_stream();
        tokio::pin!(stream);

        stream.next().await.unwrap();
        manager.cancel(&id);
        // current_step is unchanged but the terminal snapshot still arrives
        let last = stream.next().await.unwrap();
        assert_eq!(last.status, JobStatus::Cancelled);
        assert_eq!(last.progress.current_step, 0);
        assert!(stream.next().await.is_none());
    }
}
