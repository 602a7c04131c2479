// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use refactor_jobs_server_jobs::JobManager;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// The single job manager; constructed in `main` and injected here.
    pub jobs: Arc<JobManager>,
}

impl AppState {
    /// Create a new application state wrapped in an Arc for sharing.
    pub fn new(jobs: Arc<JobManager>) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            jobs,
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refactor_jobs_server_jobs::{HandlerRegistry, ManagerConfig};

    #[test]
    fn test_app_state_new() {
        let jobs = Arc::new(JobManager::new(ManagerConfig::default(), HandlerRegistry::new()));
        let state = AppState::new(jobs.clone());
        assert!(state.uptime_secs() < 1);
        assert!(Arc::ptr_eq(&state.jobs, &jobs));
    }
}
