// crates/server-jobs/src/store.rs
//! In-memory registry of job records.
//!
//! Records live for the lifetime of the process and are never evicted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::types::{Job, JobId};

struct Entry {
    seq: u64,
    job: Job,
}

/// Concurrency-safe map of job id to job record.
///
/// Readers get cloned snapshots; the lock is never held across `.await`.
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, Entry>>,
    next_seq: AtomicU64,
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn insert(&self, job: Job) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        match self.jobs.write() {
            Ok(mut jobs) => {
                jobs.insert(job.id.clone(), Entry { seq, job });
            }
            Err(e) => tracing::error!("RwLock poisoned writing jobs map: {e}"),
        }
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        match self.jobs.read() {
            Ok(jobs) => jobs.get(id).map(|e| e.job.clone()),
            Err(e) => {
                tracing::error!("RwLock poisoned reading jobs map: {e}");
                None
            }
        }
    }

    /// Newest-created first, at most `limit` entries.
    ///
    /// Jobs created within the same clock tick are ordered by insertion.
    pub fn list(&self, limit: usize) -> Vec<Job> {
        let jobs = match self.jobs.read() {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!("RwLock poisoned reading jobs map: {e}");
                return Vec::new();
            }
        };
        let mut entries: Vec<&Entry> = jobs.values().collect();
        entries.sort_by(|a, b| {
            b.job
                .created_at
                .cmp(&a.job.created_at)
                .then_with(|| b.seq.cmp(&a.seq))
        });
        entries
            .into_iter()
            .take(limit)
            .map(|e| e.job.clone())
            .collect()
    }

    /// Apply `f` to the record under the write lock.
    ///
    /// Returns `None` if the id is unknown.
    pub fn update<R>(&self, id: &str, f: impl FnOnce(&mut Job) -> R) -> Option<R> {
        match self.jobs.write() {
            Ok(mut jobs) => jobs.get_mut(id).map(|e| f(&mut e.job)),
            Err(e) => {
                tracing::error!("RwLock poisoned writing jobs map: {e}");
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        match self.jobs.read() {
            Ok(jobs) => jobs.len(),
            Err(e) => {
                tracing::error!("RwLock poisoned reading jobs map: {e}");
                0
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobStatus;
    use serde_json::json;

    fn job(id: &str) -> Job {
        Job::new(id.to_string(), "test", json!({}))
    }

    #[test]
    fn test_insert_and_get() {
        let store = JobStore::new();
        assert!(store.is_empty());
        store.insert(job("a"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").unwrap().id, "a");
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn test_list_newest_first_with_limit() {
        let store = JobStore::new();
        for id in ["first", "second", "third"] {
            store.insert(job(id));
        }
        let ids: Vec<String> = store.list(10).into_iter().map(|j| j.id).collect();
        assert_eq!(ids, ["third", "second", "first"]);

        let ids: Vec<String> = store.list(2).into_iter().map(|j| j.id).collect();
        assert_eq!(ids, ["third", "second"]);

        assert!(store.list(0).is_empty());
    }

    #[test]
    fn test_update_returns_none_for_unknown() {
        let store = JobStore::new();
        assert!(store.update("nope", |j| j.status = JobStatus::Running).is_none());
    }

    #[test]
    fn test_update_is_visible_to_readers() {
        let store = JobStore::new();
        store.insert(job("a"));
        let snapshot = store.get("a").unwrap();

        let status = store.update("a", |j| {
            j.status = JobStatus::Running;
            j.status
        });
        assert_eq!(status, Some(JobStatus::Running));
        assert_eq!(store.get("a").unwrap().status, JobStatus::Running);
        // Earlier snapshots are detached copies
        assert_eq!(snapshot.status, JobStatus::Pending);
    }

    #[test]
    fn test_concurrent_writers() {
        let store = std::sync::Arc::new(JobStore::new());
        store.insert(job("a"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        store.update("a", |j| j.progress.current_step += 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.get("a").unwrap().progress.current_step, 800);
    }
}
