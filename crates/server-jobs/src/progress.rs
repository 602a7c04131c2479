// crates/server-jobs/src/progress.rs
//! Step/percent/log record attached to every job.

use std::collections::VecDeque;

use serde::Serialize;

/// Maximum number of log entries retained per job.
pub const LOG_CAPACITY: usize = 100;

/// Mutable progress record of one job.
///
/// The log is FIFO-bounded at [`LOG_CAPACITY`]: appending to a full log drops
/// the oldest entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressTrack {
    pub current_step: u32,
    pub total_steps: u32,
    #[serde(rename = "step_name")]
    pub step_label: String,
    #[serde(rename = "progress_percent")]
    pub percent: f64,
    #[serde(rename = "logs")]
    pub log: VecDeque<String>,
}

impl ProgressTrack {
    /// Set step counters and label, recomputing `percent`.
    pub fn set_step(&mut self, step: u32, total: u32, label: impl Into<String>) {
        self.current_step = step;
        self.total_steps = total;
        self.step_label = label.into();
        self.percent = percent_of(step, total);
    }

    /// Append `message` prefixed with a `[HH:MM:SS]` UTC timestamp.
    pub fn push_log(&mut self, message: &str) {
        let stamp = chrono::Utc::now().format("%H:%M:%S");
        self.push_entry(format!("[{stamp}] {message}"));
    }

    /// Append a pre-formatted entry.
    pub fn push_entry(&mut self, entry: String) {
        while self.log.len() >= LOG_CAPACITY {
            self.log.pop_front();
        }
        self.log.push_back(entry);
    }
}

/// `step / total * 100`, or 0 when `total` is 0.
pub fn percent_of(step: u32, total: u32) -> f64 {
    if total == 0 {
        0.0
    } else {
        step as f64 / total as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_percent() {
        assert_eq!(percent_of(0, 0), 0.0);
        assert_eq!(percent_of(3, 0), 0.0);
        assert_eq!(percent_of(0, 5), 0.0);
        assert_eq!(percent_of(2, 5), 40.0);
        assert_eq!(percent_of(5, 5), 100.0);
        assert_eq!(percent_of(1, 3), 1.0 / 3.0 * 100.0);
    }

    #[test]
    fn test_set_step_recomputes_percent() {
        let mut track = ProgressTrack::default();
        track.set_step(1, 4, "Analysis");
        assert_eq!(track.percent, 25.0);
        assert_eq!(track.step_label, "Analysis");

        // Idempotent
        track.set_step(1, 4, "Analysis");
        assert_eq!(track.percent, 25.0);
        assert!(track.log.is_empty());
    }

    #[test]
    fn test_log_is_timestamped() {
        let mut track = ProgressTrack::default();
        track.push_log("hello");
        let entry = &track.log[0];
        // "[HH:MM:SS] hello"
        assert_eq!(entry.len(), "[00:00:00] hello".len());
        assert!(entry.starts_with('['));
        assert!(entry.ends_with("] hello"));
    }

    #[test]
    fn test_log_evicts_oldest_at_capacity() {
        let mut track = ProgressTrack::default();
        for i in 0..LOG_CAPACITY {
            track.push_entry(format!("line {i}"));
        }
        assert_eq!(track.log.len(), LOG_CAPACITY);
        assert_eq!(track.log.front().unwrap(), "line 0");

        track.push_entry(format!("line {LOG_CAPACITY}"));
        assert_eq!(track.log.len(), LOG_CAPACITY);
        assert_eq!(track.log.front().unwrap(), "line 1");
        assert_eq!(track.log.back().unwrap(), "line 100");

        let expected: Vec<String> = (1..=LOG_CAPACITY).map(|i| format!("line {i}")).collect();
        assert_eq!(track.log.iter().cloned().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn test_log_never_exceeds_capacity() {
        let mut track = ProgressTrack::default();
        for i in 0..350 {
            track.push_log(&format!("msg {i}"));
            assert!(track.log.len() <= LOG_CAPACITY);
        }
        assert!(track.log.back().unwrap().ends_with("msg 349"));
        assert!(track.log.front().unwrap().ends_with("msg 250"));
    }
}
