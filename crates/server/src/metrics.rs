//! Prometheus metrics for the job server.
//!
//! The job engine records its own counters and histograms through the
//! `metrics` facade; this module installs the recorder, describes those
//! series, and times API requests.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Call once at startup, before any job is submitted. Concurrent callers
/// race on the handle cell, so the recorder is built and installed once.
/// Returns `true` for the call that initialized, `false` otherwise.
pub fn init_metrics() -> bool {
    let mut initialized = false;
    PROMETHEUS_HANDLE.get_or_init(|| {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("Failed to set global metrics recorder (already set)");
        } else {
            describe_metrics();
            initialized = true;
            tracing::info!("Prometheus metrics initialized");
        }
        handle
    });
    initialized
}

fn describe_metrics() {
    // Jobs
    describe_counter!("jobs_created_total", "Jobs created, by job type");
    describe_counter!(
        "jobs_finished_total",
        "Jobs reaching a terminal status, by job type and status"
    );
    describe_histogram!(
        "job_duration_seconds",
        "Wall time from job start to handler completion in seconds"
    );

    // Pipeline
    describe_counter!(
        "pipeline_stage_total",
        "Pipeline stages executed, by stage and outcome"
    );
    describe_histogram!(
        "pipeline_stage_duration_seconds",
        "Duration of pipeline stages in seconds"
    );

    // API
    describe_counter!("api_requests_total", "Total number of job API requests");
    describe_histogram!(
        "api_request_duration_seconds",
        "Duration of job API requests in seconds"
    );
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

/// Record a completed API request.
pub fn record_request(endpoint: &str, status: u16, duration: Duration) {
    counter!("api_requests_total", "endpoint" => endpoint.to_string(), "status" => status.to_string())
        .increment(1);
    histogram!("api_request_duration_seconds", "endpoint" => endpoint.to_string())
        .record(duration.as_secs_f64());
}

/// Times one request handler.
///
/// ```ignore
/// let timer = RequestTimer::new("jobs_submit");
/// let result = do_work().await;
/// timer.finish(&result);
/// ```
pub struct RequestTimer {
    endpoint: &'static str,
    start: Instant,
}

impl RequestTimer {
    pub fn new(endpoint: &'static str) -> Self {
        Self {
            endpoint,
            start: Instant::now(),
        }
    }

    /// Record with the status the handler result maps to.
    pub fn finish<T>(self, result: &crate::ApiResult<T>) {
        let status = match result {
            Ok(_) => 200,
            Err(err) => err.status_code().as_u16(),
        };
        record_request(self.endpoint, status, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ApiError;

    #[test]
    fn test_request_timer_records_without_recorder() {
        let ok: crate::ApiResult<()> = Ok(());
        RequestTimer::new("test_endpoint").finish(&ok);

        let err: crate::ApiResult<()> = Err(ApiError::JobNotFound("x".to_string()));
        RequestTimer::new("test_endpoint").finish(&err);
    }

    #[test]
    fn test_init_metrics_concurrent_callers_initialize_once() {
        let callers: Vec<_> = (0..8).map(|_| std::thread::spawn(init_metrics)).collect();
        let initialized = callers
            .into_iter()
            .map(|caller| caller.join().unwrap())
            .filter(|&ok| ok)
            .count();
        // Another test in this binary may have won the race already
        assert!(initialized <= 1);
        assert!(!init_metrics());
        assert!(render_metrics().is_some());
    }

    #[test]
    fn test_init_metrics_is_idempotent() {
        init_metrics();
        assert!(!init_metrics());

        counter!("jobs_created_total", "type" => "refactor").increment(1);
        let output = render_metrics().expect("initialized");
        assert!(output.contains("jobs_created_total"));
    }
}
