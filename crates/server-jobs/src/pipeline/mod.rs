// crates/server-jobs/src/pipeline/mod.rs
//! Failure-tolerant multi-stage executor.
//!
//! A stage that exits non-zero or times out is recorded with `ok = false` and
//! a warning; later stages still run. Only an `Err` from a stage (an internal
//! fault, not a tool failure) aborts the pipeline.

pub mod refactor;

use std::collections::BTreeMap;
use std::time::Instant;

use anyhow::Context as _;
use async_trait::async_trait;
use metrics::{counter, histogram};
use refactor_jobs_core::{CommandOutput, CommandRunner, CommandSpec, ProgressSink};
use serde::Serialize;
use serde_json::Value;

use crate::handler::JobContext;

pub use refactor::{RefactorConfig, RefactorHandler, RefactorInput, REFACTOR_JOB_TYPE};

/// What one stage produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageResult {
    pub ok: bool,
    pub skipped: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub output: String,
    pub detail: Option<String>,
    /// Recorded in the report's warnings when the stage failed or was skipped.
    pub warning: Option<String>,
    /// Stored in the report's artifacts under the stage key.
    pub artifact: Option<Value>,
}

impl StageResult {
    pub fn from_command(output: CommandOutput) -> Self {
        Self {
            ok: output.success(),
            skipped: false,
            exit_code: Some(output.exit_code),
            timed_out: output.timed_out,
            output: output.output,
            ..Default::default()
        }
    }

    pub fn skipped(detail: impl Into<String>, warning: impl Into<String>) -> Self {
        Self {
            ok: false,
            skipped: true,
            detail: Some(detail.into()),
            warning: Some(warning.into()),
            ..Default::default()
        }
    }

    /// Mark the stage failed with a detail line and warning.
    pub fn failed(mut self, detail: impl Into<String>, warning: impl Into<String>) -> Self {
        self.ok = false;
        self.detail = Some(detail.into());
        self.warning = Some(warning.into());
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }

    pub fn with_artifact(mut self, artifact: Value) -> Self {
        self.artifact = Some(artifact);
        self
    }
}

/// Per-stage entry of a [`PipelineReport`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageOutcome {
    pub key: String,
    pub label: String,
    pub ok: bool,
    pub skipped: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Aggregated result of a pipeline run. Stored as the job's `result`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineReport {
    pub stages: Vec<StageOutcome>,
    pub warnings: Vec<String>,
    pub artifacts: BTreeMap<String, Value>,
    /// `false` if the run stopped early because the job was cancelled.
    pub completed: bool,
}

impl PipelineReport {
    pub fn stage(&self, key: &str) -> Option<&StageOutcome> {
        self.stages.iter().find(|s| s.key == key)
    }

    pub fn failed_stages(&self) -> impl Iterator<Item = &StageOutcome> {
        self.stages.iter().filter(|s| !s.ok && !s.skipped)
    }

    fn record(&mut self, key: &str, label: &str, result: StageResult) {
        if !result.ok {
            let warning = result
                .warning
                .unwrap_or_else(|| format!("{label} failed"));
            self.warnings.push(warning);
        }
        if let Some(artifact) = result.artifact {
            self.artifacts.insert(key.to_string(), artifact);
        }
        self.stages.push(StageOutcome {
            key: key.to_string(),
            label: label.to_string(),
            ok: result.ok,
            skipped: result.skipped,
            exit_code: result.exit_code,
            timed_out: result.timed_out,
            output: result.output,
            detail: result.detail,
        });
    }
}

/// What a stage can reach while it runs.
pub struct StageContext<'a> {
    pub runner: &'a dyn CommandRunner,
    pub sink: &'a dyn ProgressSink,
    /// Outcomes of the stages that already ran.
    pub report: &'a PipelineReport,
}

impl StageContext<'_> {
    /// Run `spec`, streaming its output into the job log.
    pub async fn run(&self, spec: &CommandSpec) -> CommandOutput {
        self.runner.run(spec, Some(self.sink)).await
    }
}

#[async_trait]
pub trait Stage: Send + Sync {
    /// Stable identifier used in the report and metrics.
    fn key(&self) -> &str;

    /// Human-readable name; becomes the job's step label.
    fn label(&self) -> &str;

    /// Log line emitted when the stage begins.
    fn announcement(&self) -> String {
        format!("Running {}", self.label())
    }

    /// Tool failures are reported through [`StageResult`]; `Err` is reserved
    /// for faults that should fail the whole job.
    async fn execute(&self, ctx: &StageContext<'_>) -> anyhow::Result<StageResult>;
}

/// Stage that runs one fixed command.
pub struct CommandStage {
    key: String,
    label: String,
    announcement: String,
    failure_warning: String,
    spec: CommandSpec,
}

impl CommandStage {
    pub fn new(key: impl Into<String>, label: impl Into<String>, spec: CommandSpec) -> Self {
        let label = label.into();
        Self {
            key: key.into(),
            announcement: format!("Running {label}"),
            failure_warning: format!("{label} failed"),
            label,
            spec,
        }
    }

    pub fn announce(mut self, announcement: impl Into<String>) -> Self {
        self.announcement = announcement.into();
        self
    }

    pub fn warn_on_failure(mut self, warning: impl Into<String>) -> Self {
        self.failure_warning = warning.into();
        self
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }
}

#[async_trait]
impl Stage for CommandStage {
    fn key(&self) -> &str {
        &self.key
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn announcement(&self) -> String {
        self.announcement.clone()
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> anyhow::Result<StageResult> {
        let result = StageResult::from_command(ctx.run(&self.spec).await);
        Ok(if result.ok {
            result
        } else {
            result.with_warning(self.failure_warning.clone())
        })
    }
}

/// Ordered list of stages run strictly in sequence.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage for the job behind `job`.
    ///
    /// The cancellation token is checked before each stage; once it fires the
    /// remaining stages are skipped and the report comes back with
    /// `completed = false`.
    pub async fn run(&self, runner: &dyn CommandRunner, job: &JobContext) -> anyhow::Result<PipelineReport> {
        let total = self.stages.len() as u32;
        let mut report = PipelineReport::default();

        for (index, stage) in self.stages.iter().enumerate() {
            if job.is_cancelled() {
                tracing::info!(job_id = %job.id(), stage = stage.key(), "Pipeline cancelled; remaining stages skipped");
                report
                    .warnings
                    .push(format!("Cancelled before stage '{}'", stage.label()));
                return Ok(report);
            }

            job.update_progress(index as u32 + 1, total, stage.label(), Some(&stage.announcement()));

            let started = Instant::now();
            let result = {
                let ctx = StageContext {
                    runner,
                    sink: job,
                    report: &report,
                };
                stage
                    .execute(&ctx)
                    .await
                    .with_context(|| format!("stage '{}' failed unexpectedly", stage.key()))?
            };
            let elapsed = started.elapsed();

            counter!(
                "pipeline_stage_total",
                "stage" => stage.key().to_string(),
                "ok" => result.ok.to_string()
            )
            .increment(1);
            histogram!("pipeline_stage_duration_seconds", "stage" => stage.key().to_string())
                .record(elapsed.as_secs_f64());
            tracing::info!(
                job_id = %job.id(),
                stage = stage.key(),
                ok = result.ok,
                skipped = result.skipped,
                exit_code = result.exit_code,
                elapsed_ms = elapsed.as_millis() as u64,
                "Stage finished"
            );

            report.record(stage.key(), stage.label(), result);
        }

        report.completed = true;
        Ok(report)
    }
}
