// crates/server-jobs/src/pipeline/refactor.rs
//! The five-stage contract refactor job.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use refactor_jobs_core::{CommandRunner, CommandSpec, DEFAULT_COMMAND_TIMEOUT};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{CommandStage, Pipeline, Stage, StageContext, StageResult};
use crate::handler::{JobContext, JobHandler};

/// Job type tag the refactor handler is registered under.
pub const REFACTOR_JOB_TYPE: &str = "refactor";

/// Where the refactor tools live and how long each may run.
#[derive(Debug, Clone)]
pub struct RefactorConfig {
    /// Working directory of every stage; tool paths are resolved against it.
    pub repo_root: PathBuf,
    pub node_bin: String,
    pub npx_bin: String,
    pub default_input_file: String,
    pub contracts_root: String,
    pub analysis_out_dir: String,
    pub parity_left: String,
    pub parity_right: String,
    /// Relative to `repo_root`.
    pub planner_path: PathBuf,
    pub stage_timeout: Duration,
    pub ai_timeout: Duration,
}

impl Default for RefactorConfig {
    fn default() -> Self {
        Self {
            repo_root: PathBuf::from("."),
            node_bin: "node".to_string(),
            npx_bin: "npx".to_string(),
            default_input_file: "contracts/PayRoxMonolith.sol".to_string(),
            contracts_root: "contracts".to_string(),
            analysis_out_dir: ".payrox/generated/analysis".to_string(),
            parity_left: "contracts/original".to_string(),
            parity_right: "contracts/ai".to_string(),
            planner_path: PathBuf::from("dist/scripts/cli/plan.js"),
            stage_timeout: DEFAULT_COMMAND_TIMEOUT,
            ai_timeout: Duration::from_secs(600),
        }
    }
}

impl RefactorConfig {
    fn tool(&self, relative: &str) -> String {
        self.repo_root.join(relative).display().to_string()
    }

    fn spec<I, S>(&self, argv: I, timeout: Duration) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new(argv)
            .with_workdir(&self.repo_root)
            .with_timeout(timeout)
    }
}

/// Accepted shape of a refactor job's input.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefactorInput {
    #[serde(default)]
    pub input_file: Option<String>,
}

impl RefactorInput {
    /// `null` means "all defaults"; anything else must be an object.
    pub fn from_value(input: Value) -> anyhow::Result<Self> {
        if input.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(input).context("refactor input must be an object like {\"input_file\": \"...\"}")
    }
}

/// Runs the refactor pipeline for one job and returns its report.
pub struct RefactorHandler {
    config: Arc<RefactorConfig>,
    runner: Arc<dyn CommandRunner>,
}

impl RefactorHandler {
    pub fn new(config: RefactorConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config: Arc::new(config),
            runner,
        }
    }

    pub fn config(&self) -> &RefactorConfig {
        &self.config
    }

    /// Stages for one job, in execution order.
    pub fn pipeline(&self, input_file: &str) -> Pipeline {
        let cfg = &self.config;

        let internal_calls = CommandStage::new(
            "internal_calls",
            "Internal Call Analysis",
            cfg.spec(
                [
                    cfg.node_bin.clone(),
                    cfg.tool("scripts/tools/analysis/rewire-internal-calls.js"),
                    "--root".to_string(),
                    cfg.contracts_root.clone(),
                    "--out".to_string(),
                    cfg.analysis_out_dir.clone(),
                ],
                cfg.stage_timeout,
            ),
        )
        .announce("Running internal call analysis")
        .warn_on_failure("Internal call analysis failed");

        let parity = CommandStage::new(
            "parity",
            "Parity Analysis",
            cfg.spec(
                [
                    cfg.node_bin.clone(),
                    cfg.tool("scripts/tools/analysis/event-error-parity.js"),
                    "--left".to_string(),
                    cfg.parity_left.clone(),
                    "--right".to_string(),
                    cfg.parity_right.clone(),
                    "--out".to_string(),
                    cfg.analysis_out_dir.clone(),
                ],
                cfg.stage_timeout,
            ),
        )
        .announce("Running event/error parity analysis")
        .warn_on_failure("Event/error parity analysis failed");

        let ai_refactor = CommandStage::new(
            "ai_refactor",
            "AI Refactor",
            cfg.spec(
                [
                    cfg.npx_bin.clone(),
                    "ts-node".to_string(),
                    cfg.tool("tools/ai-refactor-copilot.ts"),
                    "--file".to_string(),
                    input_file.to_string(),
                ],
                cfg.ai_timeout,
            ),
        )
        .announce("Running AI-powered refactoring")
        .warn_on_failure("AI refactoring failed");

        let splitting = CommandStage::new(
            "splitting",
            "Contract Splitting",
            cfg.spec(
                [
                    cfg.npx_bin.clone(),
                    "ts-node".to_string(),
                    cfg.tool("tools/splitter/cli.ts"),
                    "-i".to_string(),
                    input_file.to_string(),
                    "--compile".to_string(),
                    "--deploy".to_string(),
                ],
                cfg.stage_timeout,
            ),
        )
        .announce("Splitting contracts into facets")
        .warn_on_failure("Contract splitting failed");

        Pipeline::new()
            .stage(internal_calls)
            .stage(parity)
            .stage(ai_refactor)
            .stage(splitting)
            .stage(PlanningStage {
                config: Arc::clone(&self.config),
            })
    }
}

#[async_trait]
impl JobHandler for RefactorHandler {
    async fn run(&self, ctx: JobContext, input: Value) -> anyhow::Result<Value> {
        let input = RefactorInput::from_value(input)?;
        let input_file = input
            .input_file
            .unwrap_or_else(|| self.config.default_input_file.clone());
        tracing::info!(job_id = %ctx.id(), input_file = %input_file, "Refactor pipeline starting");

        let report = self
            .pipeline(&input_file)
            .run(self.runner.as_ref(), &ctx)
            .await
            .context("Refactor job failed")?;

        tracing::info!(
            job_id = %ctx.id(),
            failed = report.failed_stages().count(),
            warnings = report.warnings.len(),
            completed = report.completed,
            "Refactor pipeline finished"
        );
        Ok(serde_json::to_value(&report)?)
    }
}

/// Optional final stage: feeds the internal-call analysis to the planner.
struct PlanningStage {
    config: Arc<RefactorConfig>,
}

impl PlanningStage {
    fn planner(&self) -> PathBuf {
        self.config.repo_root.join(&self.config.planner_path)
    }
}

/// Best-effort parse of the internal-call analysis, `{}` when unusable.
fn plan_input(ctx: &StageContext<'_>) -> Value {
    ctx.report
        .stage("internal_calls")
        .filter(|stage| stage.ok)
        .and_then(|stage| serde_json::from_str::<Value>(stage.output.trim()).ok())
        .unwrap_or_else(|| json!({}))
}

fn write_plan_input(input: &Value) -> anyhow::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("plan-input-")
        .suffix(".json")
        .tempfile()
        .context("failed to create planner input file")?;
    serde_json::to_writer(&mut file, input).context("failed to write planner input file")?;
    file.flush().context("failed to flush planner input file")?;
    Ok(file)
}

#[async_trait]
impl Stage for PlanningStage {
    fn key(&self) -> &str {
        "plan"
    }

    fn label(&self) -> &str {
        "Planning"
    }

    fn announcement(&self) -> String {
        "Generating deployment plan".to_string()
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> anyhow::Result<StageResult> {
        let planner = self.planner();
        if !is_file(&planner).await {
            tracing::debug!(planner = %planner.display(), "Planner not found; stage skipped");
            return Ok(StageResult::skipped(
                "Planner executable not found",
                "Planner not built - run npm run build",
            ));
        }

        // Removed when dropped, on every path out of this function.
        let input_file = write_plan_input(&plan_input(ctx))?;
        let spec = self.config.spec(
            [
                self.config.node_bin.clone(),
                planner.display().to_string(),
                "--input".to_string(),
                input_file.path().display().to_string(),
            ],
            self.config.stage_timeout,
        );
        let result = StageResult::from_command(ctx.run(&spec).await);

        if !result.ok {
            let detail = result.output.clone();
            return Ok(result.failed(detail, "Plan generation failed"));
        }
        match serde_json::from_str::<Value>(result.output.trim()) {
            Ok(plan) => Ok(result.with_artifact(plan)),
            Err(_) => Ok(result.failed(
                "Failed to parse plan JSON",
                "Plan generation returned invalid JSON",
            )),
        }
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}
