// crates/core/src/runner.rs
//! External command runner with streamed output, timeout and guaranteed reaping.
//!
//! Every pipeline stage is one external process. The runner spawns it,
//! forwards each output line (stdout and stderr interleaved in arrival order)
//! to an optional [`ProgressSink`], and enforces a wall-clock timeout. Failures
//! to launch are folded into the same [`CommandOutput`] shape as a non-zero
//! exit so callers never have to distinguish them.

use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::CommandError;

/// Exit code reported when a command is killed for exceeding its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code reported when a command could not be started at all.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 1;

/// Default per-command timeout.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// How long output is still collected after the command itself has exited.
pub const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Receives human-readable log lines while a command runs.
pub trait ProgressSink: Send + Sync {
    fn log(&self, message: &str);
}

impl<F> ProgressSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn log(&self, message: &str) {
        self(message)
    }
}

/// One external command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub argv: Vec<String>,
    pub workdir: Option<PathBuf>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            workdir: None,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.argv.join(" "))
    }
}

/// Result of running one command. Launch failures and timeouts use the same shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub output: String,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// A failed result carrying `message` as its only output.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            exit_code: SPAWN_FAILURE_EXIT_CODE,
            output: message.into(),
            timed_out: false,
        }
    }
}

/// Runs one external command to completion or timeout.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec, sink: Option<&dyn ProgressSink>) -> CommandOutput;
}

/// [`CommandRunner`] backed by real OS processes.
///
/// On Unix each command is placed in its own process group so a timeout kills
/// wrappers like `npx` together with the tools they launch.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    async fn execute(
        &self,
        spec: &CommandSpec,
        sink: Option<&dyn ProgressSink>,
    ) -> Result<CommandOutput, CommandError> {
        let (program, args) = spec.argv.split_first().ok_or(CommandError::EmptyArgv)?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            // Null stdin so the child never blocks waiting for input
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.workdir {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| CommandError::spawn(program.clone(), e))?;
        // Also the process group id; still valid after the leader is reaped.
        let pid = child.id();
        let stdout = child.stdout.take().ok_or(CommandError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(CommandError::MissingPipe("stderr"))?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let readers = [
            spawn_line_reader(stdout, tx.clone()),
            spawn_line_reader(stderr, tx),
        ];

        let mut captured: Vec<String> = Vec::new();
        let waited = tokio::time::timeout(spec.timeout, async {
            let mut streams_open = true;
            loop {
                tokio::select! {
                    line = rx.recv(), if streams_open => match line {
                        Some(line) => forward(line, sink, &mut captured),
                        None => streams_open = false,
                    },
                    status = child.wait() => return status,
                }
            }
        })
        .await;

        match waited {
            Ok(Ok(status)) => {
                // Background processes may still hold the pipes after the
                // leader exits.
                let drained = tokio::time::timeout(OUTPUT_DRAIN_GRACE, async {
                    while let Some(line) = rx.recv().await {
                        forward(line, sink, &mut captured);
                    }
                })
                .await;
                if drained.is_err() {
                    tracing::debug!(command = %spec, "command: output still open after exit, killing process group");
                    kill_group(pid);
                    for reader in &readers {
                        reader.abort();
                    }
                    while let Ok(line) = rx.try_recv() {
                        forward(line, sink, &mut captured);
                    }
                }
                Ok(CommandOutput {
                    exit_code: exit_code_of(status),
                    output: captured.join("\n"),
                    timed_out: false,
                })
            }
            Ok(Err(source)) => {
                terminate(&mut child, pid).await;
                Err(CommandError::Wait {
                    program: program.clone(),
                    source,
                })
            }
            Err(_) => {
                terminate(&mut child, pid).await;
                for reader in &readers {
                    reader.abort();
                }
                while let Ok(line) = rx.try_recv() {
                    captured.push(line);
                }
                let marker = format!("timed out after {}s", spec.timeout.as_secs_f64());
                if let Some(sink) = sink {
                    sink.log(&marker);
                }
                captured.push(marker);
                Ok(CommandOutput {
                    exit_code: TIMEOUT_EXIT_CODE,
                    output: captured.join("\n"),
                    timed_out: true,
                })
            }
        }
    }
}

fn forward(line: String, sink: Option<&dyn ProgressSink>, captured: &mut Vec<String>) {
    if let Some(sink) = sink {
        sink.log(&line);
    }
    captured.push(line);
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec, sink: Option<&dyn ProgressSink>) -> CommandOutput {
        let t0 = Instant::now();
        if let Some(sink) = sink {
            sink.log(&format!("Running: {spec}"));
        }
        tracing::debug!(command = %spec, timeout_secs = spec.timeout.as_secs(), "command: spawning");

        match self.execute(spec, sink).await {
            Ok(output) => {
                let elapsed_ms = t0.elapsed().as_millis() as u64;
                if output.timed_out {
                    tracing::warn!(command = %spec, elapsed_ms, "command: timed out, killed");
                } else if output.exit_code != 0 {
                    tracing::warn!(command = %spec, exit_code = output.exit_code, elapsed_ms, "command: non-zero exit");
                } else {
                    tracing::info!(command = %spec, elapsed_ms, "command: finished");
                }
                output
            }
            Err(e) => {
                tracing::error!(command = %spec, error = %e, "command: failed to run");
                if let Some(sink) = sink {
                    sink.log(&e.to_string());
                }
                CommandOutput::failure(e.to_string())
            }
        }
    }
}

/// Forward complete lines from `stream` into `tx` until EOF.
///
/// Invalid UTF-8 is replaced rather than treated as an error.
fn spawn_line_reader<R>(stream: R, tx: mpsc::UnboundedSender<String>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "command: output stream closed with error");
                    break;
                }
            }
        }
    })
}

/// Kill the child (and its process group on Unix) and reap it.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    kill_group(pid);
    let _ = child.kill().await;
    let _ = child.wait().await;
}

/// SIGKILL every process left in the command's process group.
fn kill_group(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = pid;
}

fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
