//! External process execution.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{RunnerError, RunnerResult};

/// Lines of stderr kept for error messages.
const STDERR_TAIL_LINES: usize = 20;

/// A command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Zero means no timeout.
    pub timeout_secs: u64,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout_secs: 0,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Shell-like rendering for logs and errors.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (-1 when killed by a signal).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub success: bool,
}

impl CommandOutput {
    /// A successful, silent output.
    pub fn ok() -> Self {
        Self {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
            success: true,
        }
    }

    /// A failed output with `stderr`.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
            duration_ms: 0,
            success: false,
        }
    }

    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }

    /// Last lines of stderr, falling back to stdout when stderr is empty.
    pub fn stderr_tail(&self) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let lines: Vec<&str> = source.lines().collect();
        let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
        lines[start..].join("\n")
    }

    /// `Ok(self)` when passed, `CommandFailed` otherwise.
    pub fn into_result(self, spec: &CommandSpec) -> RunnerResult<CommandOutput> {
        if self.passed() {
            Ok(self)
        } else {
            Err(RunnerError::CommandFailed {
                command: spec.display(),
                exit_code: self.exit_code,
                stderr_tail: self.stderr_tail(),
            })
        }
    }
}

/// Runs external commands.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `spec` to completion. A non-zero exit is not an error here.
    async fn run(&self, spec: &CommandSpec) -> RunnerResult<CommandOutput>;

    /// Run `spec` and fail on a non-zero exit.
    async fn run_checked(&self, spec: &CommandSpec) -> RunnerResult<CommandOutput> {
        self.run(spec).await?.into_result(spec)
    }
}

/// Spawns real processes with `tokio::process`, streaming output into
/// `tracing` as it arrives.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> RunnerResult<CommandOutput> {
        let start = Instant::now();
        let command_line = spec.display();
        info!(command = %command_line, "Running");

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &spec.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|source| RunnerError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let program = spec.program.clone();

        let run = async {
            let (stdout, stderr) =
                futures::future::try_join(drain(stdout, &program), drain(stderr, &program))
                    .await?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, stdout, stderr))
        };

        let (status, stdout, stderr) = if spec.timeout_secs > 0 {
            tokio::time::timeout(Duration::from_secs(spec.timeout_secs), run)
                .await
                .map_err(|_| RunnerError::Timeout {
                    command: command_line.clone(),
                    secs: spec.timeout_secs,
                })??
        } else {
            run.await?
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = status.code().unwrap_or(-1);
        debug!(command = %command_line, exit_code, duration_ms, "Finished");

        Ok(CommandOutput {
            exit_code,
            stdout,
            stderr,
            duration_ms,
            success: status.success(),
        })
    }
}

/// Read `stream` line by line, forwarding each line to `tracing`.
async fn drain<R>(stream: Option<R>, program: &str) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut captured = String::new();
    let Some(stream) = stream else {
        return Ok(captured);
    };
    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines.next_line().await? {
        info!(program = %program, "{}", line);
        captured.push_str(&line);
        captured.push('\n');
    }
    Ok(captured)
}
