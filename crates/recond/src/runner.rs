//! External tool runner.
//!
//! Spawns reconnaissance tools with argv, optional stdin, working
//! directory, and a timeout; captures both output streams to
//! completion and maps failures to distinct error kinds. Non-zero
//! exit is an error value, never a panic.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Maximum stderr carried inside an execution error.
const STDERR_SNIPPET_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{tool} not found at {program}")]
    NotFound { tool: String, program: String },
    #[error("{tool}: permission denied")]
    PermissionDenied { tool: String },
    #[error("{tool} timed out after {timeout_sec} seconds")]
    Timeout { tool: String, timeout_sec: u64 },
    #[error("{tool} failed with exit code {exit_code}: {stderr}")]
    Execution {
        tool: String,
        exit_code: i32,
        /// First 500 chars of stderr (or stdout when stderr is empty).
        stderr: String,
        duration_ms: u64,
    },
    #[error("{tool}: working directory missing: {dir}")]
    WorkingDirMissing { tool: String, dir: PathBuf },
    #[error("{tool}: io error: {source}")]
    Io {
        tool: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ToolError>;

/// One tool invocation.
#[derive(Debug)]
pub struct ToolCommand {
    /// Short name used in logs and error messages.
    pub tool: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Bytes piped to the child's stdin, if any.
    pub stdin: Option<String>,
    pub cwd: Option<PathBuf>,
    pub timeout: Duration,
}

impl ToolCommand {
    pub fn new(tool: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.into(),
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            cwd: None,
            timeout: Duration::from_secs(600),
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

    pub fn stdin(mut self, content: impl Into<String>) -> Self {
        self.stdin = Some(content.into());
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn timeout_sec(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }
}

/// Captured result of a successful (exit 0) invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

/// Runs external tools to completion.
#[derive(Debug, Default, Clone, Copy)]
pub struct ToolRunner;

impl ToolRunner {
    pub fn new() -> Self {
        Self
    }

    /// Execute a tool and wait for it to exit.
    ///
    /// Both pipes are drained to completion, so a chatty child cannot
    /// deadlock on a full pipe. Output bytes are decoded lossily.
    pub async fn run(&self, spec: ToolCommand) -> Result<ToolOutput> {
        if let Some(cwd) = &spec.cwd {
            if !cwd.is_dir() {
                return Err(ToolError::WorkingDirMissing {
                    tool: spec.tool.clone(),
                    dir: cwd.clone(),
                });
            }
        }

        let start = Utc::now();

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        debug!(
            tool = %spec.tool,
            program = %spec.program.display(),
            args = ?spec.args,
            "spawning tool"
        );

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ToolError::NotFound {
                tool: spec.tool.clone(),
                program: spec.program.display().to_string(),
            },
            std::io::ErrorKind::PermissionDenied => ToolError::PermissionDenied {
                tool: spec.tool.clone(),
            },
            _ => ToolError::Io {
                tool: spec.tool.clone(),
                source: e,
            },
        })?;

        if let Some(content) = &spec.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                // A child that exits early closes the pipe; that is fine.
                let _ = stdin.write_all(content.as_bytes()).await;
                drop(stdin);
            }
        }

        let output = match timeout(spec.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| ToolError::Io {
                tool: spec.tool.clone(),
                source: e,
            })?,
            Err(_) => {
                warn!(
                    tool = %spec.tool,
                    timeout_sec = spec.timeout.as_secs(),
                    "tool timed out"
                );
                return Err(ToolError::Timeout {
                    tool: spec.tool.clone(),
                    timeout_sec: spec.timeout.as_secs(),
                });
            }
        };

        let duration_ms = (Utc::now() - start).num_milliseconds().max(0) as u64;
        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        debug!(
            tool = %spec.tool,
            exit_code = exit_code,
            duration_ms = duration_ms,
            stdout_bytes = stdout.len(),
            "tool finished"
        );

        if exit_code != 0 {
            let snippet_source = if stderr.trim().is_empty() {
                &stdout
            } else {
                &stderr
            };
            let snippet: String = snippet_source.chars().take(STDERR_SNIPPET_CHARS).collect();
            return Err(ToolError::Execution {
                tool: spec.tool.clone(),
                exit_code,
                stderr: snippet,
                duration_ms,
            });
        }

        Ok(ToolOutput {
            stdout,
            stderr,
            exit_code,
            duration_ms,
        })
    }
}

impl ToolError {
    /// Transient failures the worker layer may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Io { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_captures_stdout() {
        let runner = ToolRunner::new();
        let output = runner
            .run(ToolCommand::new("echo", "echo").arg("hello"))
            .await
            .unwrap();
        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn run_pipes_stdin() {
        let runner = ToolRunner::new();
        let output = runner
            .run(ToolCommand::new("cat", "cat").stdin("a.example.com\nb.example.com\n"))
            .await
            .unwrap();
        assert_eq!(output.stdout, "a.example.com\nb.example.com\n");
    }

    #[tokio::test]
    async fn missing_binary_maps_to_not_found() {
        let runner = ToolRunner::new();
        let err = runner
            .run(ToolCommand::new("ghost", "/nonexistent/tool-binary"))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound { .. }));
    }

    #[tokio::test]
    async fn nonzero_exit_maps_to_execution_with_snippet() {
        let runner = ToolRunner::new();
        let err = runner
            .run(
                ToolCommand::new("sh", "sh")
                    .arg("-c")
                    .arg("echo boom >&2; exit 3"),
            )
            .await
            .unwrap_err();
        match err {
            ToolError::Execution {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, 3);
                assert!(stderr.contains("boom"));
            }
            other => panic!("expected Execution, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stderr_snippet_is_bounded() {
        let runner = ToolRunner::new();
        let err = runner
            .run(
                ToolCommand::new("sh", "sh")
                    .arg("-c")
                    .arg("head -c 2000 /dev/zero | tr '\\0' 'x' >&2; exit 1"),
            )
            .await
            .unwrap_err();
        match err {
            ToolError::Execution { stderr, .. } => assert!(stderr.chars().count() <= 500),
            other => panic!("expected Execution, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn deadline_maps_to_timeout() {
        let runner = ToolRunner::new();
        let err = runner
            .run(ToolCommand::new("sleep", "sleep").arg("5").timeout_sec(0))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn missing_cwd_is_rejected() {
        let runner = ToolRunner::new();
        let err = runner
            .run(ToolCommand::new("echo", "echo").cwd("/nonexistent/workdir"))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::WorkingDirMissing { .. }));
    }
}
