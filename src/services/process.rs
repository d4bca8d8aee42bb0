//! Runs the external git binary (and its ssh helpers) as subprocesses with
//! environment overlay, timeout and cancellation.

use crate::errors::ToolError;
use crate::services::logger::Logger;
use crate::utils::cancel::{wait_cancelled, CancelToken};
use crate::utils::text::decode_output;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// Outcome of one subprocess invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn into_stdout(self) -> Result<String, ToolError> {
        if self.success() {
            return Ok(self.stdout);
        }
        Err(ToolError::command_failed(
            self.exit_code,
            &self.stdout,
            &self.stderr,
        ))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Working copy the command targets; passed to git as `-C <dir>`.
    pub cwd: Option<PathBuf>,
    /// Merged over the inherited environment, never replacing it.
    pub env: Vec<(String, String)>,
    pub timeout_ms: Option<u64>,
    /// Suppresses echoing the argument vector to logs.
    pub silent: bool,
    pub cancel: Option<CancelToken>,
}

impl ExecOptions {
    pub fn in_dir(cwd: impl AsRef<Path>) -> Self {
        Self {
            cwd: Some(cwd.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_cancel(mut self, cancel: Option<CancelToken>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>, Vec<u8>, Vec<u8>),
    TimedOut(u64),
    Cancelled,
}

fn spawn_reader<R>(reader: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            let _ = reader.read_to_end(&mut buf).await;
        }
        buf
    })
}

#[derive(Clone)]
pub struct ProcessExecutor {
    logger: Logger,
    git_binary: String,
}

impl ProcessExecutor {
    pub fn new(logger: Logger, git_binary: impl Into<String>) -> Self {
        Self {
            logger: logger.child("exec"),
            git_binary: git_binary.into(),
        }
    }

    pub fn git_binary(&self) -> &str {
        &self.git_binary
    }

    fn git_argv(cwd: Option<&Path>, args: &[String]) -> Vec<String> {
        let mut argv = Vec::with_capacity(args.len() + 4);
        if let Some(cwd) = cwd {
            argv.push("-C".to_string());
            argv.push(cwd.to_string_lossy().to_string());
        }
        argv.push("-c".to_string());
        argv.push("core.quotepath=false".to_string());
        argv.extend(args.iter().cloned());
        argv
    }

    /// Runs git and returns stdout; a non-zero exit becomes a
    /// `COMMAND_FAILED` error embedding the exit code and stderr.
    pub async fn run_git(&self, args: &[String], options: &ExecOptions) -> Result<String, ToolError> {
        self.run_git_split(args, options).await?.into_stdout()
    }

    /// Runs git and hands back stdout and stderr separately regardless of the
    /// exit code. Timeouts and cancellation are still errors.
    pub async fn run_git_split(
        &self,
        args: &[String],
        options: &ExecOptions,
    ) -> Result<CommandResult, ToolError> {
        let argv = Self::git_argv(options.cwd.as_deref(), args);
        self.run_program(&self.git_binary, &argv, options).await
    }

    pub async fn run_program(
        &self,
        program: &str,
        args: &[String],
        options: &ExecOptions,
    ) -> Result<CommandResult, ToolError> {
        if options.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            return Err(ToolError::cancelled("Operation cancelled before start"));
        }
        if options.silent {
            self.logger
                .debug("exec", Some(&serde_json::json!({ "program": program })));
        } else {
            self.logger.debug(
                "exec",
                Some(&serde_json::json!({ "program": program, "args": args })),
            );
        }

        let mut cmd = Command::new(program);
        cmd.args(args);
        for (key, value) in &options.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|err| {
            ToolError::internal(format!("Failed to spawn {}: {}", program, err))
        })?;
        let mut stdout_task = spawn_reader(child.stdout.take());
        let mut stderr_task = spawn_reader(child.stderr.take());

        let timeout = async {
            match options.timeout_ms {
                Some(ms) => {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    ms
                }
                None => std::future::pending().await,
            }
        };
        let cancelled = wait_cancelled(options.cancel.as_ref());
        // Grandchildren (an ssh master, a credential daemon) can keep the pipes
        // open after git exits, so draining them shares the same deadline.
        let finished = async {
            let status = child.wait().await;
            let stdout = (&mut stdout_task).await.unwrap_or_default();
            let stderr = (&mut stderr_task).await.unwrap_or_default();
            (status, stdout, stderr)
        };

        let outcome = tokio::select! {
            (status, stdout, stderr) = finished => Outcome::Exited(status, stdout, stderr),
            ms = timeout => Outcome::TimedOut(ms),
            _ = cancelled => Outcome::Cancelled,
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let (status, stdout, stderr) = match outcome {
            Outcome::Exited(status, stdout, stderr) => {
                let status = status.map_err(|err| {
                    ToolError::internal(format!("Failed to wait for {}: {}", program, err))
                })?;
                (status, stdout, stderr)
            }
            Outcome::TimedOut(ms) => {
                let _ = child.kill().await;
                stdout_task.abort();
                stderr_task.abort();
                self.logger.warn(
                    "exec timed out",
                    Some(&serde_json::json!({ "program": program, "timeout_ms": ms })),
                );
                return Err(ToolError::timeout(format!(
                    "{} timed out after {} ms",
                    program, ms
                )));
            }
            Outcome::Cancelled => {
                let _ = child.kill().await;
                stdout_task.abort();
                stderr_task.abort();
                self.logger
                    .info("exec cancelled", Some(&serde_json::json!({ "program": program })));
                return Err(ToolError::cancelled(format!("{} was cancelled", program)));
            }
        };

        let exit_code = status.code().unwrap_or(-1);
        self.logger.debug(
            "exit",
            Some(&serde_json::json!({
                "program": program,
                "exit_code": exit_code,
                "duration_ms": duration_ms,
            })),
        );
        Ok(CommandResult {
            exit_code,
            stdout: decode_output(&stdout),
            stderr: decode_output(&stderr),
            duration_ms,
        })
    }
}
