//! Local command execution
//!
//! Providers that drive a CLI (vagrant, ssh, scp) go through this interface
//! so they share timeout handling and output capture, and so tests can
//! substitute a scripted executor.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::error::{HostlabError, HostlabResult};

/// Options for command execution
#[derive(Debug, Clone, Default)]
pub struct CommandOptions {
    /// Working directory for the command
    pub cwd: Option<PathBuf>,
    /// Environment variables to set
    pub env: Option<HashMap<String, String>>,
    /// Timeout for command execution
    pub timeout: Option<Duration>,
    /// Input to send to stdin
    pub stdin_input: Option<Vec<u8>>,
}

impl CommandOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cwd<P: Into<PathBuf>>(mut self, cwd: P) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add a single environment variable
    pub fn with_env_var<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_stdin<I: Into<Vec<u8>>>(mut self, input: I) -> Self {
        self.stdin_input = Some(input.into());
        self
    }
}

/// Output from command execution
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit status code (-1 when terminated by a signal)
    pub status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub success: bool,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Turn a non-zero exit into a `CommandFailed` error carrying the output
    pub fn into_result(self, command_line: &str) -> HostlabResult<CommandOutput> {
        if self.success {
            Ok(self)
        } else {
            Err(HostlabError::CommandFailed {
                command: command_line.to_string(),
                exit_code: self.status,
                stdout: self.stdout_string(),
                stderr: self.stderr_string(),
            })
        }
    }
}

/// Render a program and its arguments for logs and error messages
pub fn command_line(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Command execution interface
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Execute a command and wait for completion
    async fn execute(
        &self,
        program: &str,
        args: &[&str],
        options: CommandOptions,
    ) -> HostlabResult<CommandOutput>;

    /// Execute a command, failing on a non-zero exit status
    async fn execute_checked(
        &self,
        program: &str,
        args: &[&str],
        options: CommandOptions,
    ) -> HostlabResult<CommandOutput> {
        self.execute(program, args, options)
            .await?
            .into_result(&command_line(program, args))
    }
}

/// Standard implementation of CommandExecutor using tokio::process
#[derive(Debug, Clone)]
pub struct TokioCommandExecutor {
    /// Timeout used when the caller does not supply one
    pub default_timeout: Option<Duration>,
}

impl TokioCommandExecutor {
    pub fn new() -> Self {
        Self {
            default_timeout: Some(Duration::from_secs(3600)),
        }
    }

    pub fn with_default_timeout(timeout: Duration) -> Self {
        Self {
            default_timeout: Some(timeout),
        }
    }

    async fn run(mut cmd: Command, options: &CommandOptions) -> HostlabResult<CommandOutput> {
        let mut child = cmd.spawn()?;

        // Feed stdin on its own task so the output pipes drain meanwhile
        let writer = match (options.stdin_input.clone(), child.stdin.take()) {
            (Some(data), Some(mut stdin)) => Some(tokio::spawn(async move {
                stdin.write_all(&data).await?;
                stdin.shutdown().await
            })),
            _ => None,
        };

        let output = child.wait_with_output().await?;

        if let Some(writer) = writer {
            match writer.await.map_err(std::io::Error::other)? {
                Ok(()) => {}
                // The command exited without reading all of its input
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    debug!("Command closed stdin early: {}", e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
            success: output.status.success(),
            duration: Duration::ZERO,
        })
    }
}

impl Default for TokioCommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandExecutor for TokioCommandExecutor {
    #[instrument(skip(self, args, options), fields(args_count = args.len()))]
    async fn execute(
        &self,
        program: &str,
        args: &[&str],
        options: CommandOptions,
    ) -> HostlabResult<CommandOutput> {
        debug!("Executing command: {}", command_line(program, args));

        let start_time = Instant::now();
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }
        if let Some(env) = &options.env {
            cmd.envs(env);
        }
        if options.stdin_input.is_some() {
            cmd.stdin(Stdio::piped());
        } else {
            cmd.stdin(Stdio::null());
        }

        let result = match options.timeout.or(self.default_timeout) {
            Some(timeout) => tokio::time::timeout(timeout, Self::run(cmd, &options))
                .await
                .map_err(|_| HostlabError::Timeout {
                    operation: command_line(program, args),
                    duration: timeout,
                })?,
            None => Self::run(cmd, &options).await,
        };

        let duration = start_time.elapsed();
        match result {
            Ok(mut output) => {
                output.duration = duration;
                debug!(
                    "Command '{}' exited with {} after {:?}",
                    program, output.status, duration
                );
                Ok(output)
            }
            Err(e) => {
                warn!("Command '{}' failed after {:?}: {}", program, duration, e);
                Err(e)
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_captures_output() {
        let executor = TokioCommandExecutor::new();
        let output = executor
            .execute("sh", &["-c", "echo out; echo err >&2"], CommandOptions::new())
            .await
            .unwrap();

        assert!(output.success);
        assert_eq!(output.stdout_string().trim(), "out");
        assert_eq!(output.stderr_string().trim(), "err");
    }

    #[tokio::test]
    async fn test_stdin_is_forwarded() {
        let executor = TokioCommandExecutor::new();
        let output = executor
            .execute("cat", &[], CommandOptions::new().with_stdin("hello"))
            .await
            .unwrap();
        assert_eq!(output.stdout_string(), "hello");
    }

    #[tokio::test]
    async fn test_large_stdin_with_large_output() {
        // Well past the pipe buffer in both directions
        let input = "x".repeat(4 * 1024 * 1024);
        let executor = TokioCommandExecutor::new();
        let output = executor
            .execute(
                "cat",
                &[],
                CommandOptions::new()
                    .with_stdin(input.clone())
                    .with_timeout(Duration::from_secs(30)),
            )
            .await
            .unwrap();

        assert!(output.success);
        assert_eq!(output.stdout.len(), input.len());
    }

    #[tokio::test]
    async fn test_checked_failure_carries_output() {
        let executor = TokioCommandExecutor::new();
        let err = executor
            .execute_checked("sh", &["-c", "echo nope >&2; exit 3"], CommandOptions::new())
            .await
            .unwrap_err();

        match err {
            HostlabError::CommandFailed {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, 3);
                assert_eq!(stderr.trim(), "nope");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_timeout() {
        let executor = TokioCommandExecutor::new();
        let err = executor
            .execute(
                "sleep",
                &["5"],
                CommandOptions::new().with_timeout(Duration::from_millis(50)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HostlabError::Timeout { .. }));
    }
}
