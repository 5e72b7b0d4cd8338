//! Command execution provider.
//!
//! Samplers that shell out (`apcaccess`, `smartctl`, ...) go through
//! [`CommandRunner`] so they can be exercised with canned output in tests.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

/// Default per-command timeout (60 seconds).
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors from running an external command.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The process could not be spawned.
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process ran longer than the configured timeout and was killed.
    #[error("'{program}' timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    /// The process exited with a non-zero status.
    #[error("'{program}' exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

/// Runs a program and returns its standard output.
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync + 'static {
    /// Run `program` with `args` and return stdout as UTF-8 (lossy).
    async fn run(&self, program: &str, args: &[&str]) -> Result<String, ExecError>;

    /// Whether `program` can be resolved for execution.
    fn command_exists(&self, program: &str) -> bool;
}

/// [`CommandRunner`] backed by `tokio::process`.
#[derive(Debug, Clone)]
pub struct SystemCommandRunner {
    timeout: Duration,
}

impl Default for SystemCommandRunner {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}

impl SystemCommandRunner {
    /// Create a runner that kills commands after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Configured per-command timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait::async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<String, ExecError> {
        tracing::trace!(program, ?args, "Running command");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Spawn {
                program: program.to_owned(),
                source,
            })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| ExecError::Spawn {
                program: program.to_owned(),
                source,
            })?,
            Err(_) => {
                return Err(ExecError::Timeout {
                    program: program.to_owned(),
                    timeout: self.timeout,
                });
            }
        };

        if !output.status.success() {
            return Err(ExecError::Failed {
                program: program.to_owned(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn command_exists(&self, program: &str) -> bool {
        find_in_path(program).is_some()
    }
}

/// Resolve `program` the way a shell would: as-is when it contains a path
/// separator, otherwise against each `PATH` entry.
pub fn find_in_path(program: &str) -> Option<PathBuf> {
    if program.contains(std::path::MAIN_SEPARATOR) {
        let path = Path::new(program);
        return path.is_file().then(|| path.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}
