//! Process execution for lifecycle scripts.
use anyhow::{Context as _, Result};
use std::path::Path;
use std::process::{Command, Output, Stdio};

/// Result of a command execution.
#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
    /// Whether the process exited with status zero.
    pub success: bool,
    /// Exit code; `None` when the process was killed by a signal.
    pub code: Option<i32>,
}

impl From<Output> for ExecResult {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            code: output.status.code(),
        }
    }
}

/// Abstraction over process spawning so the script phase can be tested
/// without running real programs.
pub trait Executor: Send + Sync {
    /// Run `script` with `dir` as working directory and capture its output.
    ///
    /// A non-zero exit is not an error; inspect [`ExecResult::success`].
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be started.
    fn run_script(&self, script: &Path, dir: &Path) -> Result<ExecResult>;
}

/// [`Executor`] that spawns real processes.
///
/// Scripts share the caller's stdin so they can prompt (for example a package
/// manager asking for confirmation). Their stdout and stderr are captured and
/// only become visible once the script exits.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

impl Executor for SystemExecutor {
    fn run_script(&self, script: &Path, dir: &Path) -> Result<ExecResult> {
        let output = Command::new(script)
            .current_dir(dir)
            .stdin(Stdio::inherit())
            .output()
            .with_context(|| format!("failed to execute: {}", script.display()))?;
        Ok(ExecResult::from(output))
    }
}
