//! Lifecycle script phase.
use std::path::Path;

use super::report::ScriptStatus;
use crate::error::ScriptFailure;
use crate::exec::Executor;

/// Runs a module's init or cleanup script.
#[derive(Clone, Copy)]
pub struct ScriptRunner<'a> {
    executor: &'a dyn Executor,
}

impl std::fmt::Debug for ScriptRunner<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptRunner")
            .field("executor", &"<dyn Executor>")
            .finish()
    }
}

impl<'a> ScriptRunner<'a> {
    /// Create a runner over `executor`.
    #[must_use]
    pub const fn new(executor: &'a dyn Executor) -> Self {
        Self { executor }
    }

    /// Run `script` inside `module_dir`.
    ///
    /// Never fails: a spawn error or non-zero exit is recorded in the
    /// returned status.
    #[must_use]
    pub fn run(&self, script: &Path, module_dir: &Path) -> ScriptStatus {
        match self.executor.run_script(script, module_dir) {
            Ok(result) => {
                let failure = if result.success {
                    None
                } else {
                    Some(result.code.map_or(ScriptFailure::Signal, ScriptFailure::Exit))
                };
                ScriptStatus {
                    script: script.to_path_buf(),
                    exit_code: result.code,
                    stdout: result.stdout,
                    stderr: result.stderr,
                    failure,
                }
            }
            Err(e) => ScriptStatus {
                script: script.to_path_buf(),
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
                failure: Some(ScriptFailure::Spawn(format!("{e:#}"))),
            },
        }
    }
}
