//! Core logging types: module entries, status, and the [`Log`] trait.

/// Per-module result for summary reporting.
#[derive(Debug, Clone)]
pub struct ModuleEntry {
    /// Module name.
    pub name: String,
    /// Final status of the module.
    pub status: ModuleStatus,
    /// Optional detail message (e.g., the error description).
    pub message: Option<String>,
}

/// How a module ended up after one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleStatus {
    /// Links and script all succeeded.
    Ok,
    /// Links are in place but the lifecycle script failed.
    ScriptFailed,
    /// Linking failed part-way.
    Failed,
    /// Validation failed; nothing was touched.
    Aborted,
    /// Not started because the run was interrupted.
    Cancelled,
}

impl ModuleStatus {
    /// Whether this status makes the command exit non-zero.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        !matches!(self, Self::Ok)
    }
}

/// Abstraction over logging backends.
///
/// Command handlers log through this trait so they can be exercised with
/// any backend.
pub trait Log: Send + Sync {
    /// Log a stage header (major section).
    fn stage(&self, msg: &str);
    /// Log an informational message.
    fn info(&self, msg: &str);
    /// Log a debug message (may be suppressed on console).
    fn debug(&self, msg: &str);
    /// Log a warning message.
    fn warn(&self, msg: &str);
    /// Log an error message.
    fn error(&self, msg: &str);
    /// Record a module result for the summary.
    fn record_module(&self, name: &str, status: ModuleStatus, message: Option<&str>);
}
