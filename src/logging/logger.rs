//! Structured logger with per-module summary collection.
use std::path::PathBuf;
use std::sync::Mutex;

use super::types::{Log, ModuleEntry, ModuleStatus};
use super::utils::log_file_path;

/// Implement the display methods of [`Log`] by delegating to inherent methods
/// of the same name on the implementing type.
///
/// The `record_module` method is **not** included because its signature
/// differs from the `fn(&self, &str)` pattern shared by the display methods.
macro_rules! forward_log_methods {
    ($($method:ident),+ $(,)?) => {
        $(
            fn $method(&self, msg: &str) {
                self.$method(msg);
            }
        )+
    };
}

/// Structured logger with summary collection.
///
/// All messages are always written to a persistent log file at
/// `$XDG_CACHE_HOME/modman/<command>.log` (default `~/.cache/modman/<command>.log`)
/// with timestamps and ANSI codes stripped, regardless of the verbose flag.
#[derive(Debug)]
pub struct Logger {
    modules: Mutex<Vec<ModuleEntry>>,
    log_file: Option<PathBuf>,
}

impl Logger {
    /// Create a new logger.
    ///
    /// Stores the log file path for display in the run summary.  The log file
    /// itself is created and initialised by [`init_subscriber`](super::subscriber::init_subscriber) via
    /// [`FileLayer`](super::subscriber::FileLayer); this constructor does not write to the file.
    #[must_use]
    pub fn new(command: &str) -> Self {
        Self {
            modules: Mutex::new(Vec::new()),
            log_file: log_file_path(command),
        }
    }

    /// Return the log file path, if available.
    #[cfg(test)]
    pub const fn log_path(&self) -> Option<&PathBuf> {
        self.log_file.as_ref()
    }

    /// Return a clone of all recorded module entries (test-only).
    #[cfg(test)]
    pub(crate) fn module_entries(&self) -> Vec<ModuleEntry> {
        self.modules.lock().map_or_else(|_| vec![], |g| g.clone())
    }

    /// Log an error message.
    pub fn error(&self, msg: &str) {
        tracing::error!("{msg}");
    }

    /// Log a warning message.
    pub fn warn(&self, msg: &str) {
        tracing::warn!("{msg}");
    }

    /// Log a stage header (major section).
    pub fn stage(&self, msg: &str) {
        tracing::info!(target: "modman::stage", "{msg}");
    }

    /// Log an informational message.
    pub fn info(&self, msg: &str) {
        tracing::info!("{msg}");
    }

    /// Log a debug message (suppressed on console unless verbose; always
    /// written to the log file via the [`FileLayer`](super::subscriber::FileLayer)).
    pub fn debug(&self, msg: &str) {
        tracing::debug!("{msg}");
    }

    /// Record a module result for the summary.
    pub fn record_module(&self, name: &str, status: ModuleStatus, message: Option<&str>) {
        if let Ok(mut guard) = self.modules.lock() {
            guard.push(ModuleEntry {
                name: name.to_string(),
                status,
                message: message.map(String::from),
            });
        }
    }

    /// Count the modules that did not end in [`ModuleStatus::Ok`].
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.modules.lock().map_or(0, |guard| {
            guard.iter().filter(|m| m.status.is_failure()).count()
        })
    }

    /// Print the summary of all recorded modules.
    pub fn print_summary(&self) {
        let modules = match self.modules.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => return,
        };
        if modules.is_empty() {
            return;
        }

        println!();
        self.stage("Summary");

        let mut ok = 0u32;
        let mut script_failed = 0u32;
        let mut failed = 0u32;
        let mut aborted = 0u32;
        let mut cancelled = 0u32;

        for module in &modules {
            let (icon, color) = match module.status {
                ModuleStatus::Ok => {
                    ok += 1;
                    ("✓", "\x1b[32m")
                }
                ModuleStatus::ScriptFailed => {
                    script_failed += 1;
                    ("!", "\x1b[33m")
                }
                ModuleStatus::Failed => {
                    failed += 1;
                    ("✗", "\x1b[31m")
                }
                ModuleStatus::Aborted => {
                    aborted += 1;
                    ("✗", "\x1b[31m")
                }
                ModuleStatus::Cancelled => {
                    cancelled += 1;
                    ("·", "\x1b[2m")
                }
            };

            let suffix = module
                .message
                .as_ref()
                .map_or_else(String::new, |msg| format!(" ({msg})"));

            self.info(&format!("{color}{icon} {}{suffix}\x1b[0m", module.name));
        }

        println!();
        let total = ok + script_failed + failed + aborted + cancelled;
        self.info(&format!(
            "{total} modules: \x1b[32m{ok} ok\x1b[0m, \x1b[33m{script_failed} script failed\x1b[0m, \x1b[31m{failed} failed\x1b[0m, \x1b[31m{aborted} aborted\x1b[0m, \x1b[2m{cancelled} cancelled\x1b[0m"
        ));

        if let Some(path) = &self.log_file {
            self.info(&format!("\x1b[2mlog: {}\x1b[0m", path.display()));
        }
    }
}

impl Log for Logger {
    forward_log_methods!(stage, info, debug, warn, error);

    fn record_module(&self, name: &str, status: ModuleStatus, message: Option<&str>) {
        self.record_module(name, status, message);
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::logging::isolated_logger;
    use std::fs;

    #[test]
    fn logger_new() {
        let (log, _tmp, _guard) = isolated_logger();
        assert!(log.module_entries().is_empty(), "expected empty module list");
    }

    #[test]
    fn record_module_with_message() {
        let (log, _tmp, _guard) = isolated_logger();
        log.record_module("vim", ModuleStatus::Aborted, Some("target exists"));
        let entries = log.module_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "vim");
        assert_eq!(entries[0].status, ModuleStatus::Aborted);
        assert_eq!(entries[0].message, Some("target exists".to_string()));
    }

    #[test]
    fn failure_count_counts_every_non_ok_status() {
        let (log, _tmp, _guard) = isolated_logger();
        assert_eq!(log.failure_count(), 0);
        log.record_module("a", ModuleStatus::Ok, None);
        log.record_module("b", ModuleStatus::Failed, Some("error 1"));
        log.record_module("c", ModuleStatus::ScriptFailed, Some("exit 1"));
        log.record_module("d", ModuleStatus::Cancelled, None);
        assert_eq!(log.failure_count(), 3);
    }

    #[test]
    fn log_trait_delegates_to_logger() {
        let (log, _tmp, _guard) = isolated_logger();
        let log_ref: &dyn Log = &log;
        log_ref.record_module("via-trait", ModuleStatus::Ok, None);
        assert_eq!(log.module_entries().len(), 1);
    }

    #[test]
    fn debug_always_written_to_file() {
        let (log, _tmp, _guard) = isolated_logger();
        let marker = format!("debug-marker-{}", std::process::id());
        log.debug(&marker);
        let path = log.log_path().expect("log path should exist");
        let contents = fs::read_to_string(path).unwrap();
        assert!(
            contents.contains(&marker),
            "debug messages should always appear in the log file"
        );
    }

    #[test]
    fn error_written_to_file() {
        let (log, _tmp, _guard) = isolated_logger();
        let marker = format!("error-marker-{}", std::process::id());
        log.error(&marker);
        let path = log.log_path().expect("log path");
        let contents = fs::read_to_string(path).unwrap();
        assert!(contents.contains("[error]"), "error tag should appear in log file");
        assert!(contents.contains(&marker));
    }

    #[test]
    fn stage_written_to_file_with_arrow() {
        let (log, _tmp, _guard) = isolated_logger();
        let marker = format!("stage-marker-{}", std::process::id());
        log.stage(&marker);
        let path = log.log_path().expect("log path");
        let contents = fs::read_to_string(path).unwrap();
        assert!(contents.contains(&format!("==> {marker}")));
    }

    #[test]
    fn summary_is_written_to_file() {
        let (log, _tmp, _guard) = isolated_logger();
        log.record_module("vim", ModuleStatus::Ok, None);
        log.record_module("zsh", ModuleStatus::ScriptFailed, Some("exited with code 1"));
        log.print_summary();
        let path = log.log_path().expect("log path");
        let contents = fs::read_to_string(path).unwrap();
        assert!(contents.contains("✓ vim"));
        assert!(contents.contains("! zsh (exited with code 1)"));
        assert!(contents.contains("2 modules: 1 ok, 1 script failed, 0 failed, 0 aborted, 0 cancelled"));
    }
}
