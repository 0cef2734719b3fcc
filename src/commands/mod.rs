//! Top-level subcommand orchestration.
pub mod install;
pub mod list;
pub mod uninstall;
pub mod version;

use anyhow::{Context as _, Result};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use crate::cli::{GlobalOpts, SelectOpts};
use crate::engine::{BatchEntry, BatchReport, Engine, Operation, Phase, Report};
use crate::logging::{Log, Logger, ModuleStatus};
use crate::module::{Module, manifest};

/// Directory name used under `$HOME` when no modules directory is given.
const DEFAULT_MODULES_DIR: &str = ".dotfiles";

/// Paths every command needs before it can load a module.
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// Directory holding one sub-directory per module.
    pub modules_dir: PathBuf,
    /// Home directory used to resolve relative targets.
    pub home: PathBuf,
}

impl CommandContext {
    /// Resolve the home and modules directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn init(global: &GlobalOpts) -> Result<Self> {
        let home = resolve_home()?;
        let modules_dir = global
            .modules_dir
            .clone()
            .unwrap_or_else(|| home.join(DEFAULT_MODULES_DIR));
        Ok(Self { modules_dir, home })
    }
}

/// Resolve the home directory from `HOME`, falling back to `USERPROFILE`.
///
/// # Errors
///
/// Returns an error if neither variable is set to a non-empty value.
pub fn resolve_home() -> Result<PathBuf> {
    ["HOME", "USERPROFILE"]
        .iter()
        .filter_map(std::env::var_os)
        .find(|value| !value.is_empty())
        .map(PathBuf::from)
        .context("cannot determine home directory: set HOME")
}

/// Load the modules chosen by `opts`.
///
/// With `--all`, every module in the directory except the excluded ones is
/// returned; modules that fail to load are recorded as aborted and logged.
/// Named modules are loaded in the order given and any load failure is an
/// error.
///
/// # Errors
///
/// Returns an error if the modules directory cannot be read or a named
/// module cannot be loaded.
pub fn select_modules(ctx: &CommandContext, opts: &SelectOpts, log: &dyn Log) -> Result<Vec<Module>> {
    if !opts.all {
        return opts
            .modules
            .iter()
            .map(|name| manifest::find(&ctx.modules_dir, name, &ctx.home).map_err(Into::into))
            .collect();
    }

    let mut modules = Vec::new();
    for loaded in manifest::list(&ctx.modules_dir, &ctx.home)? {
        match loaded {
            Ok(module) if opts.exclude.iter().any(|e| e == module.name()) => {
                log.debug(&format!("excluded: {}", module.name()));
            }
            Ok(module) => modules.push(module),
            Err(e) => {
                let name = e.module().unwrap_or("?").to_string();
                if opts.exclude.contains(&name) {
                    continue;
                }
                let message = e.to_string();
                log.error(&message);
                log.record_module(&name, ModuleStatus::Aborted, Some(message.as_str()));
            }
        }
    }
    Ok(modules)
}

/// Drive `operation` over the selected modules, print results and the
/// summary, and bail if any module did not succeed.
///
/// # Errors
///
/// Returns an error if module selection fails or any module fails.
pub fn run_operation(
    global: &GlobalOpts,
    opts: &SelectOpts,
    operation: Operation,
    log: &Logger,
    cancel: &AtomicBool,
) -> Result<()> {
    let ctx = CommandContext::init(global)?;
    log.debug(&format!("modules directory: {}", ctx.modules_dir.display()));
    log.debug(&format!("home directory: {}", ctx.home.display()));

    let modules = select_modules(&ctx, opts, log)?;
    log.debug(&format!("{} module(s) selected", modules.len()));

    let engine = Engine::new();
    let batch = match operation {
        Operation::Install => engine.install_all(&modules, cancel),
        Operation::Uninstall => engine.uninstall_all(&modules, cancel),
    };

    record_batch(&batch, log);

    if global.json {
        println!("{}", serde_json::to_string_pretty(&batch_json(&batch))?);
    } else {
        for entry in &batch.entries {
            log_entry(entry, log);
        }
        log.print_summary();
    }

    let count = log.failure_count();
    if count > 0 {
        anyhow::bail!("{count} module(s) failed");
    }
    Ok(())
}

/// Map a batch entry onto the summary status.
#[must_use]
pub fn entry_status(entry: &BatchEntry) -> ModuleStatus {
    match entry {
        BatchEntry::Completed(_) => ModuleStatus::Ok,
        BatchEntry::Cancelled { .. } => ModuleStatus::Cancelled,
        BatchEntry::Failed(e) => match e.report.phase {
            Phase::ScriptFailed => ModuleStatus::ScriptFailed,
            Phase::Aborted => ModuleStatus::Aborted,
            _ => ModuleStatus::Failed,
        },
    }
}

fn record_batch(batch: &BatchReport, log: &dyn Log) {
    for entry in &batch.entries {
        let message = match entry {
            BatchEntry::Failed(e) => Some(e.primary.to_string()),
            BatchEntry::Completed(_) | BatchEntry::Cancelled { .. } => None,
        };
        log.record_module(entry.module(), entry_status(entry), message.as_deref());
    }
}

fn log_entry(entry: &BatchEntry, log: &dyn Log) {
    match entry {
        BatchEntry::Completed(report) => {
            log.stage(&format!("{} {}", report.operation, report.module));
            for line in render_report(report).lines() {
                log.info(line);
            }
        }
        BatchEntry::Failed(e) => {
            log.stage(&format!("{} {}", e.report.operation, e.report.module));
            for line in render_report(&e.report).lines() {
                log.info(line);
            }
            for error in e.errors() {
                log.error(&error.to_string());
            }
        }
        BatchEntry::Cancelled { module } => {
            log.warn(&format!("{module}: cancelled before start"));
        }
    }
}

/// Render the per-mapping outcomes and script result of a report.
#[must_use]
pub fn render_report(report: &Report) -> String {
    let mut out = String::new();
    for mapping in &report.outcomes {
        let _ = writeln!(
            out,
            "{} -> {}: {}",
            display_relative(&mapping.target),
            mapping.source.display(),
            mapping.outcome
        );
    }
    if let Some(script) = &report.script {
        let name = script
            .script
            .file_name()
            .map_or_else(|| script.script.display().to_string(), |n| n.to_string_lossy().to_string());
        match &script.failure {
            None => {
                let _ = writeln!(out, "{name}: ok");
            }
            Some(failure) => {
                let _ = writeln!(out, "{name}: {failure}");
            }
        }
        for line in script.stderr.lines().filter(|l| !l.trim().is_empty()) {
            let _ = writeln!(out, "  | {line}");
        }
    }
    let _ = write!(out, "status: {}", report.status);
    out
}

/// Shorten `path` to `~/…` when it lives under the home directory.
fn display_relative(path: &Path) -> String {
    resolve_home()
        .ok()
        .and_then(|home| path.strip_prefix(home).ok().map(Path::to_path_buf))
        .map_or_else(
            || path.display().to_string(),
            |rest| format!("~/{}", rest.display()),
        )
}

/// JSON view of one batch entry.
#[derive(Debug, Serialize)]
struct EntryJson<'a> {
    module: &'a str,
    result: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<&'a Report>,
}

/// JSON view of a whole batch.
#[derive(Debug, Serialize)]
struct BatchJson<'a> {
    operation: Operation,
    success: bool,
    modules: Vec<EntryJson<'a>>,
}

fn batch_json(batch: &BatchReport) -> BatchJson<'_> {
    let modules = batch
        .entries
        .iter()
        .map(|entry| EntryJson {
            module: entry.module(),
            result: match entry_status(entry) {
                ModuleStatus::Ok => "ok",
                ModuleStatus::ScriptFailed => "script_failed",
                ModuleStatus::Failed => "failed",
                ModuleStatus::Aborted => "aborted",
                ModuleStatus::Cancelled => "cancelled",
            },
            errors: match entry {
                BatchEntry::Failed(e) => e.errors().map(ToString::to_string).collect(),
                BatchEntry::Completed(_) | BatchEntry::Cancelled { .. } => Vec::new(),
            },
            report: entry.report(),
        })
        .collect();
    BatchJson {
        operation: batch.operation,
        success: batch.is_success(),
        modules,
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::engine::{LinkOutcome, MappingOutcome, ScriptStatus, Status};
    use crate::error::ScriptFailure;

    fn sample_report() -> Report {
        let mut report = Report::new("vim", Operation::Install);
        report.status = Status::PartialFailure;
        report.phase = Phase::ScriptFailed;
        report.outcomes = vec![
            MappingOutcome {
                index: 0,
                source: PathBuf::from("/m/vim/vimrc"),
                target: PathBuf::from("/nonhome/.vimrc"),
                outcome: LinkOutcome::Created,
            },
            MappingOutcome {
                index: 1,
                source: PathBuf::from("/m/vim/colors"),
                target: PathBuf::from("/nonhome/.vim/colors"),
                outcome: LinkOutcome::SkippedAlreadyCorrect,
            },
        ];
        report.script = Some(ScriptStatus {
            script: PathBuf::from("/m/vim/init.sh"),
            exit_code: Some(3),
            stdout: String::new(),
            stderr: "plugin fetch failed\n".to_string(),
            failure: Some(ScriptFailure::Exit(3)),
        });
        report
    }

    #[test]
    fn render_report_lists_mappings_and_script() {
        insta::assert_snapshot!(render_report(&sample_report()), @r"
        /nonhome/.vimrc -> /m/vim/vimrc: created
        /nonhome/.vim/colors -> /m/vim/colors: already correct
        init.sh: exited with code 3
          | plugin fetch failed
        status: partial failure
        ");
    }

    #[test]
    fn render_report_without_script() {
        let mut report = Report::new("git", Operation::Uninstall);
        report.status = Status::Success;
        report.outcomes = vec![MappingOutcome {
            index: 0,
            source: PathBuf::from("/m/git/gitconfig"),
            target: PathBuf::from("/nonhome/.gitconfig"),
            outcome: LinkOutcome::Removed,
        }];
        insta::assert_snapshot!(render_report(&report), @r"
        /nonhome/.gitconfig -> /m/git/gitconfig: removed
        status: success
        ");
    }

    #[test]
    fn entry_status_maps_terminal_phases() {
        let ok = BatchEntry::Completed(Report::new("a", Operation::Install));
        assert_eq!(entry_status(&ok), ModuleStatus::Ok);

        let cancelled = BatchEntry::Cancelled {
            module: "b".to_string(),
        };
        assert_eq!(entry_status(&cancelled), ModuleStatus::Cancelled);

        let failed = BatchEntry::Failed(crate::error::TransactionError::new(
            crate::error::ModuleError::ScriptFailed {
                module: "vim".to_string(),
                script: PathBuf::from("/m/vim/init.sh"),
                failure: ScriptFailure::Exit(3),
            },
            Vec::new(),
            sample_report(),
        ));
        assert_eq!(entry_status(&failed), ModuleStatus::ScriptFailed);
    }

    #[test]
    fn batch_json_includes_errors_and_outcomes() {
        let batch = BatchReport {
            operation: Operation::Install,
            entries: vec![
                BatchEntry::Failed(crate::error::TransactionError::new(
                    crate::error::ModuleError::ScriptFailed {
                        module: "vim".to_string(),
                        script: PathBuf::from("/m/vim/init.sh"),
                        failure: ScriptFailure::Exit(3),
                    },
                    Vec::new(),
                    sample_report(),
                )),
                BatchEntry::Cancelled {
                    module: "zsh".to_string(),
                },
            ],
        };
        let value = serde_json::to_value(batch_json(&batch)).unwrap();
        assert_eq!(value["operation"], "install");
        assert_eq!(value["success"], false);
        assert_eq!(value["modules"][0]["result"], "script_failed");
        assert_eq!(value["modules"][0]["report"]["outcomes"][0]["outcome"], "created");
        assert_eq!(value["modules"][0]["report"]["status"], "partial_failure");
        assert_eq!(value["modules"][1]["result"], "cancelled");
        assert!(value["modules"][1].get("report").is_none());
        assert!(value["modules"][1].get("errors").is_none());
    }

    #[test]
    fn context_uses_explicit_modules_dir() {
        let global = GlobalOpts {
            modules_dir: Some(PathBuf::from("/explicit/modules")),
            json: false,
        };
        if resolve_home().is_ok() {
            let ctx = CommandContext::init(&global).unwrap();
            assert_eq!(ctx.modules_dir, PathBuf::from("/explicit/modules"));
        }
    }
}
