//! Transaction coordinator: the only entry point into the engine.
//!
//! One call drives one module through
//! `Idle → Validating → Linking → ScriptRunning → Done`, stopping in a
//! terminal state on the first failing phase.  Linking never starts until
//! every mapping has validated, and the script never runs unless linking
//! completed for every mapping.
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::link::{LinkEngine, LinkResult};
use super::oracle::PathOracle;
use super::report::{
    InstallReport, LinkOutcome, MappingOutcome, Operation, Phase, Report, ScriptStatus, Status,
    UninstallReport,
};
use super::script::ScriptRunner;
use super::validate::{Rejection, validate_install, validate_uninstall};
use crate::error::{ModuleError, TransactionError};
use crate::exec::{Executor, SystemExecutor};
use crate::module::Module;
use crate::operations::{FileSystemOps, SystemFileSystemOps};

/// Error returned by [`Engine::install`].
pub type InstallError = TransactionError;
/// Error returned by [`Engine::uninstall`].
pub type UninstallError = TransactionError;

/// Module install/uninstall engine.
///
/// Holds no state between calls; every call validates the filesystem afresh.
#[derive(Clone)]
pub struct Engine {
    fs: Arc<dyn FileSystemOps>,
    executor: Arc<dyn Executor>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("fs", &self.fs)
            .field("executor", &"<dyn Executor>")
            .finish()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Engine over the real filesystem and real process spawning.
    #[must_use]
    pub fn new() -> Self {
        Self::with_ops(Arc::new(SystemFileSystemOps), Arc::new(SystemExecutor))
    }

    /// Engine over the given filesystem and executor implementations.
    #[must_use]
    pub fn with_ops(fs: Arc<dyn FileSystemOps>, executor: Arc<dyn Executor>) -> Self {
        Self { fs, executor }
    }

    /// Link every mapping of `module`, then run its init script.
    ///
    /// # Errors
    ///
    /// Returns a [`TransactionError`] whose report is `Aborted` when
    /// validation failed (nothing was touched), or `PartialFailure` when
    /// linking failed (after rollback) or the init script failed (links stay).
    pub fn install(&self, module: &Module) -> Result<InstallReport, InstallError> {
        let mut txn = Transaction::begin(module, Operation::Install);
        let oracle = PathOracle::new(self.fs.as_ref());

        let plan = match validate_install(module, &oracle) {
            Ok(plan) => plan,
            Err(rejection) => return Err(txn.abort(module, rejection)),
        };

        txn.advance(Phase::Linking);
        let linked = LinkEngine::new(self.fs.as_ref()).install(module.name(), &plan);
        self.finish(txn, module, linked, module.init_script())
    }

    /// Remove every owned link of `module`, then run its cleanup script.
    ///
    /// # Errors
    ///
    /// Returns a [`TransactionError`] whose report is `Aborted` when
    /// validation failed (nothing was touched), or `PartialFailure` when a
    /// removal failed (earlier removals stand) or the cleanup script failed.
    pub fn uninstall(&self, module: &Module) -> Result<UninstallReport, UninstallError> {
        let mut txn = Transaction::begin(module, Operation::Uninstall);
        let oracle = PathOracle::new(self.fs.as_ref());

        let plan = match validate_uninstall(module, &oracle) {
            Ok(plan) => plan,
            Err(rejection) => return Err(txn.abort(module, rejection)),
        };

        txn.advance(Phase::Linking);
        let unlinked = LinkEngine::new(self.fs.as_ref()).uninstall(module.name(), &plan);
        self.finish(txn, module, unlinked, module.cleanup_script())
    }

    /// Install `modules` one after another.
    ///
    /// `cancel` is checked before each module; once set, the remaining
    /// modules are reported as cancelled.  A module already in flight always
    /// runs to a terminal state.
    #[must_use]
    pub fn install_all(&self, modules: &[Module], cancel: &AtomicBool) -> BatchReport {
        Self::run_batch(Operation::Install, modules, cancel, |m| self.install(m))
    }

    /// Uninstall `modules` one after another; see [`Engine::install_all`].
    #[must_use]
    pub fn uninstall_all(&self, modules: &[Module], cancel: &AtomicBool) -> BatchReport {
        Self::run_batch(Operation::Uninstall, modules, cancel, |m| self.uninstall(m))
    }

    fn run_batch(
        operation: Operation,
        modules: &[Module],
        cancel: &AtomicBool,
        run: impl Fn(&Module) -> Result<Report, TransactionError>,
    ) -> BatchReport {
        let entries = modules
            .iter()
            .map(|module| {
                if cancel.load(Ordering::SeqCst) {
                    return BatchEntry::Cancelled {
                        module: module.name().to_string(),
                    };
                }
                match run(module) {
                    Ok(report) => BatchEntry::Completed(report),
                    Err(e) => BatchEntry::Failed(e),
                }
            })
            .collect();
        BatchReport { operation, entries }
    }

    /// Shared tail of install and uninstall: record link outcomes, then run
    /// the script if linking completed.
    fn finish(
        &self,
        mut txn: Transaction,
        module: &Module,
        linked: LinkResult,
        script: Option<&Path>,
    ) -> Result<Report, TransactionError> {
        txn.report.outcomes = linked.outcomes;
        if let Some(failure) = linked.failure {
            return Err(txn.fail(Phase::LinkFailed, failure));
        }

        let Some(script) = script else {
            return Ok(txn.succeed(Phase::LinkedNoScript));
        };

        txn.advance(Phase::ScriptRunning);
        let status = ScriptRunner::new(self.executor.as_ref()).run(script, module.path());
        let failure = status.failure.clone();
        txn.report.script = Some(status);
        match failure {
            None => Ok(txn.succeed(Phase::Done)),
            Some(failure) => Err(txn.fail(
                Phase::ScriptFailed,
                ModuleError::ScriptFailed {
                    module: module.name().to_string(),
                    script: script.to_path_buf(),
                    failure,
                },
            )),
        }
    }
}

/// In-flight report plus the state machine that guards it.
struct Transaction {
    report: Report,
}

impl Transaction {
    fn begin(module: &Module, operation: Operation) -> Self {
        let mut txn = Self {
            report: Report::new(module.name(), operation),
        };
        txn.advance(Phase::Validating);
        txn
    }

    fn advance(&mut self, next: Phase) {
        debug_assert!(
            self.report.phase.can_advance_to(next),
            "illegal transition {:?} -> {next:?}",
            self.report.phase
        );
        self.report.phase = next;
        self.report.trail.push(next);
    }

    /// Validation failed: mark failing mappings, leave the rest untouched.
    fn abort(mut self, module: &Module, rejection: Rejection) -> TransactionError {
        self.report.outcomes = module
            .mappings()
            .iter()
            .enumerate()
            .map(|(index, mapping)| {
                let outcome = rejection
                    .errors()
                    .find(|e| e.index() == Some(index))
                    .map_or(LinkOutcome::NotAttempted, |e| {
                        LinkOutcome::Failed(e.to_string())
                    });
                MappingOutcome {
                    index,
                    source: mapping.source.clone(),
                    target: mapping.target.clone(),
                    outcome,
                }
            })
            .collect();
        self.advance(Phase::Aborted);
        self.report.status = Status::Aborted;
        TransactionError::new(rejection.primary, rejection.others, self.report)
    }

    fn fail(mut self, phase: Phase, error: ModuleError) -> TransactionError {
        self.advance(phase);
        self.report.status = Status::PartialFailure;
        TransactionError::new(error, Vec::new(), self.report)
    }

    fn succeed(mut self, phase: Phase) -> Report {
        self.advance(phase);
        self.report.status = Status::Success;
        self.report
    }
}

/// Result for one module of a batch.
#[derive(Debug)]
pub enum BatchEntry {
    /// The module reached a success state.
    Completed(Report),
    /// The module failed; the error carries its report.
    Failed(TransactionError),
    /// The batch was cancelled before this module started.
    Cancelled {
        /// Module name.
        module: String,
    },
}

impl BatchEntry {
    /// Module name.
    #[must_use]
    pub fn module(&self) -> &str {
        match self {
            Self::Completed(report) => &report.module,
            Self::Failed(e) => &e.report.module,
            Self::Cancelled { module } => module,
        }
    }

    /// Report for this module, if it was started.
    #[must_use]
    pub fn report(&self) -> Option<&Report> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Failed(e) => Some(&e.report),
            Self::Cancelled { .. } => None,
        }
    }
}

/// Results of a sequential multi-module run.
#[derive(Debug)]
pub struct BatchReport {
    /// Install or uninstall.
    pub operation: Operation,
    /// One entry per requested module, in request order.
    pub entries: Vec<BatchEntry>,
}

impl BatchReport {
    /// Whether every module completed successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.entries
            .iter()
            .all(|e| matches!(e, BatchEntry::Completed(_)))
    }

    /// Number of modules that were skipped because of cancellation.
    #[must_use]
    pub fn cancelled(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, BatchEntry::Cancelled { .. }))
            .count()
    }

    /// Script status of every module whose script ran.
    pub fn scripts(&self) -> impl Iterator<Item = (&str, &ScriptStatus)> {
        self.entries.iter().filter_map(|e| {
            e.report()
                .and_then(|r| r.script.as_ref().map(|s| (r.module.as_str(), s)))
        })
    }
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, ScriptFailure};
    use crate::exec::test_helpers::{MockExecutor, exited};
    use crate::module::FileMapping;
    use crate::operations::test_helpers::FaultyFileSystemOps;
    use std::io;
    use std::path::PathBuf;

    /// `<root>/dotfiles/<module>/…` sources and a `<root>/home` target dir.
    struct Fixture {
        _guard: tempfile::TempDir,
        root: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let guard = tempfile::tempdir().unwrap();
            let root = dunce::canonicalize(guard.path()).unwrap();
            std::fs::create_dir_all(root.join("home")).unwrap();
            Self {
                _guard: guard,
                root,
            }
        }

        fn home(&self, name: &str) -> PathBuf {
            self.root.join("home").join(name)
        }

        /// Module `name` mapping each source file to `home/.<source>`.
        fn module(&self, name: &str, sources: &[&str]) -> Module {
            let dir = self.root.join("dotfiles").join(name);
            std::fs::create_dir_all(&dir).unwrap();
            sources.iter().fold(Module::new(name, &dir), |m, source| {
                std::fs::write(dir.join(source), format!("{source} content")).unwrap();
                m.with_mapping(FileMapping::new(
                    dir.join(source),
                    self.home(&format!(".{source}")),
                ))
            })
        }
    }

    fn engine_with(fs: Arc<dyn FileSystemOps>, executor: MockExecutor) -> Engine {
        Engine::with_ops(fs, Arc::new(executor))
    }

    /// Executor that fails the test if any script is run.
    fn no_scripts() -> MockExecutor {
        let mut executor = MockExecutor::new();
        executor.expect_run_script().never();
        executor
    }

    fn outcomes(report: &Report) -> Vec<LinkOutcome> {
        report.outcomes.iter().map(|o| o.outcome.clone()).collect()
    }

    fn snapshot(dir: &Path) -> Vec<(PathBuf, Option<PathBuf>)> {
        let mut entries: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| {
                let path = e.unwrap().path();
                let link = std::fs::read_link(&path).ok();
                (path, link)
            })
            .collect();
        entries.sort();
        entries
    }

    #[test]
    fn vimrc_scenario() {
        let fx = Fixture::new();
        let module = fx.module("vim", &["vimrc"]);
        let engine = engine_with(Arc::new(SystemFileSystemOps), no_scripts());

        let report = engine.install(&module).unwrap();
        assert_eq!(report.status, Status::Success);
        assert_eq!(report.phase, Phase::LinkedNoScript);
        assert_eq!(outcomes(&report), vec![LinkOutcome::Created]);
        assert_eq!(
            std::fs::read_link(fx.home(".vimrc")).unwrap(),
            module.mappings()[0].source
        );

        let report = engine.install(&module).unwrap();
        assert_eq!(outcomes(&report), vec![LinkOutcome::SkippedAlreadyCorrect]);

        let report = engine.uninstall(&module).unwrap();
        assert_eq!(report.status, Status::Success);
        assert_eq!(outcomes(&report), vec![LinkOutcome::Removed]);
        assert!(std::fs::symlink_metadata(fx.home(".vimrc")).is_err());
    }

    #[test]
    fn reinstall_makes_no_mutation() {
        let fx = Fixture::new();
        let module = fx.module("vim", &["vimrc", "gvimrc"]);
        Engine::new().install(&module).unwrap();

        let fs = Arc::new(FaultyFileSystemOps::new());
        let engine = engine_with(fs.clone(), no_scripts());
        let report = engine.install(&module).unwrap();
        assert_eq!(report.status, Status::Success);
        assert!(report
            .outcomes
            .iter()
            .all(|o| o.outcome == LinkOutcome::SkippedAlreadyCorrect));
        assert!(fs.created().is_empty());
        assert!(fs.removed().is_empty());
    }

    #[test]
    fn read_only_parent_aborts_install() {
        let fx = Fixture::new();
        let module = fx.module("vim", &["vimrc", "gvimrc"]);
        let fs = Arc::new(FaultyFileSystemOps::new().read_only_dir(fx.root.join("home")));
        let engine = engine_with(fs.clone(), no_scripts());

        let err = engine.install(&module).unwrap_err();
        assert_eq!(err.primary.kind(), ErrorKind::PermissionDenied);
        assert_eq!(err.others.len(), 1);
        assert_eq!(err.report.phase, Phase::Aborted);
        assert_eq!(err.report.status, Status::Aborted);
        assert!(fs.created().is_empty());
        assert!(fs.removed().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn read_only_parent_aborts_uninstall() {
        let fx = Fixture::new();
        let module = fx.module("vim", &["vimrc"]);
        Engine::new().install(&module).unwrap();
        let fs = Arc::new(FaultyFileSystemOps::new().read_only_dir(fx.root.join("home")));
        let engine = engine_with(fs.clone(), no_scripts());

        let err = engine.uninstall(&module).unwrap_err();
        assert_eq!(err.primary.kind(), ErrorKind::PermissionDenied);
        assert_eq!(err.report.phase, Phase::Aborted);
        assert!(fs.created().is_empty());
        assert!(fs.removed().is_empty());
        assert!(fx.home(".vimrc").is_symlink());
    }

    #[test]
    fn existing_file_is_never_overwritten() {
        let fx = Fixture::new();
        let module = fx.module("vim", &["vimrc"]);
        std::fs::write(fx.home(".vimrc"), "set number\n").unwrap();

        let err = Engine::new().install(&module).unwrap_err();
        assert_eq!(err.primary.kind(), ErrorKind::TargetConflict);
        assert_eq!(err.report.status, Status::Aborted);
        assert_eq!(err.report.phase, Phase::Aborted);
        assert_eq!(
            std::fs::read_to_string(fx.home(".vimrc")).unwrap(),
            "set number\n"
        );
        assert!(std::fs::read_link(fx.home(".vimrc")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn foreign_link_is_never_removed() {
        let fx = Fixture::new();
        let module = fx.module("vim", &["vimrc"]);
        let other = fx.module("other", &["vimrc"]);
        std::os::unix::fs::symlink(&other.mappings()[0].source, fx.home(".vimrc")).unwrap();

        let err = Engine::new().uninstall(&module).unwrap_err();
        assert_eq!(err.primary.kind(), ErrorKind::NotManaged);
        assert_eq!(
            std::fs::read_link(fx.home(".vimrc")).unwrap(),
            other.mappings()[0].source
        );
    }

    #[test]
    fn validation_failure_touches_no_mapping() {
        let fx = Fixture::new();
        let module = fx.module("m", &["a", "b", "c", "d", "e"]);
        std::fs::write(fx.home(".c"), "occupied").unwrap();

        let fs = Arc::new(FaultyFileSystemOps::new());
        let err = engine_with(fs.clone(), no_scripts())
            .install(&module)
            .unwrap_err();

        assert!(fs.created().is_empty());
        assert_eq!(err.primary.index(), Some(2));
        let report = &err.report;
        assert_eq!(
            report.trail,
            vec![Phase::Idle, Phase::Validating, Phase::Aborted]
        );
        assert!(matches!(report.outcomes[2].outcome, LinkOutcome::Failed(_)));
        for i in [0, 1, 3, 4] {
            assert_eq!(report.outcomes[i].outcome, LinkOutcome::NotAttempted);
        }
    }

    #[test]
    fn link_failure_rolls_back_and_skips_script() {
        let fx = Fixture::new();
        let module = fx
            .module("m", &["a", "b", "c", "d", "e"])
            .with_init_script("/unused/init.sh");
        let before = snapshot(&fx.root.join("home"));

        let fs = Arc::new(
            FaultyFileSystemOps::new().fail_create_at(fx.home(".c"), io::ErrorKind::Other),
        );
        let err = engine_with(fs.clone(), no_scripts())
            .install(&module)
            .unwrap_err();

        assert_eq!(err.primary.kind(), ErrorKind::InstallFailed);
        assert_eq!(err.primary.index(), Some(2));
        assert_eq!(err.report.status, Status::PartialFailure);
        assert_eq!(err.report.phase, Phase::LinkFailed);
        assert!(err.report.script.is_none());
        assert_eq!(fs.removed(), vec![fx.home(".b"), fx.home(".a")]);
        assert_eq!(snapshot(&fx.root.join("home")), before);
    }

    #[test]
    fn round_trip_restores_filesystem() {
        let fx = Fixture::new();
        let module = fx.module("m", &["a", "b", "c"]);
        std::fs::write(fx.home("unrelated"), "keep").unwrap();
        let before = snapshot(&fx.root.join("home"));

        let engine = Engine::new();
        engine.install(&module).unwrap();
        assert_ne!(snapshot(&fx.root.join("home")), before);
        engine.uninstall(&module).unwrap();
        assert_eq!(snapshot(&fx.root.join("home")), before);
    }

    #[test]
    fn init_script_runs_in_module_directory() {
        let fx = Fixture::new();
        let base = fx.module("zsh", &["zshrc"]);
        let dir = base.path().to_path_buf();
        let module = base.with_init_script(dir.join("init.sh"));

        let mut executor = MockExecutor::new();
        let expected_dir = dir.clone();
        executor
            .expect_run_script()
            .withf(move |script, cwd| script.ends_with("init.sh") && cwd.to_path_buf() == expected_dir)
            .times(1)
            .returning(|_, _| Ok(exited(0)));

        let report = engine_with(Arc::new(SystemFileSystemOps), executor)
            .install(&module)
            .unwrap();
        assert_eq!(report.phase, Phase::Done);
        assert_eq!(
            report.trail,
            vec![
                Phase::Idle,
                Phase::Validating,
                Phase::Linking,
                Phase::ScriptRunning,
                Phase::Done
            ]
        );
        assert_eq!(report.script.unwrap().exit_code, Some(0));
    }

    #[test]
    fn script_failure_leaves_links_and_retry_reruns_only_script() {
        let fx = Fixture::new();
        let base = fx.module("zsh", &["zshrc"]);
        let module = base.clone().with_init_script(base.path().join("init.sh"));

        let mut failing = MockExecutor::new();
        failing
            .expect_run_script()
            .times(1)
            .returning(|_, _| Ok(exited(1)));
        let err = engine_with(Arc::new(SystemFileSystemOps), failing)
            .install(&module)
            .unwrap_err();
        assert_eq!(err.report.phase, Phase::ScriptFailed);
        assert_eq!(err.report.status, Status::PartialFailure);
        assert!(matches!(
            err.primary,
            ModuleError::ScriptFailed {
                failure: ScriptFailure::Exit(1),
                ..
            }
        ));
        assert!(std::fs::read_link(fx.home(".zshrc")).is_ok(), "links stay");

        let mut passing = MockExecutor::new();
        passing
            .expect_run_script()
            .times(1)
            .returning(|_, _| Ok(exited(0)));
        let report = engine_with(Arc::new(SystemFileSystemOps), passing)
            .install(&module)
            .unwrap();
        assert_eq!(outcomes(&report), vec![LinkOutcome::SkippedAlreadyCorrect]);
        assert_eq!(report.phase, Phase::Done);
    }

    #[test]
    fn cleanup_script_runs_after_full_removal() {
        let fx = Fixture::new();
        let base = fx.module("git", &["gitconfig"]);
        let module = base.clone().with_cleanup_script(base.path().join("cleanup.sh"));
        Engine::new().install(&module).unwrap();

        let mut executor = MockExecutor::new();
        executor
            .expect_run_script()
            .withf(|script, _| script.ends_with("cleanup.sh"))
            .times(1)
            .returning(|_, _| Ok(exited(0)));
        let report = engine_with(Arc::new(SystemFileSystemOps), executor)
            .uninstall(&module)
            .unwrap();
        assert_eq!(outcomes(&report), vec![LinkOutcome::Removed]);
        assert_eq!(report.phase, Phase::Done);
    }

    #[test]
    fn failed_removal_skips_cleanup_script() {
        let fx = Fixture::new();
        let base = fx.module("git", &["a", "b"]);
        let module = base.clone().with_cleanup_script(base.path().join("cleanup.sh"));
        Engine::new().install(&module).unwrap();

        let fs = Arc::new(
            FaultyFileSystemOps::new().fail_remove_at(fx.home(".b"), io::ErrorKind::PermissionDenied),
        );
        let err = engine_with(fs, no_scripts())
            .uninstall(&module)
            .unwrap_err();
        assert_eq!(err.primary.kind(), ErrorKind::UninstallFailed);
        assert_eq!(err.report.phase, Phase::LinkFailed);
        assert_eq!(err.report.outcomes[0].outcome, LinkOutcome::Removed);

        // retry succeeds: the first link is reported as already removed
        let report = engine_with(Arc::new(SystemFileSystemOps), {
            let mut executor = MockExecutor::new();
            executor.expect_run_script().returning(|_, _| Ok(exited(0)));
            executor
        })
        .uninstall(&module)
        .unwrap();
        assert_eq!(
            outcomes(&report),
            vec![LinkOutcome::SkippedAlreadyCorrect, LinkOutcome::Removed]
        );
    }

    #[test]
    fn batch_stops_between_modules_when_cancelled() {
        let fx = Fixture::new();
        let modules = vec![fx.module("a", &["x"]), fx.module("b", &["y"])];
        let cancel = AtomicBool::new(false);
        let engine = Engine::new();

        let batch = engine.install_all(&modules, &cancel);
        assert!(batch.is_success());
        assert_eq!(batch.entries.len(), 2);

        cancel.store(true, Ordering::SeqCst);
        let batch = engine.uninstall_all(&modules, &cancel);
        assert!(!batch.is_success());
        assert_eq!(batch.cancelled(), 2);
        assert_eq!(batch.entries[1].module(), "b");
        assert!(batch.entries[0].report().is_none());
        assert!(std::fs::read_link(fx.home(".x")).is_ok(), "nothing ran");
    }

    #[test]
    fn batch_continues_past_failed_module() {
        let fx = Fixture::new();
        let modules = vec![fx.module("a", &["x"]), fx.module("b", &["y"])];
        std::fs::write(fx.home(".x"), "occupied").unwrap();

        let batch = Engine::new().install_all(&modules, &AtomicBool::new(false));
        assert!(matches!(batch.entries[0], BatchEntry::Failed(_)));
        assert!(matches!(batch.entries[1], BatchEntry::Completed(_)));
        assert!(!batch.is_success());
        assert_eq!(batch.scripts().count(), 0);
    }
}
