//! Applies validated plans to the filesystem.
//!
//! Install is all-or-nothing within a module: when creating link *k* fails,
//! links created for earlier mappings are removed again, newest first.
//! Uninstall stops at the first failure and leaves earlier removals in place;
//! a retry is safe because validation re-reads the current state.
use std::path::Path;

use super::oracle::PathOracle;
use super::report::{LinkOutcome, MappingOutcome};
use super::validate::{InstallAction, InstallPlan, UninstallAction, UninstallPlan};
use crate::error::{ModuleError, RollbackFailure};
use crate::operations::FileSystemOps;

/// Per-mapping outcomes plus the error that stopped the run, if any.
#[derive(Debug)]
pub struct LinkResult {
    /// One outcome per plan step, in manifest order.
    pub outcomes: Vec<MappingOutcome>,
    /// `InstallFailed` or `UninstallFailed` when the run did not complete.
    pub failure: Option<ModuleError>,
}

impl LinkResult {
    /// Whether every step completed.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

/// Creates and removes a module's symlinks.
#[derive(Debug, Clone, Copy)]
pub struct LinkEngine<'a> {
    fs: &'a dyn FileSystemOps,
}

impl<'a> LinkEngine<'a> {
    /// Create an engine over `fs`.
    #[must_use]
    pub const fn new(fs: &'a dyn FileSystemOps) -> Self {
        Self { fs }
    }

    /// Create every planned link in order, rolling back on failure.
    #[must_use]
    pub fn install(&self, module: &str, plan: &InstallPlan) -> LinkResult {
        let mut outcomes: Vec<MappingOutcome> = plan
            .steps
            .iter()
            .map(|step| outcome(step.index, &step.source, &step.target, LinkOutcome::NotAttempted))
            .collect();
        let mut created: Vec<usize> = Vec::new();

        for (pos, step) in plan.steps.iter().enumerate() {
            let Some(slot) = outcomes.get_mut(pos) else {
                break;
            };
            if step.action == InstallAction::Skip {
                slot.outcome = LinkOutcome::SkippedAlreadyCorrect;
                continue;
            }

            match self.fs.create_symlink(&step.source, &step.resolved) {
                Ok(()) => {
                    slot.outcome = LinkOutcome::Created;
                    created.push(pos);
                }
                Err(e) => {
                    slot.outcome = LinkOutcome::Failed(e.to_string());
                    let cause = ModuleError::from_link_io(module, step.index, step.target.clone(), e);
                    let failure = self.roll_back(module, plan, &created, &mut outcomes, cause);
                    return LinkResult {
                        outcomes,
                        failure: Some(failure),
                    };
                }
            }
        }

        LinkResult {
            outcomes,
            failure: None,
        }
    }

    /// Remove the links created by this run, newest first.
    ///
    /// A link is only removed if it still points at its source; anything
    /// else is left alone and reported.
    fn roll_back(
        &self,
        module: &str,
        plan: &InstallPlan,
        created: &[usize],
        outcomes: &mut [MappingOutcome],
        cause: ModuleError,
    ) -> ModuleError {
        let oracle = PathOracle::new(self.fs);
        let mut rolled_back = Vec::new();
        let mut rollback_failures = Vec::new();

        for &pos in created.iter().rev() {
            let (Some(step), Some(slot)) = (plan.steps.get(pos), outcomes.get_mut(pos)) else {
                continue;
            };

            let owned = oracle
                .resolve(&step.resolved)
                .map(|status| status.points_to(&step.source));
            let removal = match owned {
                Ok(true) => self.fs.remove_symlink(&step.resolved).map_err(|e| e.to_string()),
                Ok(false) => Err("link was replaced; left untouched".to_string()),
                Err(e) => Err(e.to_string()),
            };

            match removal {
                Ok(()) => {
                    slot.outcome = LinkOutcome::RolledBack;
                    rolled_back.push(step.target.clone());
                }
                Err(message) => rollback_failures.push(RollbackFailure {
                    target: step.target.clone(),
                    message,
                }),
            }
        }

        ModuleError::InstallFailed {
            module: module.to_string(),
            cause: Box::new(cause),
            rolled_back,
            rollback_failures,
        }
    }

    /// Remove every planned link in order, stopping at the first failure.
    #[must_use]
    pub fn uninstall(&self, module: &str, plan: &UninstallPlan) -> LinkResult {
        let oracle = PathOracle::new(self.fs);
        let mut outcomes: Vec<MappingOutcome> = plan
            .steps
            .iter()
            .map(|step| outcome(step.index, &step.source, &step.target, LinkOutcome::NotAttempted))
            .collect();
        let mut removed = Vec::new();

        for (pos, step) in plan.steps.iter().enumerate() {
            let Some(slot) = outcomes.get_mut(pos) else {
                break;
            };
            if step.action == UninstallAction::AlreadyAbsent {
                slot.outcome = LinkOutcome::SkippedAlreadyCorrect;
                continue;
            }

            let result = match oracle.resolve(&step.resolved) {
                Ok(status) if status.points_to(&step.source) => self
                    .fs
                    .remove_symlink(&step.resolved)
                    .map_err(|e| ModuleError::from_link_io(module, step.index, step.target.clone(), e)),
                Ok(status) => Err(ModuleError::NotManaged {
                    module: module.to_string(),
                    index: step.index,
                    target: step.target.clone(),
                    reason: format!("changed after validation: {}", status.describe()),
                }),
                Err(e) => Err(ModuleError::from_link_io(module, step.index, step.target.clone(), e)),
            };

            match result {
                Ok(()) => {
                    slot.outcome = LinkOutcome::Removed;
                    removed.push(step.target.clone());
                }
                Err(cause) => {
                    slot.outcome = LinkOutcome::Failed(failure_reason(&cause));
                    let remaining = plan
                        .steps
                        .iter()
                        .skip(pos)
                        .filter(|s| s.action == UninstallAction::Remove)
                        .map(|s| s.target.clone())
                        .collect();
                    return LinkResult {
                        outcomes,
                        failure: Some(ModuleError::UninstallFailed {
                            module: module.to_string(),
                            cause: Box::new(cause),
                            removed,
                            remaining,
                        }),
                    };
                }
            }
        }

        LinkResult {
            outcomes,
            failure: None,
        }
    }
}

fn outcome(index: usize, source: &Path, target: &Path, outcome: LinkOutcome) -> MappingOutcome {
    MappingOutcome {
        index,
        source: source.to_path_buf(),
        target: target.to_path_buf(),
        outcome,
    }
}

/// Error text without the `module <name>:` prefix.
fn failure_reason(err: &ModuleError) -> String {
    let text = err.to_string();
    let prefix = format!("module {}: ", err.module());
    text.strip_prefix(&prefix).map_or_else(|| text.clone(), str::to_string)
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
    use crate::engine::validate::{InstallStep, UninstallStep};
    use crate::error::ErrorKind;
    use crate::operations::test_helpers::FaultyFileSystemOps;
    use crate::operations::SystemFileSystemOps;
    use std::io;
    use std::path::PathBuf;

    struct Fixture {
        _guard: tempfile::TempDir,
        root: PathBuf,
    }

    impl Fixture {
        fn new(count: usize) -> Self {
            let guard = tempfile::tempdir().unwrap();
            let root = dunce::canonicalize(guard.path()).unwrap();
            std::fs::create_dir_all(root.join("m")).unwrap();
            std::fs::create_dir_all(root.join("home")).unwrap();
            for i in 0..count {
                std::fs::write(root.join("m").join(format!("s{i}")), "content").unwrap();
            }
            Self {
                _guard: guard,
                root,
            }
        }

        fn source(&self, i: usize) -> PathBuf {
            self.root.join("m").join(format!("s{i}"))
        }

        fn target(&self, i: usize) -> PathBuf {
            self.root.join("home").join(format!(".t{i}"))
        }

        fn install_plan(&self, count: usize) -> InstallPlan {
            InstallPlan {
                steps: (0..count)
                    .map(|i| InstallStep {
                        index: i,
                        source: self.source(i),
                        target: self.target(i),
                        resolved: self.target(i),
                        action: InstallAction::Create,
                    })
                    .collect(),
            }
        }

        fn uninstall_plan(&self, count: usize) -> UninstallPlan {
            UninstallPlan {
                steps: (0..count)
                    .map(|i| UninstallStep {
                        index: i,
                        source: self.source(i),
                        target: self.target(i),
                        resolved: self.target(i),
                        action: UninstallAction::Remove,
                    })
                    .collect(),
            }
        }
    }

    fn kinds(result: &LinkResult) -> Vec<LinkOutcome> {
        result.outcomes.iter().map(|o| o.outcome.clone()).collect()
    }

    #[test]
    fn install_creates_every_link_in_order() {
        let fx = Fixture::new(3);
        let fs = FaultyFileSystemOps::new();
        let result = LinkEngine::new(&fs).install("m", &fx.install_plan(3));
        assert!(result.is_complete());
        assert_eq!(fs.created(), vec![fx.target(0), fx.target(1), fx.target(2)]);
        assert_eq!(std::fs::read_link(fx.target(1)).unwrap(), fx.source(1));
    }

    #[test]
    fn install_skip_steps_touch_nothing() {
        let fx = Fixture::new(1);
        let mut plan = fx.install_plan(1);
        plan.steps[0].action = InstallAction::Skip;
        let fs = FaultyFileSystemOps::new();
        let result = LinkEngine::new(&fs).install("m", &plan);
        assert_eq!(kinds(&result), vec![LinkOutcome::SkippedAlreadyCorrect]);
        assert!(fs.created().is_empty());
    }

    #[test]
    fn failure_on_third_of_five_rolls_back_first_two() {
        let fx = Fixture::new(5);
        let fs = FaultyFileSystemOps::new()
            .fail_create_at(fx.target(2), io::ErrorKind::PermissionDenied);
        let result = LinkEngine::new(&fs).install("m", &fx.install_plan(5));

        assert_eq!(
            kinds(&result)[..2],
            [LinkOutcome::RolledBack, LinkOutcome::RolledBack]
        );
        assert!(matches!(result.outcomes[2].outcome, LinkOutcome::Failed(_)));
        assert_eq!(
            kinds(&result)[3..],
            [LinkOutcome::NotAttempted, LinkOutcome::NotAttempted]
        );
        assert_eq!(fs.removed(), vec![fx.target(1), fx.target(0)], "newest first");
        for i in 0..5 {
            assert!(std::fs::symlink_metadata(fx.target(i)).is_err(), "target {i} remains");
        }

        let Some(ModuleError::InstallFailed {
            cause,
            rolled_back,
            rollback_failures,
            ..
        }) = result.failure
        else {
            panic!("expected InstallFailed");
        };
        assert_eq!(cause.kind(), ErrorKind::PermissionDenied);
        assert_eq!(cause.index(), Some(2));
        assert_eq!(rolled_back, vec![fx.target(1), fx.target(0)]);
        assert!(rollback_failures.is_empty());
    }

    #[test]
    fn race_between_validation_and_link_is_a_conflict() {
        let fx = Fixture::new(2);
        let fs = FaultyFileSystemOps::new().race_create_at(fx.target(1));
        let result = LinkEngine::new(&fs).install("m", &fx.install_plan(2));

        let Some(ModuleError::InstallFailed { cause, .. }) = &result.failure else {
            panic!("expected InstallFailed");
        };
        assert_eq!(cause.kind(), ErrorKind::TargetConflict);
        assert_eq!(
            std::fs::read_to_string(fx.target(1)).unwrap(),
            "written by someone else",
            "the racing file must survive"
        );
        assert!(std::fs::symlink_metadata(fx.target(0)).is_err());
    }

    #[test]
    fn failed_rollback_is_reported_without_masking_cause() {
        let fx = Fixture::new(2);
        let fs = FaultyFileSystemOps::new()
            .fail_create_at(fx.target(1), io::ErrorKind::Other)
            .fail_remove_at(fx.target(0), io::ErrorKind::PermissionDenied);
        let result = LinkEngine::new(&fs).install("m", &fx.install_plan(2));

        let Some(ModuleError::InstallFailed {
            cause,
            rolled_back,
            rollback_failures,
            ..
        }) = result.failure
        else {
            panic!("expected InstallFailed");
        };
        assert_eq!(cause.kind(), ErrorKind::IoError);
        assert!(rolled_back.is_empty());
        assert_eq!(rollback_failures.len(), 1);
        assert_eq!(rollback_failures[0].target, fx.target(0));
        assert_eq!(result.outcomes[0].outcome, LinkOutcome::Created);
    }

    #[cfg(unix)]
    #[test]
    fn rollback_leaves_replaced_links_alone() {
        #[derive(Debug)]
        struct Swapping<'a> {
            inner: &'a FaultyFileSystemOps,
            swap: PathBuf,
        }

        impl FileSystemOps for Swapping<'_> {
            fn entry_kind(&self, p: &Path) -> io::Result<Option<crate::operations::EntryKind>> {
                self.inner.entry_kind(p)
            }
            fn target_kind(&self, p: &Path) -> io::Result<Option<crate::operations::EntryKind>> {
                self.inner.target_kind(p)
            }
            fn read_link(&self, p: &Path) -> io::Result<PathBuf> {
                self.inner.read_link(p)
            }
            fn canonicalize(&self, p: &Path) -> io::Result<PathBuf> {
                self.inner.canonicalize(p)
            }
            fn is_writable_dir(&self, p: &Path) -> io::Result<bool> {
                self.inner.is_writable_dir(p)
            }
            fn create_symlink(&self, s: &Path, l: &Path) -> io::Result<()> {
                let result = self.inner.create_symlink(s, l);
                if result.is_err() {
                    // someone repoints the first link while we fail
                    std::fs::remove_file(&self.swap)?;
                    std::os::unix::fs::symlink("/elsewhere", &self.swap)?;
                }
                result
            }
            fn remove_symlink(&self, l: &Path) -> io::Result<()> {
                self.inner.remove_symlink(l)
            }
        }

        let fx = Fixture::new(2);
        let faulty = FaultyFileSystemOps::new().fail_create_at(fx.target(1), io::ErrorKind::Other);
        let fs = Swapping {
            inner: &faulty,
            swap: fx.target(0),
        };
        let result = LinkEngine::new(&fs).install("m", &fx.install_plan(2));

        let Some(ModuleError::InstallFailed {
            rollback_failures, ..
        }) = result.failure
        else {
            panic!("expected InstallFailed");
        };
        assert_eq!(rollback_failures.len(), 1);
        assert_eq!(
            std::fs::read_link(fx.target(0)).unwrap(),
            PathBuf::from("/elsewhere")
        );
    }

    #[cfg(unix)]
    #[test]
    fn uninstall_removes_links_and_keeps_sources() {
        let fx = Fixture::new(2);
        let fs = SystemFileSystemOps;
        assert!(LinkEngine::new(&fs).install("m", &fx.install_plan(2)).is_complete());

        let result = LinkEngine::new(&fs).uninstall("m", &fx.uninstall_plan(2));
        assert!(result.is_complete());
        assert_eq!(kinds(&result), vec![LinkOutcome::Removed, LinkOutcome::Removed]);
        assert!(fx.source(0).exists());
        assert!(std::fs::symlink_metadata(fx.target(0)).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn uninstall_stops_without_recreating() {
        let fx = Fixture::new(3);
        assert!(
            LinkEngine::new(&SystemFileSystemOps)
                .install("m", &fx.install_plan(3))
                .is_complete()
        );
        let fs = FaultyFileSystemOps::new()
            .fail_remove_at(fx.target(1), io::ErrorKind::PermissionDenied);
        let result = LinkEngine::new(&fs).uninstall("m", &fx.uninstall_plan(3));

        assert_eq!(result.outcomes[0].outcome, LinkOutcome::Removed);
        assert!(matches!(result.outcomes[1].outcome, LinkOutcome::Failed(ref r) if r.starts_with("permission denied")));
        assert_eq!(result.outcomes[2].outcome, LinkOutcome::NotAttempted);
        assert!(fs.created().is_empty(), "nothing is recreated");
        assert!(std::fs::symlink_metadata(fx.target(0)).is_err());
        assert!(std::fs::symlink_metadata(fx.target(2)).is_ok());

        let Some(ModuleError::UninstallFailed {
            removed, remaining, ..
        }) = result.failure
        else {
            panic!("expected UninstallFailed");
        };
        assert_eq!(removed, vec![fx.target(0)]);
        assert_eq!(remaining, vec![fx.target(1), fx.target(2)]);
    }

    #[test]
    fn uninstall_rechecks_ownership_before_removing() {
        let fx = Fixture::new(1);
        std::fs::write(fx.target(0), "user data").unwrap();
        let fs = FaultyFileSystemOps::new();
        let result = LinkEngine::new(&fs).uninstall("m", &fx.uninstall_plan(1));

        let Some(ModuleError::UninstallFailed { cause, .. }) = &result.failure else {
            panic!("expected UninstallFailed");
        };
        assert_eq!(cause.kind(), ErrorKind::NotManaged);
        assert_eq!(std::fs::read_to_string(fx.target(0)).unwrap(), "user data");
    }
}
