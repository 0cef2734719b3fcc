//! Pre-flight checks that turn a [`Module`] into an executable plan.
//!
//! Validation never mutates the filesystem.  Every mapping is checked and
//! every failure is collected, so a single run tells the user about all the
//! problems in a module rather than the first one only.
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::oracle::{PathOracle, PathStatus, normalize};
use crate::error::{InvalidReason, ModuleError};
use crate::module::{FileMapping, Module};
use crate::operations::EntryKind;

/// What the link engine should do for one install mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallAction {
    /// Target is absent; create the link.
    Create,
    /// Target already links to the source; leave it.
    Skip,
}

/// One validated install mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallStep {
    /// Position in manifest order.
    pub index: usize,
    /// Link value to write.
    pub source: PathBuf,
    /// Target as declared by the module.
    pub target: PathBuf,
    /// Target with its parent directory canonicalised; the path acted on.
    pub resolved: PathBuf,
    /// Planned action.
    pub action: InstallAction,
}

/// Ordered install steps for one module, certified safe at validation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPlan {
    /// Steps in manifest order; one per mapping.
    pub steps: Vec<InstallStep>,
}

/// What the link engine should do for one uninstall mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UninstallAction {
    /// Target is a link owned by the module; remove it.
    Remove,
    /// Target is already gone.
    AlreadyAbsent,
}

/// One validated uninstall mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UninstallStep {
    /// Position in manifest order.
    pub index: usize,
    /// Source the link must point at.
    pub source: PathBuf,
    /// Target as declared by the module.
    pub target: PathBuf,
    /// Target with its parent directory canonicalised; the path acted on.
    pub resolved: PathBuf,
    /// Planned action.
    pub action: UninstallAction,
}

/// Ordered uninstall steps for one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UninstallPlan {
    /// Steps in manifest order; one per mapping.
    pub steps: Vec<UninstallStep>,
}

/// A module that failed validation.  Always holds at least one error.
#[derive(Debug)]
pub struct Rejection {
    /// First failure in mapping order.
    pub primary: ModuleError,
    /// Remaining failures in mapping order.
    pub others: Vec<ModuleError>,
}

impl Rejection {
    fn from_errors(errors: Vec<ModuleError>) -> Option<Self> {
        let mut iter = errors.into_iter();
        let primary = iter.next()?;
        Some(Self {
            primary,
            others: iter.collect(),
        })
    }

    /// All failures, primary first.
    pub fn errors(&self) -> impl Iterator<Item = &ModuleError> {
        std::iter::once(&self.primary).chain(self.others.iter())
    }
}

/// Prove that `module` can be installed.
///
/// # Errors
///
/// Returns every failing mapping when any check fails; nothing is planned
/// in that case.
pub fn validate_install(module: &Module, oracle: &PathOracle<'_>) -> Result<InstallPlan, Rejection> {
    let mut errors = Vec::new();
    let mut steps = Vec::new();

    for (index, mapping, status) in inspect(module, oracle, &mut errors) {
        if let Err(e) = check_source(module, index, mapping, oracle) {
            errors.push(e);
            continue;
        }

        let action = if status.exists() {
            if status.points_to(&mapping.source) {
                InstallAction::Skip
            } else {
                errors.push(ModuleError::TargetConflict {
                    module: module.name().to_string(),
                    index,
                    target: mapping.target.clone(),
                    found: status.describe(),
                });
                continue;
            }
        } else if let Err(e) = check_parent(module, index, &status) {
            errors.push(e);
            continue;
        } else {
            InstallAction::Create
        };

        steps.push(InstallStep {
            index,
            source: mapping.source.clone(),
            target: mapping.target.clone(),
            resolved: status.path,
            action,
        });
    }

    Rejection::from_errors(errors).map_or(Ok(InstallPlan { steps }), Err)
}

/// Prove that `module` can be uninstalled without touching anything it
/// does not own.
///
/// # Errors
///
/// Returns every failing mapping when any check fails; nothing is planned
/// in that case.
pub fn validate_uninstall(
    module: &Module,
    oracle: &PathOracle<'_>,
) -> Result<UninstallPlan, Rejection> {
    let mut errors = Vec::new();
    let mut steps = Vec::new();

    for (index, mapping, status) in inspect(module, oracle, &mut errors) {
        let action = if !status.exists() {
            UninstallAction::AlreadyAbsent
        } else if !status.is_symlink() {
            errors.push(not_managed(
                module,
                index,
                mapping,
                format!("{} is not a symlink", status.describe()),
            ));
            continue;
        } else if !status.points_to(&mapping.source) {
            errors.push(not_managed(module, index, mapping, status.describe()));
            continue;
        } else if let Err(e) = check_parent(module, index, &status) {
            errors.push(e);
            continue;
        } else {
            UninstallAction::Remove
        };

        steps.push(UninstallStep {
            index,
            source: mapping.source.clone(),
            target: mapping.target.clone(),
            resolved: status.path,
            action,
        });
    }

    Rejection::from_errors(errors).map_or(Ok(UninstallPlan { steps }), Err)
}

/// Structural checks shared by both directions, followed by a target probe.
///
/// Mappings that fail here are recorded in `errors` and left out of the
/// returned list.
fn inspect<'m>(
    module: &'m Module,
    oracle: &PathOracle<'_>,
    errors: &mut Vec<ModuleError>,
) -> Vec<(usize, &'m FileMapping, PathStatus)> {
    if module.name().is_empty() {
        errors.push(ModuleError::InvalidModule {
            module: String::new(),
            index: None,
            reason: InvalidReason::EmptyName,
        });
        return Vec::new();
    }

    let mut seen = HashSet::new();
    let mut resolved = HashSet::new();
    let mut inspected = Vec::new();
    for (index, mapping) in module.mappings().iter().enumerate() {
        let invalid = |reason| ModuleError::InvalidModule {
            module: module.name().to_string(),
            index: Some(index),
            reason,
        };

        if !mapping.target.is_absolute() {
            errors.push(invalid(InvalidReason::RelativeTarget(mapping.target.clone())));
            continue;
        }
        let normalized = normalize(&mapping.target);
        if normalized.parent().is_none() || normalized.file_name().is_none() {
            errors.push(invalid(InvalidReason::NoParent(mapping.target.clone())));
            continue;
        }
        if !seen.insert(normalized) {
            errors.push(invalid(InvalidReason::DuplicateTarget(mapping.target.clone())));
            continue;
        }

        // Two spellings can still reach one entry through a symlinked parent.
        match oracle.resolve(&mapping.target) {
            Ok(status) if !resolved.insert(status.path.clone()) => {
                errors.push(invalid(InvalidReason::DuplicateTarget(mapping.target.clone())));
            }
            Ok(status) => inspected.push((index, mapping, status)),
            Err(source) => errors.push(ModuleError::Io {
                module: module.name().to_string(),
                index: Some(index),
                path: mapping.target.clone(),
                source,
            }),
        }
    }
    inspected
}

/// Source must be an existing file or directory inside the module directory.
fn check_source(
    module: &Module,
    index: usize,
    mapping: &FileMapping,
    oracle: &PathOracle<'_>,
) -> Result<(), ModuleError> {
    let invalid = |reason| ModuleError::InvalidModule {
        module: module.name().to_string(),
        index: Some(index),
        reason,
    };

    let source = normalize(&mapping.source);
    if !source.is_absolute() || !source.starts_with(normalize(module.path())) {
        return Err(invalid(InvalidReason::SourceOutsideModule(mapping.source.clone())));
    }

    match oracle.source_kind(&source) {
        Ok(Some(EntryKind::File | EntryKind::Dir)) => Ok(()),
        Ok(Some(_)) => Err(invalid(InvalidReason::UnsupportedSource(mapping.source.clone()))),
        Ok(None) => Err(invalid(InvalidReason::MissingSource(mapping.source.clone()))),
        Err(source_err) => Err(ModuleError::Io {
            module: module.name().to_string(),
            index: Some(index),
            path: mapping.source.clone(),
            source: source_err,
        }),
    }
}

/// The directory holding the target must exist and be writable.
fn check_parent(module: &Module, index: usize, status: &PathStatus) -> Result<(), ModuleError> {
    if status.parent_exists && status.is_writable_parent {
        Ok(())
    } else {
        Err(ModuleError::PermissionDenied {
            module: module.name().to_string(),
            index,
            path: parent_of(&status.path),
        })
    }
}

fn parent_of(path: &Path) -> PathBuf {
    path.parent().map_or_else(|| path.to_path_buf(), Path::to_path_buf)
}

fn not_managed(module: &Module, index: usize, mapping: &FileMapping, reason: String) -> ModuleError {
    ModuleError::NotManaged {
        module: module.name().to_string(),
        index,
        target: mapping.target.clone(),
        reason,
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::operations::SystemFileSystemOps;

    /// Module dir `<root>/m` with the given source files; home is `<root>/home`.
    struct Fixture {
        _guard: tempfile::TempDir,
        root: PathBuf,
    }

    impl Fixture {
        fn new(sources: &[&str]) -> Self {
            let guard = tempfile::tempdir().unwrap();
            let root = dunce::canonicalize(guard.path()).unwrap();
            std::fs::create_dir_all(root.join("m")).unwrap();
            std::fs::create_dir_all(root.join("home")).unwrap();
            for source in sources {
                std::fs::write(root.join("m").join(source), "content").unwrap();
            }
            Self {
                _guard: guard,
                root,
            }
        }

        fn source(&self, name: &str) -> PathBuf {
            self.root.join("m").join(name)
        }

        fn target(&self, name: &str) -> PathBuf {
            self.root.join("home").join(name)
        }

        fn module(&self, pairs: &[(&str, &str)]) -> Module {
            pairs.iter().fold(Module::new("m", self.root.join("m")), |m, (s, t)| {
                m.with_mapping(FileMapping::new(self.source(s), self.target(t)))
            })
        }
    }

    fn install(module: &Module) -> Result<InstallPlan, Rejection> {
        validate_install(module, &PathOracle::new(&SystemFileSystemOps))
    }

    fn uninstall(module: &Module) -> Result<UninstallPlan, Rejection> {
        validate_uninstall(module, &PathOracle::new(&SystemFileSystemOps))
    }

    #[test]
    fn fresh_targets_are_planned_for_creation() {
        let fx = Fixture::new(&["a", "b"]);
        let plan = install(&fx.module(&[("a", ".a"), ("b", ".b")])).unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert!(plan.steps.iter().all(|s| s.action == InstallAction::Create));
        assert_eq!(plan.steps[1].index, 1);
        assert_eq!(plan.steps[1].resolved, fx.target(".b"));
    }

    #[test]
    fn empty_module_produces_empty_plan() {
        let fx = Fixture::new(&[]);
        assert!(install(&fx.module(&[])).unwrap().steps.is_empty());
        assert!(uninstall(&fx.module(&[])).unwrap().steps.is_empty());
    }

    #[test]
    fn empty_name_is_invalid() {
        let module = Module::new("", "/m");
        let rejection = install(&module).unwrap_err();
        assert!(matches!(
            rejection.primary,
            ModuleError::InvalidModule {
                reason: InvalidReason::EmptyName,
                ..
            }
        ));
    }

    #[test]
    fn missing_source_is_invalid() {
        let fx = Fixture::new(&[]);
        let rejection = install(&fx.module(&[("gone", ".gone")])).unwrap_err();
        assert!(matches!(
            rejection.primary,
            ModuleError::InvalidModule {
                index: Some(0),
                reason: InvalidReason::MissingSource(_),
                ..
            }
        ));
    }

    #[test]
    fn source_outside_module_is_invalid() {
        let fx = Fixture::new(&[]);
        std::fs::write(fx.root.join("outside"), "x").unwrap();
        let module = Module::new("m", fx.root.join("m"))
            .with_mapping(FileMapping::new(fx.root.join("m/../outside"), fx.target(".o")));
        let rejection = install(&module).unwrap_err();
        assert!(matches!(
            rejection.primary,
            ModuleError::InvalidModule {
                reason: InvalidReason::SourceOutsideModule(_),
                ..
            }
        ));
    }

    #[test]
    fn relative_and_duplicate_targets_are_invalid() {
        let fx = Fixture::new(&["a", "b", "c"]);
        let module = Module::new("m", fx.root.join("m"))
            .with_mapping(FileMapping::new(fx.source("a"), PathBuf::from("rel/.a")))
            .with_mapping(FileMapping::new(fx.source("b"), fx.target(".x")))
            .with_mapping(FileMapping::new(fx.source("c"), fx.target("./.x")));
        let rejection = install(&module).unwrap_err();
        let reasons: Vec<Option<usize>> = rejection.errors().map(ModuleError::index).collect();
        assert_eq!(reasons, vec![Some(0), Some(2)]);
        assert!(matches!(
            rejection.others[0],
            ModuleError::InvalidModule {
                reason: InvalidReason::DuplicateTarget(_),
                ..
            }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn targets_aliased_through_symlinked_dir_are_duplicates() {
        let fx = Fixture::new(&["a", "b"]);
        std::os::unix::fs::symlink(fx.root.join("home"), fx.root.join("alias")).unwrap();
        let module = Module::new("m", fx.root.join("m"))
            .with_mapping(FileMapping::new(fx.source("a"), fx.target(".x")))
            .with_mapping(FileMapping::new(fx.source("b"), fx.root.join("alias/.x")));

        for rejection in [install(&module).unwrap_err(), uninstall(&module).unwrap_err()] {
            assert_eq!(rejection.errors().count(), 1);
            assert!(matches!(
                rejection.primary,
                ModuleError::InvalidModule {
                    index: Some(1),
                    reason: InvalidReason::DuplicateTarget(_),
                    ..
                }
            ));
        }
    }

    #[test]
    fn regular_file_target_is_a_conflict() {
        let fx = Fixture::new(&["vimrc"]);
        std::fs::write(fx.target(".vimrc"), "user data").unwrap();
        let rejection = install(&fx.module(&[("vimrc", ".vimrc")])).unwrap_err();
        assert_eq!(rejection.primary.kind(), ErrorKind::TargetConflict);
        assert!(rejection.primary.to_string().contains("regular file"));
    }

    #[test]
    fn missing_parent_is_permission_denied() {
        let fx = Fixture::new(&["a"]);
        let rejection = install(&fx.module(&[("a", "no/such/dir/.a")])).unwrap_err();
        assert_eq!(rejection.primary.kind(), ErrorKind::PermissionDenied);
    }

    #[test]
    fn all_failures_are_collected_in_order() {
        let fx = Fixture::new(&["a", "b", "c"]);
        std::fs::write(fx.target(".a"), "x").unwrap();
        std::fs::write(fx.target(".c"), "x").unwrap();
        let module = fx.module(&[("a", ".a"), ("b", ".b"), ("c", ".c")]);
        let rejection = install(&module).unwrap_err();
        let indices: Vec<Option<usize>> = rejection.errors().map(ModuleError::index).collect();
        assert_eq!(indices, vec![Some(0), Some(2)]);
    }

    #[cfg(unix)]
    #[test]
    fn correct_link_is_skipped() {
        let fx = Fixture::new(&["a"]);
        std::os::unix::fs::symlink(fx.source("a"), fx.target(".a")).unwrap();
        let plan = install(&fx.module(&[("a", ".a")])).unwrap();
        assert_eq!(plan.steps[0].action, InstallAction::Skip);
    }

    #[cfg(unix)]
    #[test]
    fn foreign_link_is_a_conflict() {
        let fx = Fixture::new(&["a", "b"]);
        std::os::unix::fs::symlink(fx.source("b"), fx.target(".a")).unwrap();
        let rejection = install(&fx.module(&[("a", ".a")])).unwrap_err();
        assert_eq!(rejection.primary.kind(), ErrorKind::TargetConflict);
        assert!(rejection.primary.to_string().contains("symlink to"));
    }

    #[cfg(unix)]
    #[test]
    fn stale_link_into_same_module_is_a_conflict() {
        let fx = Fixture::new(&["a"]);
        std::os::unix::fs::symlink(fx.root.join("old-location/a"), fx.target(".a")).unwrap();
        let rejection = install(&fx.module(&[("a", ".a")])).unwrap_err();
        assert_eq!(rejection.primary.kind(), ErrorKind::TargetConflict);
    }

    #[cfg(unix)]
    #[test]
    fn owned_link_is_planned_for_removal() {
        let fx = Fixture::new(&["a", "b"]);
        std::os::unix::fs::symlink(fx.source("a"), fx.target(".a")).unwrap();
        let plan = uninstall(&fx.module(&[("a", ".a"), ("b", ".b")])).unwrap();
        assert_eq!(plan.steps[0].action, UninstallAction::Remove);
        assert_eq!(plan.steps[1].action, UninstallAction::AlreadyAbsent);
    }

    #[test]
    fn uninstall_refuses_regular_file() {
        let fx = Fixture::new(&["a"]);
        std::fs::write(fx.target(".a"), "user data").unwrap();
        let rejection = uninstall(&fx.module(&[("a", ".a")])).unwrap_err();
        assert_eq!(rejection.primary.kind(), ErrorKind::NotManaged);
        assert!(rejection.primary.to_string().contains("regular file is not a symlink"));
    }

    #[cfg(unix)]
    #[test]
    fn uninstall_refuses_foreign_link() {
        let fx = Fixture::new(&["a"]);
        std::os::unix::fs::symlink("/etc/hostname", fx.target(".a")).unwrap();
        let rejection = uninstall(&fx.module(&[("a", ".a")])).unwrap_err();
        assert_eq!(rejection.primary.kind(), ErrorKind::NotManaged);
    }

    #[cfg(unix)]
    #[test]
    fn uninstall_does_not_require_source_to_exist() {
        let fx = Fixture::new(&[]);
        std::os::unix::fs::symlink(fx.source("gone"), fx.target(".gone")).unwrap();
        let plan = uninstall(&fx.module(&[("gone", ".gone")])).unwrap();
        assert_eq!(plan.steps[0].action, UninstallAction::Remove);
    }
}
