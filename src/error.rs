//! Domain-specific error types for the module engine.
//!
//! This module provides a structured error hierarchy using [`thiserror`].
//! The engine and the manifest loader return typed errors while command
//! handlers at the CLI boundary convert them to [`anyhow::Error`] via the
//! standard `?` operator.
//!
//! # Error hierarchy
//!
//! ```text
//! TransactionError                 — one failed install/uninstall call
//! ├── primary: ModuleError
//! │   ├── InvalidModule(InvalidReason)
//! │   ├── TargetConflict / NotManaged / PermissionDenied / Io
//! │   ├── InstallFailed   — wraps the link error, lists rollback results
//! │   ├── UninstallFailed — wraps the removal error, lists what is left
//! │   └── ScriptFailed(ScriptFailure)
//! ├── others: Vec<ModuleError>     — further validation failures
//! └── report: Report               — per-mapping outcomes
//!
//! ManifestError                    — module discovery and config.toml parsing
//! ```
use std::io;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::engine::report::Report;

/// Structural reasons a module definition cannot be acted on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    /// The module has an empty name.
    #[error("module name is empty")]
    EmptyName,

    /// A mapping source does not exist.
    #[error("source does not exist: {}", .0.display())]
    MissingSource(PathBuf),

    /// A mapping source exists but is neither a regular file nor a directory.
    #[error("source is not a regular file or directory: {}", .0.display())]
    UnsupportedSource(PathBuf),

    /// A mapping source lies outside the module directory.
    #[error("source is outside the module directory: {}", .0.display())]
    SourceOutsideModule(PathBuf),

    /// A mapping target is not an absolute path.
    #[error("target is not an absolute path: {}", .0.display())]
    RelativeTarget(PathBuf),

    /// A mapping target has no parent directory (e.g. `/`).
    #[error("target has no parent directory: {}", .0.display())]
    NoParent(PathBuf),

    /// Two mappings of the same module share a target.
    #[error("target is mapped more than once: {}", .0.display())]
    DuplicateTarget(PathBuf),
}

/// Why a lifecycle script did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ScriptFailure {
    /// The script ran and exited with a non-zero code.
    #[error("exited with code {0}")]
    Exit(i32),

    /// The script was terminated by a signal.
    #[error("terminated by signal")]
    Signal,

    /// The script could not be started.
    #[error("failed to start: {0}")]
    Spawn(String),
}

/// A symlink the install rollback could not remove.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackFailure {
    /// Target path that was left behind.
    pub target: PathBuf,
    /// Human-readable reason.
    pub message: String,
}

/// Coarse classification of a [`ModuleError`], mirroring the error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Structural problem with the module definition.
    InvalidModule,
    /// Install would overwrite unrelated content.
    TargetConflict,
    /// Uninstall target is not a symlink owned by this module.
    NotManaged,
    /// The current user may not modify the target location.
    PermissionDenied,
    /// Unexpected OS failure.
    IoError,
    /// Link creation failed part-way; the module's own links were rolled back.
    InstallFailed,
    /// Link removal failed part-way; nothing was recreated.
    UninstallFailed,
    /// The lifecycle script failed; links are left in place.
    ScriptFailed,
}

/// Errors raised while validating, linking, or scripting a single module.
///
/// Every variant carries the module name and, where one applies, the
/// mapping index (manifest order, zero-based) and target path.
#[derive(Error, Debug)]
pub enum ModuleError {
    /// The module definition is structurally unusable.
    #[error("module {module}: invalid module: {reason}")]
    InvalidModule {
        /// Module name.
        module: String,
        /// Offending mapping, if the problem is mapping-specific.
        index: Option<usize>,
        /// What is wrong.
        reason: InvalidReason,
    },

    /// Install would overwrite something this module does not own.
    #[error("module {module}: {} already exists ({found}); refusing to overwrite", .target.display())]
    TargetConflict {
        /// Module name.
        module: String,
        /// Mapping index.
        index: usize,
        /// Conflicting target path.
        target: PathBuf,
        /// Description of what currently occupies the target.
        found: String,
    },

    /// Uninstall target is not a symlink owned by this module.
    #[error("module {module}: {} is not managed by this module ({reason})", .target.display())]
    NotManaged {
        /// Module name.
        module: String,
        /// Mapping index.
        index: usize,
        /// Target path that was left untouched.
        target: PathBuf,
        /// Why ownership could not be established.
        reason: String,
    },

    /// The current user may not create or remove entries in a directory.
    #[error("module {module}: permission denied: {}", .path.display())]
    PermissionDenied {
        /// Module name.
        module: String,
        /// Mapping index.
        index: usize,
        /// Directory (or entry) that could not be modified.
        path: PathBuf,
    },

    /// An unexpected OS-level failure.
    #[error("module {module}: I/O error on {}: {source}", .path.display())]
    Io {
        /// Module name.
        module: String,
        /// Mapping index, when the failure belongs to one mapping.
        index: Option<usize>,
        /// Path being inspected or modified.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// Creating a link failed; previously created links were removed.
    #[error(
        "module {module}: install failed, rolled back {} link(s): {cause}",
        .rolled_back.len()
    )]
    InstallFailed {
        /// Module name.
        module: String,
        /// The link error that triggered the rollback.
        cause: Box<Self>,
        /// Targets removed by the rollback, in removal order.
        rolled_back: Vec<PathBuf>,
        /// Targets the rollback could not remove.
        rollback_failures: Vec<RollbackFailure>,
    },

    /// Removing a link failed; earlier removals stand.
    #[error(
        "module {module}: uninstall stopped after removing {} link(s): {cause}",
        .removed.len()
    )]
    UninstallFailed {
        /// Module name.
        module: String,
        /// The removal error.
        cause: Box<Self>,
        /// Targets removed before the failure.
        removed: Vec<PathBuf>,
        /// Targets still linked (the failing one first).
        remaining: Vec<PathBuf>,
    },

    /// The init or cleanup script failed.
    #[error("module {module}: script {} {failure}", .script.display())]
    ScriptFailed {
        /// Module name.
        module: String,
        /// Script path.
        script: PathBuf,
        /// How it failed.
        failure: ScriptFailure,
    },
}

impl ModuleError {
    /// Name of the module the error belongs to.
    #[must_use]
    pub fn module(&self) -> &str {
        match self {
            Self::InvalidModule { module, .. }
            | Self::TargetConflict { module, .. }
            | Self::NotManaged { module, .. }
            | Self::PermissionDenied { module, .. }
            | Self::Io { module, .. }
            | Self::InstallFailed { module, .. }
            | Self::UninstallFailed { module, .. }
            | Self::ScriptFailed { module, .. } => module,
        }
    }

    /// Mapping index the error refers to, if any.
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::InvalidModule { index, .. } | Self::Io { index, .. } => *index,
            Self::TargetConflict { index, .. }
            | Self::NotManaged { index, .. }
            | Self::PermissionDenied { index, .. } => Some(*index),
            Self::InstallFailed { cause, .. } | Self::UninstallFailed { cause, .. } => {
                cause.index()
            }
            Self::ScriptFailed { .. } => None,
        }
    }

    /// Taxonomy bucket of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidModule { .. } => ErrorKind::InvalidModule,
            Self::TargetConflict { .. } => ErrorKind::TargetConflict,
            Self::NotManaged { .. } => ErrorKind::NotManaged,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::Io { .. } => ErrorKind::IoError,
            Self::InstallFailed { .. } => ErrorKind::InstallFailed,
            Self::UninstallFailed { .. } => ErrorKind::UninstallFailed,
            Self::ScriptFailed { .. } => ErrorKind::ScriptFailed,
        }
    }

    /// Classify an I/O error raised while creating or removing a link.
    pub(crate) fn from_link_io(module: &str, index: usize, path: PathBuf, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::AlreadyExists => Self::TargetConflict {
                module: module.to_string(),
                index,
                target: path,
                found: "entry appeared after validation".to_string(),
            },
            io::ErrorKind::PermissionDenied | io::ErrorKind::ReadOnlyFilesystem => {
                Self::PermissionDenied {
                    module: module.to_string(),
                    index,
                    path,
                }
            }
            _ => Self::Io {
                module: module.to_string(),
                index: Some(index),
                path,
                source: err,
            },
        }
    }
}

/// A failed install or uninstall call.
///
/// Carries every error collected for the module (validation accumulates all
/// failing mappings) together with the report, so the caller can show
/// per-mapping outcomes without re-deriving filesystem state.
#[derive(Error, Debug)]
#[error("{primary}{}", more_suffix(.others.len()))]
pub struct TransactionError {
    /// First (or only) error.
    pub primary: ModuleError,
    /// Additional errors, in mapping order.
    pub others: Vec<ModuleError>,
    /// Outcomes gathered up to the failure.
    pub report: Box<Report>,
}

impl TransactionError {
    /// Build from a primary error plus any further ones.
    #[must_use]
    pub fn new(primary: ModuleError, others: Vec<ModuleError>, report: Report) -> Self {
        Self {
            primary,
            others,
            report: Box::new(report),
        }
    }

    /// Build from a non-empty error list; `None` when `errors` is empty.
    #[must_use]
    pub fn from_errors(errors: Vec<ModuleError>, report: Report) -> Option<Self> {
        let mut iter = errors.into_iter();
        let primary = iter.next()?;
        Some(Self::new(primary, iter.collect(), report))
    }

    /// Iterate over all errors, primary first.
    pub fn errors(&self) -> impl Iterator<Item = &ModuleError> {
        std::iter::once(&self.primary).chain(self.others.iter())
    }
}

fn more_suffix(count: usize) -> String {
    if count == 0 {
        String::new()
    } else {
        format!(" (and {count} more)")
    }
}

/// Errors raised while discovering modules and parsing their `config.toml`.
#[derive(Error, Debug)]
pub enum ManifestError {
    /// The modules directory is missing or unreadable.
    #[error("modules directory {} not found or not readable", .0.display())]
    Directory(PathBuf),

    /// A named module does not exist in the modules directory.
    #[error("module {0} not found")]
    NotFound(String),

    /// The module's config file could not be read.
    #[error("module {module}: cannot read {}: {source}", .path.display())]
    Io {
        /// Module name.
        module: String,
        /// File or directory being read.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The module's config file is not valid TOML or has unknown keys.
    #[error("module {module}: {}: {source}", .path.display())]
    Parse {
        /// Module name.
        module: String,
        /// Config file path.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// A resource target is not a string.
    #[error("module {module}: resource {resource} must map to a path string")]
    ResourceValue {
        /// Module name.
        module: String,
        /// Resource key.
        resource: String,
    },

    /// A resource source is missing or not readable by its owner.
    #[error("module {module}: resource {resource} not found or has incorrect permissions")]
    Resource {
        /// Module name.
        module: String,
        /// Resource key.
        resource: String,
    },

    /// An enabled lifecycle script is missing or not executable by its owner.
    #[error("module {module}: {script} script not found or has incorrect permissions")]
    Script {
        /// Module name.
        module: String,
        /// `init` or `cleanup`.
        script: String,
    },

    /// The definition is structurally invalid.
    #[error("module {module}: invalid module: {reason}")]
    Invalid {
        /// Module name.
        module: String,
        /// What is wrong.
        reason: InvalidReason,
    },
}

impl ManifestError {
    /// Module the error belongs to; `None` for a missing modules directory.
    #[must_use]
    pub fn module(&self) -> Option<&str> {
        match self {
            Self::Directory(_) => None,
            Self::NotFound(module)
            | Self::Io { module, .. }
            | Self::Parse { module, .. }
            | Self::ResourceValue { module, .. }
            | Self::Resource { module, .. }
            | Self::Script { module, .. }
            | Self::Invalid { module, .. } => Some(module),
        }
    }
}
