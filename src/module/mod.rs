//! Module data model: a named bundle of file mappings plus optional
//! lifecycle scripts.
pub mod manifest;

use std::fmt;
use std::path::{Path, PathBuf};

/// One symlink to manage: `target` should become a link whose value is `source`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMapping {
    /// File or directory inside the module directory.
    pub source: PathBuf,
    /// Absolute system path where the symlink is placed.
    pub target: PathBuf,
}

impl FileMapping {
    /// Create a new mapping.
    #[must_use]
    pub const fn new(source: PathBuf, target: PathBuf) -> Self {
        Self { source, target }
    }
}

/// A module as handed to the engine.
///
/// Immutable once built; the manifest loader produces one per call and the
/// caller discards it afterwards.
///
/// # Examples
///
/// ```
/// use modman::module::{FileMapping, Module};
/// use std::path::PathBuf;
///
/// let module = Module::new("vim", "/home/u/.dotfiles/vim")
///     .with_mapping(FileMapping::new(
///         PathBuf::from("/home/u/.dotfiles/vim/vimrc"),
///         PathBuf::from("/home/u/.vimrc"),
///     ))
///     .with_description("Vim configuration");
///
/// assert_eq!(module.name(), "vim");
/// assert_eq!(module.mappings().len(), 1);
/// assert!(module.init_script().is_none());
/// assert_eq!(module.to_string(), "vim - Vim configuration");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    name: String,
    path: PathBuf,
    description: Option<String>,
    mappings: Vec<FileMapping>,
    init_script: Option<PathBuf>,
    cleanup_script: Option<PathBuf>,
}

impl Module {
    /// Create an empty module rooted at `path`.
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            description: None,
            mappings: Vec::new(),
            init_script: None,
            cleanup_script: None,
        }
    }

    /// Append a mapping; manifest order is the order of these calls.
    #[must_use]
    pub fn with_mapping(mut self, mapping: FileMapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    /// Set the one-line description shown by `list`.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the script run after a successful install.
    #[must_use]
    pub fn with_init_script(mut self, script: impl Into<PathBuf>) -> Self {
        self.init_script = Some(script.into());
        self
    }

    /// Set the script run after a successful uninstall.
    #[must_use]
    pub fn with_cleanup_script(mut self, script: impl Into<PathBuf>) -> Self {
        self.cleanup_script = Some(script.into());
        self
    }

    /// Unique module name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Module directory; scripts run with this as working directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Optional description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// File mappings in manifest order.
    #[must_use]
    pub fn mappings(&self) -> &[FileMapping] {
        &self.mappings
    }

    /// Install-time script, if any.
    #[must_use]
    pub fn init_script(&self) -> Option<&Path> {
        self.init_script.as_deref()
    }

    /// Uninstall-time script, if any.
    #[must_use]
    pub fn cleanup_script(&self) -> Option<&Path> {
        self.cleanup_script.as_deref()
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            None => write!(f, "{}", self.name),
            Some(desc) => write!(f, "{} - {desc}", self.name),
        }
    }
}
