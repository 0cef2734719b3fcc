//! Read-only filesystem probe.
//!
//! [`PathOracle::resolve`] answers the only questions the engine ever asks
//! about a target path: does it exist, is it a symlink, where does that link
//! point, and can the parent directory be modified.  It never mutates
//! anything, and "does not exist" is a normal answer rather than an error.
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::operations::{EntryKind, FileSystemOps, is_absent};

/// Lexically normalise `path`: drop `.` components and fold `..` into the
/// preceding component.  Symlinks are not consulted.
#[must_use]
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    out
}

/// Compare two paths, ignoring the Windows extended-length prefix.
#[must_use]
pub fn paths_equal(a: &Path, b: &Path) -> bool {
    #[cfg(windows)]
    {
        let strip = |p: &Path| {
            let s = p.to_string_lossy();
            s.strip_prefix(r"\\?\").map_or_else(|| s.to_string(), str::to_string)
        };
        strip(a).eq_ignore_ascii_case(&strip(b))
    }
    #[cfg(not(windows))]
    {
        a == b
    }
}

/// Snapshot of one path's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStatus {
    /// Normalised absolute path, with the parent directory canonicalised.
    pub path: PathBuf,
    /// Entry type without following a final symlink; `None` when absent.
    pub kind: Option<EntryKind>,
    /// Raw link value when the entry is a symlink.
    pub symlink_target: Option<PathBuf>,
    /// Whether the parent directory exists.
    pub parent_exists: bool,
    /// Whether the parent directory exists and the current user may create
    /// and remove entries in it.
    pub is_writable_parent: bool,
}

impl PathStatus {
    /// Whether anything (including a dangling symlink) occupies the path.
    #[must_use]
    pub const fn exists(&self) -> bool {
        self.kind.is_some()
    }

    /// Whether the path is a symbolic link.
    #[must_use]
    pub const fn is_symlink(&self) -> bool {
        matches!(self.kind, Some(EntryKind::Symlink))
    }

    /// Link value made absolute: relative values are taken relative to the
    /// link's own directory.
    #[must_use]
    pub fn resolved_link(&self) -> Option<PathBuf> {
        let value = self.symlink_target.as_ref()?;
        if value.is_absolute() {
            Some(normalize(value))
        } else {
            let parent = self.path.parent().unwrap_or_else(|| Path::new(""));
            Some(normalize(&parent.join(value)))
        }
    }

    /// Whether the path is a symlink whose value equals `source`.
    #[must_use]
    pub fn points_to(&self, source: &Path) -> bool {
        self.resolved_link()
            .is_some_and(|link| paths_equal(&link, &normalize(source)))
    }

    /// Short description of what occupies the path, for error messages.
    #[must_use]
    pub fn describe(&self) -> String {
        match (&self.kind, &self.symlink_target) {
            (None, _) => "nothing".to_string(),
            (Some(EntryKind::Symlink), Some(value)) => {
                format!("symlink to {}", value.display())
            }
            (Some(kind), _) => kind.to_string(),
        }
    }
}

/// Read-only view of the filesystem used by the validator and link engine.
#[derive(Debug, Clone, Copy)]
pub struct PathOracle<'a> {
    fs: &'a dyn FileSystemOps,
}

impl<'a> PathOracle<'a> {
    /// Create an oracle over `fs`.
    #[must_use]
    pub const fn new(fs: &'a dyn FileSystemOps) -> Self {
        Self { fs }
    }

    /// Type of whatever `path` ultimately refers to, following symlinks.
    ///
    /// # Errors
    ///
    /// Returns OS errors other than "not found".
    pub fn source_kind(&self, path: &Path) -> io::Result<Option<EntryKind>> {
        self.fs.target_kind(path)
    }

    /// Inspect `path`.
    ///
    /// The parent directory is canonicalised so that a symlinked `$HOME` (or
    /// similar) does not make the same target look like two paths; the final
    /// component is never followed.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::InvalidInput`] for relative paths, and any OS
    /// error other than "not found" raised while reading metadata.
    pub fn resolve(&self, path: &Path) -> io::Result<PathStatus> {
        if !path.is_absolute() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not an absolute path: {}", path.display()),
            ));
        }
        let normalized = normalize(path);
        let (Some(parent), Some(file_name)) = (normalized.parent(), normalized.file_name()) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path has no parent: {}", path.display()),
            ));
        };

        let canonical_parent = match self.fs.canonicalize(parent) {
            Ok(p) => Some(p),
            Err(e) if is_absent(&e) => None,
            Err(e) => return Err(e),
        };
        let parent_is_dir = match &canonical_parent {
            Some(p) => matches!(self.fs.target_kind(p)?, Some(EntryKind::Dir)),
            None => false,
        };

        let Some(canonical_parent) = canonical_parent.filter(|_| parent_is_dir) else {
            return Ok(PathStatus {
                path: normalized,
                kind: None,
                symlink_target: None,
                parent_exists: false,
                is_writable_parent: false,
            });
        };

        let full = canonical_parent.join(file_name);
        let kind = self.fs.entry_kind(&full)?;
        let symlink_target = match kind {
            Some(EntryKind::Symlink) => Some(self.fs.read_link(&full)?),
            _ => None,
        };
        let is_writable_parent = self.fs.is_writable_dir(&canonical_parent)?;

        Ok(PathStatus {
            path: full,
            kind,
            symlink_target,
            parent_exists: true,
            is_writable_parent,
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::operations::SystemFileSystemOps;

    fn canonical_tempdir() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        (dir, root)
    }

    #[test]
    fn normalize_folds_dot_components() {
        assert_eq!(normalize(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize(Path::new("/a/b/")), PathBuf::from("/a/b"));
        assert_eq!(normalize(Path::new("a/../../b")), PathBuf::from("../b"));
        assert_eq!(normalize(Path::new("../../b")), PathBuf::from("../../b"));
        assert_eq!(normalize(Path::new("/../etc")), PathBuf::from("/etc"));
    }

    #[test]
    fn relative_path_is_rejected() {
        let err = PathOracle::new(&SystemFileSystemOps)
            .resolve(Path::new("relative/x"))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn missing_path_with_existing_parent() {
        let (_guard, root) = canonical_tempdir();
        let status = PathOracle::new(&SystemFileSystemOps)
            .resolve(&root.join("absent"))
            .unwrap();
        assert!(!status.exists());
        assert!(!status.is_symlink());
        assert!(status.parent_exists);
        assert!(status.is_writable_parent);
        assert_eq!(status.path, root.join("absent"));
    }

    #[test]
    fn missing_parent_is_not_an_error() {
        let (_guard, root) = canonical_tempdir();
        let status = PathOracle::new(&SystemFileSystemOps)
            .resolve(&root.join("no/such/dir/file"))
            .unwrap();
        assert!(!status.exists());
        assert!(!status.parent_exists);
        assert!(!status.is_writable_parent);
    }

    #[test]
    fn parent_that_is_a_file_counts_as_missing() {
        let (_guard, root) = canonical_tempdir();
        std::fs::write(root.join("file"), "x").unwrap();
        let status = PathOracle::new(&SystemFileSystemOps)
            .resolve(&root.join("file/child"))
            .unwrap();
        assert!(!status.parent_exists);
    }

    #[test]
    fn regular_file_is_not_a_symlink() {
        let (_guard, root) = canonical_tempdir();
        std::fs::write(root.join("f"), "x").unwrap();
        let status = PathOracle::new(&SystemFileSystemOps)
            .resolve(&root.join("f"))
            .unwrap();
        assert!(status.exists());
        assert!(!status.is_symlink());
        assert_eq!(status.kind, Some(EntryKind::File));
        assert_eq!(status.describe(), "regular file");
    }

    #[cfg(unix)]
    #[test]
    fn symlink_reports_its_value() {
        let (_guard, root) = canonical_tempdir();
        let source = root.join("source");
        std::fs::write(&source, "x").unwrap();
        std::os::unix::fs::symlink(&source, root.join("link")).unwrap();

        let status = PathOracle::new(&SystemFileSystemOps)
            .resolve(&root.join("link"))
            .unwrap();
        assert!(status.is_symlink());
        assert_eq!(status.symlink_target.as_deref(), Some(source.as_path()));
        assert!(status.points_to(&source));
        assert!(!status.points_to(&root.join("other")));
    }

    #[cfg(unix)]
    #[test]
    fn relative_link_value_resolves_against_link_directory() {
        let (_guard, root) = canonical_tempdir();
        std::fs::create_dir(root.join("m")).unwrap();
        std::fs::write(root.join("m/vimrc"), "x").unwrap();
        std::os::unix::fs::symlink("m/vimrc", root.join(".vimrc")).unwrap();

        let status = PathOracle::new(&SystemFileSystemOps)
            .resolve(&root.join(".vimrc"))
            .unwrap();
        assert!(status.points_to(&root.join("m/vimrc")));
    }

    #[cfg(unix)]
    #[test]
    fn dangling_symlink_still_exists() {
        let (_guard, root) = canonical_tempdir();
        std::os::unix::fs::symlink("/nonexistent/x", root.join("link")).unwrap();
        let status = PathOracle::new(&SystemFileSystemOps)
            .resolve(&root.join("link"))
            .unwrap();
        assert!(status.exists());
        assert!(status.is_symlink());
        assert_eq!(status.describe(), "symlink to /nonexistent/x");
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_parent_is_canonicalised() {
        let (_guard, root) = canonical_tempdir();
        std::fs::create_dir(root.join("real")).unwrap();
        std::os::unix::fs::symlink(root.join("real"), root.join("alias")).unwrap();
        let status = PathOracle::new(&SystemFileSystemOps)
            .resolve(&root.join("alias/./x"))
            .unwrap();
        assert_eq!(status.path, root.join("real/x"));
    }
}
