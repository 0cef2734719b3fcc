//! Filesystem operation abstractions for dependency injection.
//!
//! Every filesystem query and mutation the engine performs goes through the
//! [`FileSystemOps`] trait so that tests can inject failures (for example a
//! link that cannot be created after validation succeeded).  Production code
//! uses [`SystemFileSystemOps`].

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Type of a filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory.
    Dir,
    /// Symbolic link (only reported when links are not followed).
    Symlink,
    /// Anything else (socket, fifo, device).
    Other,
}

impl EntryKind {
    fn from_file_type(ft: std::fs::FileType) -> Self {
        if ft.is_symlink() {
            Self::Symlink
        } else if ft.is_dir() {
            Self::Dir
        } else if ft.is_file() {
            Self::File
        } else {
            Self::Other
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => write!(f, "regular file"),
            Self::Dir => write!(f, "directory"),
            Self::Symlink => write!(f, "symlink"),
            Self::Other => write!(f, "special file"),
        }
    }
}

/// Abstraction over the filesystem calls used by the engine.
///
/// "Not found" is never an error for the query methods: they return
/// `Ok(None)` instead, so callers can tell a missing path from an OS failure.
pub trait FileSystemOps: Send + Sync + fmt::Debug {
    /// Type of the entry at `path` without following a final symlink.
    ///
    /// # Errors
    ///
    /// Returns an error on OS failures other than "not found".
    fn entry_kind(&self, path: &Path) -> io::Result<Option<EntryKind>>;

    /// Type of the entry at `path`, following symlinks.
    ///
    /// # Errors
    ///
    /// Returns an error on OS failures other than "not found".
    fn target_kind(&self, path: &Path) -> io::Result<Option<EntryKind>>;

    /// Read the value of the symbolic link at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` is not a symlink or cannot be read.
    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;

    /// Resolve `path` to an absolute path with every symlink expanded.
    ///
    /// # Errors
    ///
    /// Returns an error if any component does not exist.
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;

    /// Whether the current user may create and remove entries in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the permission check itself fails.
    fn is_writable_dir(&self, dir: &Path) -> io::Result<bool>;

    /// Create a symlink at `link` whose value is `source`.
    ///
    /// # Errors
    ///
    /// Returns an error if `link` already exists or cannot be created.
    fn create_symlink(&self, source: &Path, link: &Path) -> io::Result<()>;

    /// Remove the symlink at `link` (never follows it).
    ///
    /// # Errors
    ///
    /// Returns an error if removal fails.
    fn remove_symlink(&self, link: &Path) -> io::Result<()>;
}

/// Production [`FileSystemOps`] implementation that delegates to [`std::fs`].
#[derive(Debug, Default)]
pub struct SystemFileSystemOps;

impl FileSystemOps for SystemFileSystemOps {
    fn entry_kind(&self, path: &Path) -> io::Result<Option<EntryKind>> {
        absent_as_none(std::fs::symlink_metadata(path))
            .map(|meta| meta.map(|m| EntryKind::from_file_type(m.file_type())))
    }

    fn target_kind(&self, path: &Path) -> io::Result<Option<EntryKind>> {
        absent_as_none(std::fs::metadata(path))
            .map(|meta| meta.map(|m| EntryKind::from_file_type(m.file_type())))
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        std::fs::read_link(path)
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        dunce::canonicalize(path)
    }

    fn is_writable_dir(&self, dir: &Path) -> io::Result<bool> {
        #[cfg(unix)]
        {
            access_writable(dir)
        }
        #[cfg(not(unix))]
        {
            Ok(!std::fs::metadata(dir)?.permissions().readonly())
        }
    }

    fn create_symlink(&self, source: &Path, link: &Path) -> io::Result<()> {
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(source, link)
        }
        #[cfg(windows)]
        {
            if source.is_dir() {
                std::os::windows::fs::symlink_dir(source, link)
            } else {
                std::os::windows::fs::symlink_file(source, link)
            }
        }
    }

    fn remove_symlink(&self, link: &Path) -> io::Result<()> {
        let meta = std::fs::symlink_metadata(link)?;
        if is_dir_like(&meta) {
            std::fs::remove_dir(link)
        } else {
            std::fs::remove_file(link)
        }
    }
}

/// Map "not found" (and "a parent is not a directory") to `Ok(None)`.
fn absent_as_none<T>(result: io::Result<T>) -> io::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if is_absent(&e) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Whether an I/O error means the path simply is not there.
pub(crate) fn is_absent(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

/// Check if metadata represents a directory-like entry.
/// On Windows, `symlink_metadata().is_dir()` returns `false` for directory symlinks,
/// so we check the raw `FILE_ATTRIBUTE_DIRECTORY` bit instead.
fn is_dir_like(meta: &std::fs::Metadata) -> bool {
    #[cfg(windows)]
    {
        use std::os::windows::fs::MetadataExt;
        meta.file_attributes() & 0x10 != 0 // FILE_ATTRIBUTE_DIRECTORY
    }
    #[cfg(not(windows))]
    {
        !meta.file_type().is_symlink() && meta.is_dir()
    }
}

/// `access(2)` with `W_OK | X_OK`: creating or unlinking an entry needs both.
#[cfg(unix)]
#[allow(unsafe_code)]
fn access_writable(dir: &Path) -> io::Result<bool> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt as _;

    let c_path = CString::new(dir.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: `c_path` is a valid NUL-terminated string that outlives the call,
    // and `access` does not retain the pointer.
    let rc = unsafe { libc::access(c_path.as_ptr(), libc::W_OK | libc::X_OK) };
    if rc == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::EACCES | libc::EROFS | libc::EPERM) => Ok(false),
        _ => Err(err),
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
pub(crate) mod test_helpers {
    use super::{EntryKind, FileSystemOps, SystemFileSystemOps};
    use std::collections::{HashMap, HashSet};
    use std::io;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    /// Real filesystem with injectable failures on the mutating calls.
    ///
    /// Queries pass straight through, so validation sees the true state;
    /// only link creation and removal misbehave for the configured paths.
    #[derive(Debug, Default)]
    pub struct FaultyFileSystemOps {
        inner: SystemFileSystemOps,
        fail_create: HashMap<PathBuf, io::ErrorKind>,
        fail_remove: HashMap<PathBuf, io::ErrorKind>,
        race_create: HashSet<PathBuf>,
        read_only: HashSet<PathBuf>,
        created: Mutex<Vec<PathBuf>>,
        removed: Mutex<Vec<PathBuf>>,
    }

    impl FaultyFileSystemOps {
        /// Wrapper with no failures configured.
        pub fn new() -> Self {
            Self::default()
        }

        /// Make `create_symlink` at `link` fail with `kind`.
        #[must_use]
        pub fn fail_create_at(mut self, link: impl Into<PathBuf>, kind: io::ErrorKind) -> Self {
            self.fail_create.insert(link.into(), kind);
            self
        }

        /// Make `remove_symlink` at `link` fail with `kind`.
        #[must_use]
        pub fn fail_remove_at(mut self, link: impl Into<PathBuf>, kind: io::ErrorKind) -> Self {
            self.fail_remove.insert(link.into(), kind);
            self
        }

        /// Simulate another process writing a regular file at `link`
        /// between validation and link creation.
        #[must_use]
        pub fn race_create_at(mut self, link: impl Into<PathBuf>) -> Self {
            self.race_create.insert(link.into());
            self
        }

        /// Report `dir` as not writable by the current user.
        #[must_use]
        pub fn read_only_dir(mut self, dir: impl Into<PathBuf>) -> Self {
            self.read_only.insert(dir.into());
            self
        }

        /// Links created so far, in order.
        pub fn created(&self) -> Vec<PathBuf> {
            self.created.lock().expect("created log poisoned").clone()
        }

        /// Links removed so far, in order.
        pub fn removed(&self) -> Vec<PathBuf> {
            self.removed.lock().expect("removed log poisoned").clone()
        }
    }

    impl FileSystemOps for FaultyFileSystemOps {
        fn entry_kind(&self, path: &Path) -> io::Result<Option<EntryKind>> {
            self.inner.entry_kind(path)
        }

        fn target_kind(&self, path: &Path) -> io::Result<Option<EntryKind>> {
            self.inner.target_kind(path)
        }

        fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
            self.inner.read_link(path)
        }

        fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
            self.inner.canonicalize(path)
        }

        fn is_writable_dir(&self, dir: &Path) -> io::Result<bool> {
            if self.read_only.contains(dir) {
                return Ok(false);
            }
            self.inner.is_writable_dir(dir)
        }

        fn create_symlink(&self, source: &Path, link: &Path) -> io::Result<()> {
            if let Some(kind) = self.fail_create.get(link) {
                return Err(io::Error::from(*kind));
            }
            if self.race_create.contains(link) {
                std::fs::write(link, "written by someone else")?;
            }
            self.inner.create_symlink(source, link)?;
            self.created
                .lock()
                .expect("created log poisoned")
                .push(link.to_path_buf());
            Ok(())
        }

        fn remove_symlink(&self, link: &Path) -> io::Result<()> {
            if let Some(kind) = self.fail_remove.get(link) {
                return Err(io::Error::from(*kind));
            }
            self.inner.remove_symlink(link)?;
            self.removed
                .lock()
                .expect("removed log poisoned")
                .push(link.to_path_buf());
            Ok(())
        }
    }
}
