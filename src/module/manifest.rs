//! Module manifest loading and discovery.
//!
//! Each module lives in its own directory under the modules directory and is
//! described by a `config.toml`:
//!
//! ```toml
//! description = "Vim configuration"
//! init = true        # run init.sh after install
//! cleanup = false    # run cleanup.sh after uninstall
//!
//! [resources]
//! "vimrc" = ".vimrc"            # relative targets are placed under $HOME
//! "colors" = "~/.vim/colors"
//! ```
//!
//! Resource order in the file is preserved and becomes the mapping order.
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use super::{FileMapping, Module};
use crate::engine::oracle::normalize;
use crate::error::{InvalidReason, ManifestError};

/// Name of the manifest file inside a module directory.
pub const CONFIG_FILE: &str = "config.toml";
/// Script run after install when `init = true`.
pub const INIT_SCRIPT: &str = "init.sh";
/// Script run after uninstall when `cleanup = true`.
pub const CLEANUP_SCRIPT: &str = "cleanup.sh";

const PERMISSIONS_RX: u32 = 0b101;
const PERMISSIONS_R: u32 = 0b100;

/// Raw `config.toml` contents.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModuleDef {
    description: Option<String>,

    #[serde(default)]
    init: bool,

    #[serde(default)]
    cleanup: bool,

    #[serde(default)]
    resources: toml::Table,
}

/// Load the module in `module_dir`, resolving relative targets against `home`.
///
/// # Errors
///
/// Returns an error if the directory or its `config.toml` cannot be read or
/// parsed, or if the definition fails structural checks.
pub fn load(module_dir: &Path, home: &Path) -> Result<Module, ManifestError> {
    let name = module_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if name.is_empty() {
        return Err(ManifestError::Invalid {
            module: module_dir.display().to_string(),
            reason: InvalidReason::EmptyName,
        });
    }

    let dir = dunce::canonicalize(module_dir).map_err(|source| ManifestError::Io {
        module: name.clone(),
        path: module_dir.to_path_buf(),
        source,
    })?;

    let config_path = dir.join(CONFIG_FILE);
    let content = std::fs::read_to_string(&config_path).map_err(|source| ManifestError::Io {
        module: name.clone(),
        path: config_path.clone(),
        source,
    })?;

    let def: ModuleDef = toml::from_str(&content).map_err(|source| ManifestError::Parse {
        module: name.clone(),
        path: config_path,
        source,
    })?;

    build(&name, &dir, def, home)
}

/// Load a module by name from `modules_dir`.
///
/// # Errors
///
/// Returns [`ManifestError::NotFound`] when `name` is not a plain directory
/// name or no such module directory exists,
/// otherwise any error from [`load`].
pub fn find(modules_dir: &Path, name: &str, home: &Path) -> Result<Module, ManifestError> {
    let mut components = Path::new(name).components();
    let single_name = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    let module_dir = modules_dir.join(name);
    if !single_name || !module_dir.is_dir() {
        return Err(ManifestError::NotFound(name.to_string()));
    }
    load(&module_dir, home)
}

/// Load every module in `modules_dir`, sorted by name.
///
/// Hidden directories (such as `.git`) and plain files are ignored.  Modules
/// that fail to load are returned as errors alongside the valid ones so that
/// callers can report them.
///
/// # Errors
///
/// Returns [`ManifestError::Directory`] if `modules_dir` cannot be read.
pub fn list(
    modules_dir: &Path,
    home: &Path,
) -> Result<Vec<Result<Module, ManifestError>>, ManifestError> {
    let entries = std::fs::read_dir(modules_dir)
        .map_err(|_| ManifestError::Directory(modules_dir.to_path_buf()))?;

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .filter(|path| {
            path.file_name()
                .is_some_and(|n| !n.to_string_lossy().starts_with('.'))
        })
        .collect();
    dirs.sort();

    Ok(dirs.iter().map(|dir| load(dir, home)).collect())
}

/// Resolve a manifest target: `~/x` and relative paths land under `home`,
/// absolute paths are kept as-is.
#[must_use]
pub fn resolve_target(home: &Path, raw: &str) -> PathBuf {
    if raw == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        return home.join(rest);
    }
    home.join(raw)
}

fn build(name: &str, dir: &Path, def: ModuleDef, home: &Path) -> Result<Module, ManifestError> {
    let mut module = Module::new(name, dir);
    if let Some(description) = def.description {
        module = module.with_description(description);
    }

    if def.init {
        module = module.with_init_script(verify_script(name, dir, INIT_SCRIPT, "init")?);
    }
    if def.cleanup {
        module = module.with_cleanup_script(verify_script(name, dir, CLEANUP_SCRIPT, "cleanup")?);
    }

    let mut seen_targets = HashSet::new();
    for (resource, value) in def.resources {
        let raw_target = value
            .as_str()
            .ok_or_else(|| ManifestError::ResourceValue {
                module: name.to_string(),
                resource: resource.clone(),
            })?;

        let source = normalize(&dir.join(&resource));
        if !source.starts_with(dir) {
            return Err(ManifestError::Invalid {
                module: name.to_string(),
                reason: InvalidReason::SourceOutsideModule(source),
            });
        }
        if !has_owner_permissions(&source, PERMISSIONS_R) {
            return Err(ManifestError::Resource {
                module: name.to_string(),
                resource,
            });
        }

        let target = normalize(&resolve_target(home, raw_target));
        if !seen_targets.insert(target.clone()) {
            return Err(ManifestError::Invalid {
                module: name.to_string(),
                reason: InvalidReason::DuplicateTarget(target),
            });
        }

        module = module.with_mapping(FileMapping::new(source, target));
    }

    Ok(module)
}

fn verify_script(
    module: &str,
    dir: &Path,
    file_name: &str,
    label: &str,
) -> Result<PathBuf, ManifestError> {
    let script = dir.join(file_name);
    if script.is_file() && has_owner_permissions(&script, PERMISSIONS_RX) {
        Ok(script)
    } else {
        Err(ManifestError::Script {
            module: module.to_string(),
            script: label.to_string(),
        })
    }
}

/// Whether `path` exists and its owner permission bits include `desired`.
fn has_owner_permissions(path: &Path, desired: u32) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        check_permissions(meta.permissions().mode(), desired)
    }
    #[cfg(not(unix))]
    {
        let _ = (meta, desired);
        true
    }
}

/// Compare the owner `rwx` triplet of `mode` against `desired` (`0b100` = r).
#[cfg_attr(not(unix), allow(dead_code))]
const fn check_permissions(mode: u32, desired: u32) -> bool {
    ((mode >> 6) & desired) == desired
}
