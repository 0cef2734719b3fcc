// Shared helpers for integration tests.
//
// Provides a temporary modules directory plus a fake home directory and a
// fluent builder for module definitions, so each integration test can set up
// an isolated environment without repeating filesystem boilerplate.
//
// Used by all integration test binaries that declare `mod common;`.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Output;

use modman::module::{Module, manifest};

/// An isolated modules directory and home backed by a [`tempfile::TempDir`].
pub struct Fixture {
    root: tempfile::TempDir,
}

impl Fixture {
    /// Create empty `modules/`, `home/` and `cache/` directories.
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("create temp dir");
        for dir in ["modules", "home", "cache"] {
            std::fs::create_dir_all(root.path().join(dir)).expect("create fixture dir");
        }
        Self { root }
    }

    /// Directory holding the modules.
    pub fn modules_dir(&self) -> PathBuf {
        self.root.path().join("modules")
    }

    /// Fake home directory that relative targets resolve against.
    pub fn home(&self) -> PathBuf {
        self.root.path().join("home")
    }

    /// Start defining a module called `name`.
    pub fn module(&self, name: &str) -> ModuleBuilder {
        ModuleBuilder {
            dir: self.modules_dir().join(name),
            description: None,
            resources: Vec::new(),
            files: Vec::new(),
            init: None,
            cleanup: None,
        }
    }

    /// Load a module through the manifest loader.
    pub fn load(&self, name: &str) -> Module {
        manifest::find(&self.modules_dir(), name, &self.home()).expect("load module")
    }

    /// Run the `modman` binary against this fixture.
    pub fn modman(&self, args: &[&str]) -> Output {
        std::process::Command::new(env!("CARGO_BIN_EXE_modman"))
            .args(args)
            .env("HOME", self.home())
            .env("XDG_CACHE_HOME", self.root.path().join("cache"))
            .env("MODMAN_MODULES_DIR", self.modules_dir())
            .output()
            .expect("run modman")
    }
}

/// Fluent builder for one module directory.
pub struct ModuleBuilder {
    dir: PathBuf,
    description: Option<String>,
    resources: Vec<(String, String)>,
    files: Vec<(String, String)>,
    init: Option<String>,
    cleanup: Option<String>,
}

impl ModuleBuilder {
    /// Set the module description.
    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Add a source file with `content` mapped to `target`.
    pub fn file(mut self, source: &str, content: &str, target: &str) -> Self {
        self.files.push((source.to_string(), content.to_string()));
        self.resources.push((source.to_string(), target.to_string()));
        self
    }

    /// Add an `init.sh` with the given shell body.
    pub fn init(mut self, body: &str) -> Self {
        self.init = Some(body.to_string());
        self
    }

    /// Add a `cleanup.sh` with the given shell body.
    pub fn cleanup(mut self, body: &str) -> Self {
        self.cleanup = Some(body.to_string());
        self
    }

    /// Write the module to disk and return its directory.
    pub fn write(self) -> PathBuf {
        std::fs::create_dir_all(&self.dir).expect("create module dir");

        let mut config = String::new();
        if let Some(description) = &self.description {
            config.push_str(&format!("description = {description:?}\n"));
        }
        config.push_str(&format!("init = {}\n", self.init.is_some()));
        config.push_str(&format!("cleanup = {}\n", self.cleanup.is_some()));
        config.push_str("\n[resources]\n");
        for (source, target) in &self.resources {
            config.push_str(&format!("{source:?} = {target:?}\n"));
        }
        std::fs::write(self.dir.join("config.toml"), config).expect("write config.toml");

        for (source, content) in &self.files {
            let path = self.dir.join(source);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).expect("create source parent");
            }
            std::fs::write(path, content).expect("write source file");
        }

        if let Some(body) = &self.init {
            write_script(&self.dir.join("init.sh"), body);
        }
        if let Some(body) = &self.cleanup {
            write_script(&self.dir.join("cleanup.sh"), body);
        }
        self.dir
    }
}

fn write_script(path: &Path, body: &str) {
    std::fs::write(path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod script");
    }
}

/// Whether `link` is a symlink pointing at `source`.
pub fn links_to(link: &Path, source: &Path) -> bool {
    std::fs::read_link(link).is_ok_and(|value| value == source)
}
