//! Module-based dotfiles manager.
//!
//! A module is a directory holding configuration files plus a `config.toml`
//! that maps each file to a target path.  Installing a module symlinks every
//! file into place and then runs its optional init script; uninstalling
//! removes exactly the links the module owns and runs its optional cleanup
//! script.
//!
//! The public API is organised into these layers:
//!
//! - **[`module`]**: module model and `config.toml` loading
//! - **[`engine`]**: validate-then-act install/uninstall with rollback
//! - **[`operations`]** and **[`exec`]**: filesystem and process seams
//! - **[`commands`]**: top-level subcommand orchestration (`list`, `install`, `uninstall`)
#![deny(clippy::or_fun_call)]
#![deny(clippy::bool_to_int_with_if)]

pub mod cli;
pub mod commands;
pub mod engine;
pub mod error;
pub mod exec;
pub mod logging;
pub mod module;
pub mod operations;
