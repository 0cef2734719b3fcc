//! Install command implementation.
use anyhow::Result;
use std::sync::atomic::AtomicBool;

use crate::cli::{GlobalOpts, SelectOpts};
use crate::engine::Operation;
use crate::logging::Logger;

/// Run the install command.
///
/// # Errors
///
/// Returns an error if modules cannot be loaded or any module fails to install.
pub fn run(global: &GlobalOpts, opts: &SelectOpts, log: &Logger, cancel: &AtomicBool) -> Result<()> {
    log.debug(&format!("modman {}", super::version::version()));
    super::run_operation(global, opts, Operation::Install, log, cancel)
}
