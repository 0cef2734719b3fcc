//! Module install/uninstall engine.
//!
//! The layers, leaf first:
//!
//! - **[`oracle`]**: read-only probe of a target path
//! - **[`validate`]**: turns a module into an install or uninstall plan
//! - **[`link`]**: applies a plan, with rollback on install failure
//! - **[`script`]**: runs the init or cleanup script
//! - **[`coordinator`]**: sequences the phases and owns the result contract
//!
//! The engine never prints or logs; callers render the returned [`Report`].
pub mod coordinator;
pub mod link;
pub mod oracle;
pub mod report;
pub mod script;
pub mod validate;

pub use coordinator::{BatchEntry, BatchReport, Engine, InstallError, UninstallError};
pub use report::{
    InstallReport, LinkOutcome, MappingOutcome, Operation, Phase, Report, ScriptStatus, Status,
    UninstallReport,
};
