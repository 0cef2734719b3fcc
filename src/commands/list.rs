//! List command implementation.
use anyhow::Result;
use serde::Serialize;
use std::fmt::Write as _;

use super::CommandContext;
use crate::cli::{GlobalOpts, ListOpts};
use crate::error::ManifestError;
use crate::logging::Logger;
use crate::module::{Module, manifest};

/// One row of the listing.
#[derive(Debug, Serialize)]
struct ListEntry {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<Result<Module, ManifestError>> for ListEntry {
    fn from(loaded: Result<Module, ManifestError>) -> Self {
        match loaded {
            Ok(module) => Self {
                name: module.name().to_string(),
                description: module.description().map(String::from),
                valid: true,
                error: None,
            },
            Err(e) => Self {
                name: e.module().unwrap_or("?").to_string(),
                description: None,
                valid: false,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Run the list command.
///
/// # Errors
///
/// Returns an error if the modules directory cannot be read, or if
/// `--verify` finds a module that fails to load.
pub fn run(global: &GlobalOpts, opts: &ListOpts, verbose: bool, log: &Logger) -> Result<()> {
    let ctx = CommandContext::init(global)?;
    log.debug(&format!("modules directory: {}", ctx.modules_dir.display()));

    let entries: Vec<ListEntry> = manifest::list(&ctx.modules_dir, &ctx.home)?
        .into_iter()
        .map(ListEntry::from)
        .collect();

    if global.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        print!("{}", render(&entries, verbose, opts.verify));
    }

    let invalid = entries.iter().filter(|e| !e.valid).count();
    if opts.verify && invalid > 0 {
        anyhow::bail!("{invalid} module(s) failed to load");
    }
    Ok(())
}

fn render(entries: &[ListEntry], verbose: bool, verify: bool) -> String {
    let width = entries.iter().map(|e| e.name.len()).max().unwrap_or(0);
    let mut out = String::new();
    for entry in entries {
        let mut line = entry.name.clone();
        if verify {
            let state = entry.error.as_deref().unwrap_or("OK");
            line = format!("{:width$}  {state}", entry.name);
        } else if verbose && let Some(description) = &entry.description {
            line = format!("{:width$}  {description}", entry.name);
        }
        let _ = writeln!(out, "{}", line.trim_end());
    }
    out
}
