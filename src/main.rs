//! `modman` binary entry point.
use anyhow::{Context as _, Result};
use clap::Parser;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use modman::cli::{self, Command};
use modman::commands;
use modman::logging::{self, Logger};

fn main() -> Result<()> {
    let _ = enable_ansi_support::enable_ansi_support();
    let args = cli::Cli::parse();

    let command = match &args.command {
        Command::List(_) => "list",
        Command::Install(_) => "install",
        Command::Uninstall(_) => "uninstall",
        Command::Version => {
            commands::version::run();
            return Ok(());
        }
    };
    logging::init_subscriber(args.verbose, command);
    let log = Logger::new(command);

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        ctrlc::set_handler(move || {
            cancel.store(true, Ordering::SeqCst);
        })
        .context("failed to install Ctrl-C handler")?;
    }

    match &args.command {
        Command::List(opts) => commands::list::run(&args.global, opts, args.verbose, &log),
        Command::Install(opts) => commands::install::run(&args.global, opts, &log, &cancel),
        Command::Uninstall(opts) => commands::uninstall::run(&args.global, opts, &log, &cancel),
        Command::Version => Ok(()),
    }
}
