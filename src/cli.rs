//! Command-line interface definition.
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Top-level CLI entry point for the module manager.
#[derive(Parser, Debug)]
#[command(
    name = "modman",
    about = "Install and remove dotfile modules as symlinks",
    version
)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Options shared by every subcommand.
    #[command(flatten)]
    pub global: GlobalOpts,
}

/// Options shared across all subcommands.
#[derive(Parser, Debug, Clone)]
pub struct GlobalOpts {
    /// Directory containing the modules [default: $HOME/.dotfiles]
    #[arg(short, long, global = true, env = "MODMAN_MODULES_DIR")]
    pub modules_dir: Option<PathBuf>,

    /// Print results as JSON instead of human-readable lines
    #[arg(long, global = true)]
    pub json: bool,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List available modules
    List(ListOpts),
    /// Link modules into place and run their init scripts
    Install(SelectOpts),
    /// Remove module links and run their cleanup scripts
    Uninstall(SelectOpts),
    /// Print version information
    Version,
}

/// Options for the `list` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct ListOpts {
    /// Load every module and report whether its config is valid
    #[arg(long)]
    pub verify: bool,
}

/// Module selection for `install` and `uninstall`.
#[derive(Parser, Debug, Clone)]
pub struct SelectOpts {
    /// Act on every module in the modules directory
    #[arg(short, long)]
    pub all: bool,

    /// With --all, leave out these modules
    #[arg(short, long, conflicts_with = "modules", value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Modules to act on, in order
    #[arg(required_unless_present = "all", conflicts_with = "all")]
    pub modules: Vec<String>,
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_install_named_modules() {
        let cli = Cli::parse_from(["modman", "install", "vim", "zsh"]);
        let Command::Install(opts) = cli.command else {
            panic!("expected install");
        };
        assert_eq!(opts.modules, vec!["vim", "zsh"]);
        assert!(!opts.all);
    }

    #[test]
    fn parse_install_all_with_exclude() {
        let cli = Cli::parse_from(["modman", "install", "--all", "--exclude", "git,tmux", "-e", "x"]);
        let Command::Install(opts) = cli.command else {
            panic!("expected install");
        };
        assert!(opts.all);
        assert_eq!(opts.exclude, vec!["git", "tmux", "x"]);
    }

    #[test]
    fn install_requires_modules_or_all() {
        assert!(Cli::try_parse_from(["modman", "install"]).is_err());
    }

    #[test]
    fn exclude_requires_all() {
        assert!(Cli::try_parse_from(["modman", "uninstall", "-e", "vim", "zsh"]).is_err());
        assert!(Cli::try_parse_from(["modman", "uninstall", "zsh", "--exclude=vim"]).is_err());
        assert!(Cli::try_parse_from(["modman", "install", "-e", "vim"]).is_err());
    }

    #[test]
    fn all_conflicts_with_names() {
        assert!(Cli::try_parse_from(["modman", "install", "-a", "vim"]).is_err());
    }

    #[test]
    fn parse_global_options_after_subcommand() {
        let cli = Cli::parse_from(["modman", "uninstall", "vim", "-m", "/tmp/mods", "--json", "-v"]);
        assert_eq!(cli.global.modules_dir, Some(PathBuf::from("/tmp/mods")));
        assert!(cli.global.json);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Uninstall(_)));
    }

    #[test]
    fn parse_list_verify() {
        let cli = Cli::parse_from(["modman", "list", "--verify"]);
        assert!(matches!(cli.command, Command::List(ListOpts { verify: true })));
    }

    #[test]
    fn parse_version() {
        let cli = Cli::parse_from(["modman", "version"]);
        assert!(matches!(cli.command, Command::Version));
    }
}
