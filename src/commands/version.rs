//! Command: print version information.

/// Build version: `MODMAN_VERSION` or `git describe` at build time, else the
/// crate version.
#[must_use]
pub fn version() -> &'static str {
    option_env!("MODMAN_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"))
}

/// Print the modman version to stdout.
pub fn run() {
    println!("modman {}", version());
}
