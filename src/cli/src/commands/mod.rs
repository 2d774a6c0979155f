//! CLI command definitions and dispatch.

mod pivot;
mod version;

use clap::{Parser, Subcommand};

/// Xenomorph: replace the running root filesystem with one built
/// from an OCI image.
#[derive(Parser)]
#[command(name = "xenomorph", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Build a new root from an image and pivot into it
    Pivot(pivot::PivotArgs),
    /// Show version information
    Version(version::VersionArgs),
}

impl Cli {
    /// Whether debug logging was requested.
    pub fn verbose(&self) -> bool {
        matches!(&self.command, Command::Pivot(args) if args.verbose)
    }
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Pivot(args) => pivot::execute(args),
        Command::Version(args) => version::execute(args),
    }
}
