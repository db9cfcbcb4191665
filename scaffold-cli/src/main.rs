//! Scaffold: keep a directory tree in sync with a blueprint.
//!
//! # Usage
//!
//! ```text
//! scaffold init [--root <dir>]
//! scaffold plan   [--root <dir>] [--blueprint <file>] [--set k=v]... [--force] [--json]
//! scaffold apply  [--root <dir>] [--blueprint <file>] [--set k=v]... [--dry-run] [--force] [--json]
//! scaffold diff   [--root <dir>] [--blueprint <file>] [--set k=v]...
//! scaffold status [--root <dir>] [--json]
//! ```
//!
//! `-v` logs at info, `-vv` at debug; `RUST_LOG` overrides both.

mod commands;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};

use commands::{
    apply::ApplyArgs, diff::DiffArgs, init::InitArgs, plan::PlanArgs, status::StatusArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "scaffold",
    version,
    about = "Materialize a blueprint into a directory tree and keep it in sync",
    long_about = None,
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create `.scaffold/config.yaml` and a starter blueprint.
    Init(InitArgs),

    /// Show what `apply` would change, without touching disk.
    Plan(PlanArgs),

    /// Materialize the blueprint and commit the chronicle.
    Apply(ApplyArgs),

    /// Show unified diffs of every text file `apply` would write.
    Diff(DiffArgs),

    /// Report drift between the chronicle and disk.
    Status(StatusArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Plan(args) => args.run(),
        Commands::Apply(args) => args.run(),
        Commands::Diff(args) => args.run(),
        Commands::Status(args) => args.run(),
    }
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
