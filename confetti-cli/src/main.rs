//! Confetti: keep a remote development environment in sync with local edits.
//!
//! # Usage
//!
//! ```text
//! confetti watch [--path <dir>] [--env <key>] [--reset] [-v|-vv|-vvv]
//! confetti sync [--path <dir>] [--env <key>] [--dry-run]
//! confetti status [--path <dir>] [--json]
//! ```

mod commands;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};

use commands::{status::StatusArgs, sync::SyncArgs, watch::WatchArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "confetti",
    version,
    about = "Keep your local files in sync with the remote development environment",
    long_about = None,
)]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sync local changes, then keep watching and pulling generated files.
    Watch(WatchArgs),

    /// Push all local changes once.
    Sync(SyncArgs),

    /// Show local changes without contacting the remote.
    Status(StatusArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    confetti_daemon::init_tracing(cli.verbose);
    match cli.command {
        Commands::Watch(args) => args.run(),
        Commands::Sync(args) => args.run(),
        Commands::Status(args) => args.run(),
    }
}
