//! `confetti watch`: sync once, then follow local edits until ctrl-c.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use confetti_daemon::{repository_root, start_blocking, DaemonError, WatchOptions};

/// Arguments for `confetti watch`.
#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Root directory of the git repository (defaults to the current directory).
    #[arg(short, long)]
    pub path: Option<PathBuf>,

    /// Environment key from app_config.json5.
    #[arg(short = 'n', long = "env")]
    pub environment: Option<String>,

    /// Parse all files again and re-download every generated file.
    #[arg(short, long)]
    pub reset: bool,
}

impl WatchArgs {
    pub fn run(self) -> Result<()> {
        let root = repository_root(&super::resolve_root(self.path)?)?;
        println!("{} {}", "Confetti watch".bold(), root.display());

        let mut options = WatchOptions::new(root);
        options.environment = self.environment;
        options.reset = self.reset;

        start_blocking(options).map_err(|err| match err {
            err if err.is_user_error() => {
                eprintln!("{} {err}", "✗".red());
                anyhow::Error::new(err).context("fix the reported problem and start watching again")
            }
            DaemonError::Config(_) => {
                anyhow::Error::new(err).context("check app_config.json5 in the repository root")
            }
            err => anyhow::Error::new(err).context("watch exited with error"),
        })
    }
}
