//! `confetti status`: local change set, no remote involved.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::{ColoredString, Colorize};

use confetti_core::{Change, GitStatus};
use confetti_daemon::repository_root;
use confetti_sync::{status, GitCli};

/// Arguments for `confetti status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Root directory of the git repository (defaults to the current directory).
    #[arg(short, long)]
    pub path: Option<PathBuf>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let root = repository_root(&super::resolve_root(self.path)?)?;
        let changes = status::local_status(&GitCli::new(&root)).context("failed to read git status")?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&changes)?);
            return Ok(());
        }
        if changes.is_empty() {
            println!("{} nothing to sync, working tree clean", "✓".green());
            return Ok(());
        }
        for change in &changes {
            print_change(change);
        }
        println!("{} change(s)", changes.len());
        Ok(())
    }
}

fn print_change(change: &Change) {
    let code = format!(
        "{}{}",
        change.staged_status.code(),
        change.unstaged_status.code()
    );
    match &change.from_path {
        Some(from) => println!(
            "  {}  {} ← {} ({}%)",
            paint(change.status(), code),
            change.path,
            from,
            change.similarity_score
        ),
        None => println!("  {}  {}", paint(change.status(), code), change.path),
    }
}

fn paint(status: GitStatus, text: String) -> ColoredString {
    match status {
        GitStatus::Added | GitStatus::Untracked => text.green(),
        GitStatus::Deleted => text.red(),
        GitStatus::Renamed | GitStatus::Copied => text.cyan(),
        GitStatus::Unmerged => text.magenta(),
        _ => text.yellow(),
    }
}
