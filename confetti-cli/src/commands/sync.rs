//! `confetti sync`: push every local change once.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tokio::sync::broadcast;

use confetti_daemon::{DaemonError, Session};
use confetti_sync::{DispatchConfig, Notification, RecordingTransport, RemoteRequest};

/// Arguments for `confetti sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Root directory of the git repository (defaults to the current directory).
    #[arg(short, long)]
    pub path: Option<PathBuf>,

    /// Environment key from app_config.json5.
    #[arg(short = 'n', long = "env")]
    pub environment: Option<String>,

    /// Show the requests that would be sent without contacting the remote.
    #[arg(long)]
    pub dry_run: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let root = super::resolve_root(self.path)?;
        let environment = self.environment.as_deref();
        let runtime = super::runtime()?;

        if self.dry_run {
            let transport = Arc::new(RecordingTransport::new());
            let session = Session::with_transport(
                &root,
                environment,
                transport.clone(),
                DispatchConfig::default(),
            )
            .context("failed to prepare sync")?;
            let paths = runtime
                .block_on(session.sync_all())
                .map_err(report)
                .context("dry-run sync failed")?;
            print_requests(&transport.requests());
            println!("[dry-run] {} file(s) would be synced", paths.len());
            return Ok(());
        }

        let config = DispatchConfig {
            show_progress: true,
            ..DispatchConfig::default()
        };
        let session = Session::connect(&root, environment, config).context("failed to connect")?;
        let mut notifications = session.subscribe();
        let paths = runtime
            .block_on(session.sync_all())
            .map_err(report)
            .context("sync failed")?;
        let rejected = print_rejections(&mut notifications);
        if paths.is_empty() {
            println!("{} nothing to sync", "✓".green());
        } else {
            println!("{} synced {} file(s)", "✓".green(), paths.len());
            for path in &paths {
                println!("  ✎  {path}");
            }
        }
        if rejected > 0 {
            println!("{} {rejected} file(s) rejected by the remote", "!".yellow());
        }
        Ok(())
    }
}

/// Print a remediation hint for errors the user can fix locally.
fn report(err: DaemonError) -> DaemonError {
    if err.is_user_error() {
        eprintln!("{} {err}", "✗".red());
        eprintln!("  fix the reported problem and run `confetti sync` again");
    }
    err
}

/// Drain rejected-file notifications; returns how many there were.
fn print_rejections(notifications: &mut broadcast::Receiver<Notification>) -> usize {
    let mut rejected = 0;
    while let Ok(notification) = notifications.try_recv() {
        if let Notification::Error { message } = notification {
            eprintln!("{} {message}", "!".yellow());
            rejected += 1;
        }
    }
    rejected
}

fn print_requests(requests: &[RemoteRequest]) {
    for request in requests {
        let target = request
            .body
            .as_ref()
            .and_then(|b| b.get("path").or_else(|| b.get("file")))
            .and_then(|v| v.as_str())
            .or_else(|| request.query_value("path"))
            .unwrap_or("");
        println!(
            "[dry-run] {:<6} {} {}",
            request.method.as_str(),
            request.url,
            target.cyan()
        );
    }
}
