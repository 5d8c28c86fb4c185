pub mod status;
pub mod sync;
pub mod watch;

use std::path::PathBuf;

use anyhow::{Context, Result};

/// `--path` when given, else the current directory.
pub(crate) fn resolve_root(path: Option<PathBuf>) -> Result<PathBuf> {
    match path {
        Some(path) => Ok(path),
        None => std::env::current_dir().context("could not determine current directory"),
    }
}

pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}
