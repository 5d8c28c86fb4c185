use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the watch session, watcher and reconciler.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("config error: {0}")]
    Config(#[from] confetti_core::ConfigError),

    #[error(transparent)]
    Sync(#[from] confetti_sync::SyncError),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("{root} is not a git repository; run this command in the root of your project")]
    NotARepository { root: PathBuf },

    #[error("{task} task failed: {message}")]
    Task { task: &'static str, message: String },
}

impl DaemonError {
    /// Recoverable errors: report and keep the session alive.
    pub fn is_user_error(&self) -> bool {
        matches!(self, DaemonError::Sync(err) if err.is_user_error())
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
