//! Error types for confetti-sync.

use std::path::PathBuf;

use thiserror::Error;

use confetti_core::ConfigError;

/// All errors that can arise from change detection, patching and transport.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote rejected the request with a structured, user-fixable error.
    #[error("something went wrong, you can probably adjust it yourself to fix it: {title}")]
    User { title: String },

    /// More pending changes than a single sync pass accepts.
    #[error(
        "too many changes ({count}, max {max}); add the files to .gitignore or commit and push them first"
    )]
    TooManyChanges { count: usize, max: usize },

    /// The remote environment kept answering 403/502 past the retry budget.
    #[error("remote environment is still not ready after {attempts} attempts")]
    RemoteNotReady { attempts: u32 },

    /// Any other non-2xx response.
    #[error("error with status {status} for {method} {url}: {body}")]
    Status {
        status: u16,
        method: String,
        url: String,
        body: String,
    },

    /// Connection, DNS or timeout failure before a response arrived.
    #[error("transport error for {url}: {message}")]
    Transport { url: String, message: String },

    /// No usable access token.
    #[error("authentication error: {0}")]
    Auth(String),

    /// A git invocation failed; the message is the first line of stderr.
    #[error("git {command} failed: {message}")]
    Git { command: String, message: String },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// A blocking worker panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Join(String),
}

impl SyncError {
    /// Recoverable errors: report, skip the file, keep the session alive.
    pub fn is_user_error(&self) -> bool {
        matches!(self, SyncError::User { .. } | SyncError::TooManyChanges { .. })
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        SyncError::Join(err.to_string())
    }
}
