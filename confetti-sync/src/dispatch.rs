//! Bounded concurrent fan-out of a [`SyncBatch`] to the remote.
//!
//! Every change becomes one blocking job (git + HTTP) on tokio's blocking
//! pool, gated by a semaphore of `workers` permits. The dispatcher waits for
//! all jobs before returning, whatever their outcome.

use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use confetti_core::{Change, SyncBatch};

use crate::error::SyncError;
use crate::events::{NoopSink, Notification, NotificationSink};
use crate::git::GitCli;
use crate::patch::{self, PatchOutcome};
use crate::remote::RemoteApi;

pub const DEFAULT_MAX_CHANGES: usize = 2000;
pub const DEFAULT_WORKERS: usize = 16;
pub const DEFAULT_BASE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    pub max_changes: usize,
    pub workers: usize,
    /// Per-call timeout before the batch-size allowance is added.
    pub base_timeout: Duration,
    pub show_progress: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_changes: DEFAULT_MAX_CHANGES,
            workers: DEFAULT_WORKERS,
            base_timeout: DEFAULT_BASE_TIMEOUT,
            show_progress: false,
        }
    }
}

impl DispatchConfig {
    /// `base + N` seconds for a batch of `n` changes.
    pub fn timeout_for(&self, n: usize) -> Duration {
        self.base_timeout + Duration::from_secs(n as u64)
    }
}

/// What happened to a single change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Patched,
    Deleted,
    /// New file without content yet, or no diff against the baseline.
    Skipped,
}

#[derive(Clone)]
pub struct SyncDispatcher {
    git: GitCli,
    remote: RemoteApi,
    sink: Arc<dyn NotificationSink>,
    config: DispatchConfig,
}

impl SyncDispatcher {
    pub fn new(git: GitCli, remote: RemoteApi, config: DispatchConfig) -> Self {
        Self {
            git,
            remote,
            sink: Arc::new(NoopSink),
            config,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn git(&self) -> &GitCli {
        &self.git
    }

    pub fn remote(&self) -> &RemoteApi {
        &self.remote
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn sink(&self) -> Arc<dyn NotificationSink> {
        self.sink.clone()
    }

    /// Send every change in `batch`; returns the attempted paths in batch order.
    ///
    /// A batch over its cap is rejected before any remote call. User errors
    /// are logged and skipped; the first fatal error is returned once every
    /// job has finished.
    pub async fn dispatch(
        &self,
        batch: &SyncBatch,
        baseline: &str,
    ) -> Result<Vec<String>, SyncError> {
        if batch.exceeds_cap() {
            return Err(SyncError::TooManyChanges {
                count: batch.len(),
                max: batch.max_changes(),
            });
        }
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let timeout = self.config.timeout_for(batch.len());
        let permits = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let progress = self.progress_bar(batch.len());
        tracing::info!(changes = batch.len(), "syncing changes");

        let mut jobs = JoinSet::new();
        for (index, change) in batch.changes().iter().cloned().enumerate() {
            let permits = permits.clone();
            let worker = self.clone();
            let baseline = baseline.to_string();
            jobs.spawn(async move {
                let path = change.path.clone();
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => tokio::task::spawn_blocking(move || {
                        worker.apply(&change, &baseline, timeout)
                    })
                    .await
                    .map_err(SyncError::from)
                    .and_then(|r| r),
                    Err(err) => Err(SyncError::Join(err.to_string())),
                };
                (index, path, result)
            });
        }

        let mut attempted: Vec<(usize, String)> = Vec::with_capacity(batch.len());
        let mut fatal: Option<SyncError> = None;
        while let Some(joined) = jobs.join_next().await {
            let (index, path, result) = match joined {
                Ok(done) => done,
                Err(err) => {
                    fatal.get_or_insert(SyncError::from(err));
                    continue;
                }
            };
            progress.inc(1);
            progress.set_message(path.clone());
            match result {
                Ok(applied) => {
                    tracing::debug!(path = %path, ?applied, "change synced");
                }
                Err(err) if err.is_user_error() => {
                    tracing::warn!(path = %path, error = %err, "skipping file");
                    self.sink.notify(Notification::Error {
                        message: err.to_string(),
                    });
                }
                Err(err) => {
                    tracing::error!(path = %path, error = %err, "sync failed");
                    fatal.get_or_insert(err);
                }
            }
            attempted.push((index, path));
        }
        progress.finish_and_clear();

        if let Some(err) = fatal {
            return Err(err);
        }
        attempted.sort_by_key(|(index, _)| *index);
        Ok(attempted.into_iter().map(|(_, path)| path).collect())
    }

    /// Delete or patch one change. Blocking.
    pub fn apply(
        &self,
        change: &Change,
        baseline: &str,
        timeout: Duration,
    ) -> Result<Applied, SyncError> {
        if change.is_deletion() && !self.exists_locally(&change.path)? {
            self.remote.delete_source(&change.path, timeout)?;
            self.sink.notify(Notification::LocalFileChanged {
                path: change.path.clone(),
            });
            return Ok(Applied::Deleted);
        }

        match patch::build(&self.git, baseline, &change.path, change.is_new())? {
            PatchOutcome::Ready(patch) if patch.is_empty() => {
                tracing::debug!(path = %change.path, "no difference against baseline");
                Ok(Applied::Skipped)
            }
            PatchOutcome::Ready(patch) => {
                self.remote.send_patch(&patch, timeout)?;
                self.sink.notify(Notification::LocalFileChanged {
                    path: change.path.clone(),
                });
                Ok(Applied::Patched)
            }
            PatchOutcome::EmptyNewFile { .. } => Ok(Applied::Skipped),
        }
    }

    fn exists_locally(&self, path: &str) -> Result<bool, SyncError> {
        let full = self.git.root().join(path);
        match std::fs::symlink_metadata(&full) {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(crate::error::io_err(full, err)),
        }
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::with_template("{bar:40} {pos}/{len} {wide_msg}") {
            bar.set_style(style);
        }
        bar
    }
}
