//! Shared full-sync entrypoint used by the CLI and the watch session.

use confetti_core::SyncBatch;

use crate::dispatch::SyncDispatcher;
use crate::error::SyncError;
use crate::git::GitCli;
use crate::status;

/// Collect every change relative to `baseline` into a capped batch.
pub async fn collect_batch(
    git: &GitCli,
    baseline: &str,
    max_changes: usize,
) -> Result<SyncBatch, SyncError> {
    let git = git.clone();
    let baseline = baseline.to_string();
    let changes =
        tokio::task::spawn_blocking(move || status::changes_since(&git, &baseline)).await??;
    Ok(SyncBatch::from_changes(changes, max_changes))
}

/// Run StatusParser, then dispatch the resulting batch.
///
/// Returns the attempted paths; an empty vector means the tree already
/// matches the baseline as far as the remote is concerned.
pub async fn sync_all(dispatcher: &SyncDispatcher, baseline: &str) -> Result<Vec<String>, SyncError> {
    let batch = collect_batch(
        dispatcher.git(),
        baseline,
        dispatcher.config().max_changes,
    )
    .await?;
    if batch.is_empty() {
        tracing::debug!("no local changes to sync");
        return Ok(Vec::new());
    }
    dispatcher.dispatch(&batch, baseline).await
}
