//! Pulls remote-generated artifacts into the local cache directory.
//!
//! Polling is gated by the watermark's dirty flag: while nothing was pushed,
//! the loop only sleeps. A dirty flag starts a short burst of polls, because
//! the remote regenerates artifacts asynchronously after each patch.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use confetti_core::paths::{cache_dir, cache_target, AUTH_TOKEN_FILE, REMOVED_SUFFIX};
use confetti_sync::{NoopSink, Notification, NotificationSink, RemoteApi};

use crate::error::{io_err, DaemonError};
use crate::watermark::ResourceWatermark;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Sleep between dirty-flag checks.
    pub idle_interval: Duration,
    /// Wait before the single retry of a failed fetch.
    pub retry_delay: Duration,
    /// Polls per dirty flag.
    pub follow_up_polls: u32,
    pub follow_up_interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_millis(200),
            retry_delay: Duration::from_secs(1),
            follow_up_polls: 10,
            follow_up_interval: Duration::from_secs(1),
        }
    }
}

/// Outcome of one fetch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FetchSummary {
    pub written: Vec<String>,
    pub removed: Vec<String>,
    pub rejected: Vec<String>,
}

#[derive(Clone)]
pub struct ResourceReconciler {
    root: PathBuf,
    remote: RemoteApi,
    watermark: Arc<ResourceWatermark>,
    sink: Arc<dyn NotificationSink>,
    config: ReconcilerConfig,
}

impl ResourceReconciler {
    pub fn new(
        root: impl Into<PathBuf>,
        remote: RemoteApi,
        watermark: Arc<ResourceWatermark>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            root: root.into(),
            remote,
            watermark,
            sink: Arc::new(NoopSink),
            config,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn watermark(&self) -> Arc<ResourceWatermark> {
        self.watermark.clone()
    }

    /// Run until a fetch fails twice in a row. Never returns `Ok` on its own.
    pub async fn run(self, reset: bool) -> Result<(), DaemonError> {
        if reset {
            tracing::info!("removing all local resources due to reset");
            self.wipe_cache()?;
            self.watermark.reset();
        }
        self.watermark.mark_dirty();

        loop {
            if !self.watermark.take_dirty() {
                tokio::time::sleep(self.config.idle_interval).await;
                continue;
            }
            tracing::debug!(since = ?self.watermark.since(), "resources may have changed");
            for _ in 0..self.config.follow_up_polls.max(1) {
                self.poll().await?;
                tokio::time::sleep(self.config.follow_up_interval).await;
            }
        }
    }

    /// One reconciliation pass with a single retry. Advances the watermark to
    /// the time the pass started.
    pub async fn poll(&self) -> Result<FetchSummary, DaemonError> {
        let started = Utc::now();
        let since = self.watermark.since();
        let summary = match self.fetch(since).await {
            Ok(summary) => summary,
            Err(err) => {
                tracing::warn!(error = %err, "fetching resources failed, retrying");
                tokio::time::sleep(self.config.retry_delay).await;
                self.fetch(since).await.map_err(|err| {
                    tracing::error!(error = %err, "error when fetching resources");
                    self.sink.notify(Notification::Error {
                        message: err.to_string(),
                    });
                    err
                })?
            }
        };
        self.watermark.advance(started);
        Ok(summary)
    }

    async fn fetch(&self, since: Option<DateTime<Utc>>) -> Result<FetchSummary, DaemonError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.fetch_blocking(since))
            .await
            .map_err(|err| DaemonError::Task {
                task: "resource fetch",
                message: err.to_string(),
            })?
    }

    /// List artifacts changed since `since`, apply removals, then writes.
    pub fn fetch_blocking(&self, since: Option<DateTime<Utc>>) -> Result<FetchSummary, DaemonError> {
        let names = self.remote.resource_names(since)?;
        let mut summary = FetchSummary::default();

        for (name, original) in names
            .iter()
            .filter_map(|n| n.strip_suffix(REMOVED_SUFFIX).map(|o| (n, o)))
        {
            let Some(target) = cache_target(&self.root, original) else {
                tracing::warn!(name = %name, "refusing resource outside the cache directory");
                summary.rejected.push(name.clone());
                continue;
            };
            match fs::remove_file(&target) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(io_err(&target, err)),
            }
            tracing::debug!(path = %target.display(), "resource removed");
            summary.removed.push(original.to_string());
        }

        for name in names.iter().filter(|n| !n.ends_with(REMOVED_SUFFIX)) {
            let Some(target) = cache_target(&self.root, name) else {
                tracing::warn!(name = %name, "refusing resource outside the cache directory");
                summary.rejected.push(name.clone());
                continue;
            };
            let content = self.remote.resource_content(name)?;
            write_resource(&target, &content)?;
            tracing::trace!(path = %target.display(), "resource saved");
            self.sink.notify(Notification::RemoteFileProcessed { path: name.clone() });
            summary.written.push(name.clone());
        }

        if !summary.written.is_empty() || !summary.removed.is_empty() {
            tracing::info!(
                written = summary.written.len(),
                removed = summary.removed.len(),
                "resources updated",
            );
        }
        Ok(summary)
    }

    /// Remove every generated artifact. The stored access token survives.
    pub fn wipe_cache(&self) -> Result<(), DaemonError> {
        let dir = cache_dir(&self.root);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(io_err(&dir, err)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            if entry.file_name() == AUTH_TOKEN_FILE {
                continue;
            }
            let path = entry.path();
            let ty = entry.file_type().map_err(|e| io_err(&path, e))?;
            let removed = if ty.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match removed {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(io_err(&path, err)),
            }
        }
        Ok(())
    }
}

fn write_resource(target: &Path, content: &str) -> Result<(), DaemonError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    fs::write(target, content).map_err(|e| io_err(target, e))
}

#[cfg(test)]
mod tests {
    use confetti_sync::transport::{Method, RecordingTransport};
    use confetti_sync::SyncError;
    use tempfile::TempDir;

    use super::*;

    fn reconciler(root: &Path, transport: Arc<RecordingTransport>) -> ResourceReconciler {
        let remote = RemoteApi::new(transport, "http://parser.test", "http://res.test");
        let config = ReconcilerConfig {
            idle_interval: Duration::from_millis(5),
            retry_delay: Duration::from_millis(1),
            follow_up_polls: 2,
            follow_up_interval: Duration::from_millis(5),
        };
        ResourceReconciler::new(root, remote, Arc::new(ResourceWatermark::new(None)), config)
    }

    fn listing_then_content(listing: &'static str) -> RecordingTransport {
        RecordingTransport::with_responder(move |request| {
            if request.url.ends_with("/resources") {
                Ok(listing.to_string())
            } else {
                Ok(format!("content of {}", request.query_value("file").unwrap_or("")))
            }
        })
    }

    #[tokio::test]
    async fn poll_writes_and_removes_artifacts() {
        let root = TempDir::new().expect("root");
        let stale = root.path().join(".confetti/view/old.blade.php");
        fs::create_dir_all(stale.parent().expect("parent")).expect("mkdir");
        fs::write(&stale, "old").expect("write stale");

        let transport = Arc::new(listing_then_content(
            r#"["view/old.blade.php.removed", "view/new.blade.php", "../escape.php"]"#,
        ));
        let reconciler = reconciler(root.path(), transport.clone());

        let before = Utc::now();
        let summary = reconciler.poll().await.expect("poll");
        assert_eq!(summary.written, vec!["view/new.blade.php"]);
        assert_eq!(summary.removed, vec!["view/old.blade.php"]);
        assert_eq!(summary.rejected, vec!["../escape.php"]);

        assert!(!stale.exists());
        let written = fs::read_to_string(root.path().join(".confetti/view/new.blade.php"))
            .expect("written artifact");
        assert_eq!(written, "content of view/new.blade.php");
        assert!(!root.path().join("escape.php").exists());

        let since = reconciler.watermark().since().expect("advanced");
        assert!(since >= before);
    }

    #[tokio::test]
    async fn removal_marker_strips_a_single_suffix() {
        let root = TempDir::new().expect("root");
        let cache = root.path().join(".confetti/view");
        fs::create_dir_all(&cache).expect("mkdir");
        fs::write(cache.join("a"), "keep").expect("write");
        fs::write(cache.join("a.removed"), "drop").expect("write");

        let transport = Arc::new(listing_then_content(r#"["view/a.removed.removed"]"#));
        let summary = reconciler(root.path(), transport).poll().await.expect("poll");

        assert_eq!(summary.removed, vec!["view/a.removed"]);
        assert!(!cache.join("a.removed").exists());
        assert!(cache.join("a").exists());
    }

    #[tokio::test]
    async fn failed_fetch_is_retried_once() {
        let root = TempDir::new().expect("root");
        let transport = Arc::new(listing_then_content("[]"));
        transport.push_reply(Err(SyncError::Transport {
            url: "http://res.test/resources".into(),
            message: "connection refused".into(),
        }));
        let reconciler = reconciler(root.path(), transport.clone());

        reconciler.poll().await.expect("retry succeeds");
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn second_failure_stops_the_loop() {
        let root = TempDir::new().expect("root");
        let transport = Arc::new(RecordingTransport::with_responder(|request| {
            Err(SyncError::Transport {
                url: request.url.clone(),
                message: "connection refused".into(),
            })
        }));
        let reconciler = reconciler(root.path(), transport.clone());

        let err = reconciler.run(false).await.expect_err("loop stops");
        assert!(matches!(err, DaemonError::Sync(SyncError::Transport { .. })));
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn reset_wipes_cache_even_without_artifacts() {
        let root = TempDir::new().expect("root");
        let cache = root.path().join(".confetti");
        fs::create_dir_all(cache.join("Components/nested")).expect("mkdir");
        fs::write(cache.join("Components/nested/a.php"), "a").expect("write");
        fs::write(cache.join("index.json"), "{}").expect("write");
        fs::write(cache.join(AUTH_TOKEN_FILE), r#"{"access_token":"t"}"#).expect("write token");

        let transport = Arc::new(listing_then_content("[]"));
        let reconciler = reconciler(root.path(), transport.clone());
        let watermark = reconciler.watermark();
        watermark.advance(Utc::now());

        let run = tokio::spawn(reconciler.run(true));
        tokio::time::sleep(Duration::from_millis(100)).await;
        run.abort();

        assert!(!cache.join("Components").exists());
        assert!(!cache.join("index.json").exists());
        assert!(cache.join(AUTH_TOKEN_FILE).exists());

        let listings = transport.requests_with(Method::Get);
        assert!(!listings.is_empty());
        assert_eq!(listings[0].query_value("date_since"), None);
    }

    #[tokio::test]
    async fn idle_loop_does_not_poll() {
        let root = TempDir::new().expect("root");
        let transport = Arc::new(listing_then_content("[]"));
        let reconciler = reconciler(root.path(), transport.clone());

        let run = tokio::spawn(reconciler.run(false));
        tokio::time::sleep(Duration::from_millis(150)).await;
        run.abort();

        // One burst for the initial dirty flag, then silence.
        assert_eq!(transport.requests().len(), 2);
    }
}
