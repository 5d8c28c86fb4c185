//! Filesystem watcher: per-directory registration, event translation and the
//! sequential event loop that pushes each change to the remote.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{recommended_watcher, Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};

use confetti_core::paths::{is_base_definition, is_ignored_path, relative_path};
use confetti_core::{WatchEvent, WatchOperation};
use confetti_sync::patch::{self, PatchOutcome};
use confetti_sync::{
    GitCli, Notification, NotificationSink, RemoteApi, SyncDispatcher, SyncError,
};

use crate::error::{io_err, DaemonError};
use crate::watermark::ResourceWatermark;

/// Events arriving this close together are handled as one burst.
pub const COALESCE_WINDOW: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Translation
// ---------------------------------------------------------------------------

/// Reduce a notify event to one [`WatchEvent`] per affected path.
pub fn translate(event: &Event) -> Vec<WatchEvent> {
    let each = |operation: WatchOperation| -> Vec<WatchEvent> {
        event
            .paths
            .iter()
            .map(|path| WatchEvent::new(path.clone(), operation))
            .collect()
    };

    match &event.kind {
        EventKind::Create(_) => each(WatchOperation::Create),
        EventKind::Remove(_) => each(WatchOperation::Remove),
        EventKind::Modify(ModifyKind::Metadata(_)) => each(WatchOperation::Chmod),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => each(WatchOperation::Rename),
            RenameMode::To => each(WatchOperation::Create),
            RenameMode::Both => {
                let mut events = Vec::with_capacity(2);
                if let Some(from) = event.paths.first() {
                    events.push(WatchEvent::new(from.clone(), WatchOperation::Rename));
                }
                if let Some(to) = event.paths.get(1) {
                    events.push(WatchEvent::new(to.clone(), WatchOperation::Create));
                }
                events
            }
            // Backends that cannot tell the two sides apart.
            RenameMode::Any | RenameMode::Other => event
                .paths
                .iter()
                .map(|path| {
                    let operation = if path.symlink_metadata().is_ok() {
                        WatchOperation::Create
                    } else {
                        WatchOperation::Rename
                    };
                    WatchEvent::new(path.clone(), operation)
                })
                .collect(),
        },
        EventKind::Modify(_) => each(WatchOperation::Write),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

/// Merge consecutive events for the same path. A create absorbs the writes
/// that follow it; a removal is never merged with a write.
pub fn coalesce(events: Vec<WatchEvent>) -> Vec<WatchEvent> {
    let mut merged: Vec<WatchEvent> = Vec::with_capacity(events.len());
    for event in events {
        if let Some(last) = merged.last_mut() {
            if last.path == event.path && last.is_removal() == event.is_removal() {
                if event.is_create() {
                    last.operation = WatchOperation::Create;
                }
                continue;
            }
        }
        merged.push(event);
    }
    merged
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Directories under `dir` that deserve a watch: `dir` itself plus every
/// descendant that is neither hidden nor ignored by git.
pub fn collect_dirs(root: &Path, dir: &Path, git: &GitCli) -> Result<Vec<PathBuf>, DaemonError> {
    let mut dirs = vec![dir.to_path_buf()];
    let mut cursor = 0;
    while cursor < dirs.len() {
        let current = dirs[cursor].clone();
        cursor += 1;
        let entries = match fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(io_err(&current, err)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&current, e))?;
            let ty = entry.file_type().map_err(|e| io_err(entry.path(), e))?;
            if !ty.is_dir() {
                continue;
            }
            let path = entry.path();
            let Some(relative) = relative_path(root, &path) else {
                continue;
            };
            if is_ignored_path(&relative) {
                continue;
            }
            if git.is_ignored(&relative)? {
                tracing::trace!(path = %relative, "skipping git-ignored directory");
                continue;
            }
            dirs.push(path);
        }
    }
    Ok(dirs)
}

fn register_tree<W: Watcher>(
    watcher: &mut W,
    watched: &mut HashSet<PathBuf>,
    root: &Path,
    dir: &Path,
    git: &GitCli,
) -> Result<usize, DaemonError> {
    let mut added = 0;
    for dir in collect_dirs(root, dir, git)? {
        if !watched.insert(dir.clone()) {
            continue;
        }
        match watcher.watch(&dir, RecursiveMode::NonRecursive) {
            Ok(()) => added += 1,
            // Removed between listing and registration.
            Err(notify::Error {
                kind: notify::ErrorKind::PathNotFound,
                ..
            }) => {
                watched.remove(&dir);
            }
            Err(err) => return Err(err.into()),
        }
        tracing::trace!(path = %dir.display(), "watching directory");
    }
    Ok(added)
}

/// Drop `path` and everything below it from the watched set, so a directory
/// recreated under the same name gets registered again.
fn forget_tree(watched: &mut HashSet<PathBuf>, path: &Path) -> Vec<PathBuf> {
    let gone: Vec<PathBuf> = watched
        .iter()
        .filter(|dir| dir.starts_with(path))
        .cloned()
        .collect();
    for dir in &gone {
        watched.remove(dir);
    }
    gone
}

// ---------------------------------------------------------------------------
// Event handling
// ---------------------------------------------------------------------------

/// What a single event led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    Ignored,
    Deleted(String),
    Patched(String),
    /// New file that has no content yet.
    Skipped(String),
    /// A directory appeared; its content is only reachable through a full sync.
    NewDirectory(PathBuf),
}

/// Turns one [`WatchEvent`] into remote calls. Blocking.
#[derive(Clone)]
pub struct EventHandler {
    git: GitCli,
    remote: RemoteApi,
    baseline: String,
    watermark: Arc<ResourceWatermark>,
    sink: Arc<dyn NotificationSink>,
    timeout: Duration,
}

impl EventHandler {
    pub fn new(
        dispatcher: &SyncDispatcher,
        baseline: impl Into<String>,
        watermark: Arc<ResourceWatermark>,
    ) -> Self {
        Self {
            git: dispatcher.git().clone(),
            remote: dispatcher.remote().clone(),
            baseline: baseline.into(),
            watermark,
            sink: dispatcher.sink(),
            timeout: dispatcher.config().base_timeout,
        }
    }

    pub fn root(&self) -> &Path {
        self.git.root()
    }

    pub fn handle(&self, event: &WatchEvent) -> Result<Handled, SyncError> {
        let Some(relative) = relative_path(self.root(), &event.path) else {
            return Ok(Handled::Ignored);
        };
        if is_ignored_path(&relative) || event.operation == WatchOperation::Chmod {
            return Ok(Handled::Ignored);
        }
        tracing::debug!(path = %relative, operation = ?event.operation, "file event");

        if event.is_removal() {
            return self.handle_removal(relative);
        }

        let metadata = match fs::metadata(&event.path) {
            Ok(metadata) => metadata,
            // Created and removed again before we got here.
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Handled::Ignored),
            Err(err) => {
                return Err(SyncError::Io {
                    path: event.path.clone(),
                    source: err,
                })
            }
        };
        if metadata.is_dir() {
            if self.git.is_ignored(&relative)? {
                return Ok(Handled::Ignored);
            }
            return Ok(Handled::NewDirectory(event.path.clone()));
        }

        self.handle_file(relative)
    }

    fn handle_removal(&self, relative: String) -> Result<Handled, SyncError> {
        tolerate_user_error(self.remote.delete_source(&relative, self.timeout))?;
        if is_base_definition(&relative) {
            tolerate_user_error(self.remote.parse_base_components())?;
        }
        self.watermark.mark_dirty();
        self.sink.notify(Notification::LocalFileChanged {
            path: relative.clone(),
        });
        Ok(Handled::Deleted(relative))
    }

    fn handle_file(&self, relative: String) -> Result<Handled, SyncError> {
        self.sink.notify(Notification::LocalFileChanged {
            path: relative.clone(),
        });
        // Keyed on git, not on the event kind: editors that save by
        // write-then-rename report a create for a file git already tracks.
        let is_new = !self.git.is_tracked(&relative)?;
        let patch = match patch::build(&self.git, &self.baseline, &relative, is_new)? {
            PatchOutcome::Ready(patch) => patch,
            PatchOutcome::EmptyNewFile { .. } => return Ok(Handled::Skipped(relative)),
        };
        if patch.is_empty() {
            tracing::debug!(path = %relative, "patch is empty, all changes were undone");
        }

        self.remote.send_patch(&patch, self.timeout)?;
        if is_base_definition(&relative) {
            tracing::debug!(path = %relative, "base component changed");
            tolerate_user_error(self.remote.parse_base_components())?;
        }
        self.remote.parse_component(&relative)?;
        self.watermark.mark_dirty();
        self.sink.notify(Notification::RemoteFileProcessed {
            path: relative.clone(),
        });
        Ok(Handled::Patched(relative))
    }
}

fn tolerate_user_error(result: Result<(), SyncError>) -> Result<(), SyncError> {
    match result {
        Err(err) if err.is_user_error() => {
            tracing::warn!(error = %err, "remote rejected request");
            Ok(())
        }
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// Sequential consumer of filesystem events for one repository.
pub struct SyncWatcher {
    handler: EventHandler,
    dispatcher: SyncDispatcher,
}

impl SyncWatcher {
    pub fn new(handler: EventHandler, dispatcher: SyncDispatcher) -> Self {
        Self {
            handler,
            dispatcher,
        }
    }

    /// Watch until `shutdown` fires or a fatal error occurs.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<(), DaemonError> {
        let root = self.handler.root().to_path_buf();
        let git = self.handler.git.clone();

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = recommended_watcher(move |event| {
            let _ = event_tx.send(event);
        })?;
        let mut watched = HashSet::new();
        let added = register_tree(&mut watcher, &mut watched, &root, &root, &git)?;
        tracing::info!(directories = added, "watching for changes");

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                event = event_rx.recv() => {
                    let Some(event) = event else {
                        return Err(DaemonError::ChannelClosed("watch events"));
                    };
                    let mut events = Vec::new();
                    push_translated(&mut events, event);
                    tokio::time::sleep(COALESCE_WINDOW).await;
                    while let Ok(next) = event_rx.try_recv() {
                        push_translated(&mut events, next);
                    }

                    for event in coalesce(events) {
                        if event.is_removal() {
                            for dir in forget_tree(&mut watched, &event.path) {
                                // The OS usually dropped the watch already.
                                let _ = watcher.unwatch(&dir);
                                tracing::trace!(path = %dir.display(), "stopped watching directory");
                            }
                        }
                        if let Some(dir) = self.process(event).await? {
                            self.resync().await?;
                            let added = register_tree(&mut watcher, &mut watched, &root, &dir, &git)?;
                            tracing::debug!(path = %dir.display(), directories = added, "watching new directory");
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Handle one event; returns a directory that still needs a full sync.
    async fn process(&self, event: WatchEvent) -> Result<Option<PathBuf>, DaemonError> {
        let handler = self.handler.clone();
        let outcome = tokio::task::spawn_blocking(move || handler.handle(&event))
            .await
            .map_err(|err| DaemonError::Task {
                task: "event handler",
                message: err.to_string(),
            })?;

        match outcome {
            Ok(Handled::NewDirectory(dir)) => return Ok(Some(dir)),
            Ok(Handled::Patched(path)) => tracing::info!(path = %path, "synced"),
            Ok(Handled::Deleted(path)) => tracing::info!(path = %path, "removed"),
            Ok(Handled::Skipped(path)) => {
                tracing::debug!(path = %path, "new file has no content yet")
            }
            Ok(Handled::Ignored) => {}
            Err(err) if err.is_user_error() => {
                tracing::warn!(error = %err, "change not applied");
                self.handler.sink.notify(Notification::Error {
                    message: err.to_string(),
                });
            }
            Err(err) => {
                tracing::error!(error = %err, "stopping watcher");
                return Err(err.into());
            }
        }
        Ok(None)
    }

    async fn resync(&self) -> Result<(), DaemonError> {
        match confetti_sync::sync_all(&self.dispatcher, &self.handler.baseline).await {
            Ok(paths) => {
                tracing::info!(files = paths.len(), "synced new directory");
                self.handler.watermark.mark_dirty();
                Ok(())
            }
            Err(err) if err.is_user_error() => {
                tracing::warn!(error = %err, "new directory not synced");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn push_translated(events: &mut Vec<WatchEvent>, event: notify::Result<Event>) {
    match event {
        Ok(event) => events.extend(translate(&event)),
        Err(err) => tracing::warn!(error = %err, "watcher event error"),
    }
}

#[cfg(test)]
mod tests {
    use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind, RemoveKind};

    use super::*;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |e, p| e.add_path(PathBuf::from(p)))
    }

    fn ops(events: &[WatchEvent]) -> Vec<(&str, WatchOperation)> {
        events
            .iter()
            .map(|e| (e.path.to_str().unwrap_or_default(), e.operation))
            .collect()
    }

    #[test]
    fn translates_notify_kinds() {
        let cases = [
            (EventKind::Create(CreateKind::File), WatchOperation::Create),
            (
                EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                WatchOperation::Write,
            ),
            (EventKind::Modify(ModifyKind::Any), WatchOperation::Write),
            (
                EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
                WatchOperation::Chmod,
            ),
            (
                EventKind::Modify(ModifyKind::Name(RenameMode::From)),
                WatchOperation::Rename,
            ),
            (
                EventKind::Modify(ModifyKind::Name(RenameMode::To)),
                WatchOperation::Create,
            ),
            (EventKind::Remove(RemoveKind::File), WatchOperation::Remove),
        ];
        for (kind, expected) in cases {
            let label = format!("{kind:?}");
            let translated = translate(&event(kind, &["/r/a.txt"]));
            assert_eq!(ops(&translated), vec![("/r/a.txt", expected)], "{label}");
        }
    }

    #[test]
    fn rename_both_becomes_removal_then_create() {
        let translated = translate(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/r/old.php", "/r/new.php"],
        ));
        assert_eq!(
            ops(&translated),
            vec![
                ("/r/old.php", WatchOperation::Rename),
                ("/r/new.php", WatchOperation::Create)
            ]
        );
    }

    #[test]
    fn access_events_are_dropped() {
        assert!(translate(&event(EventKind::Access(AccessKind::Any), &["/r/a.txt"])).is_empty());
    }

    #[test]
    fn coalesce_merges_bursts_per_path() {
        let events = vec![
            WatchEvent::new("/r/a.txt", WatchOperation::Create),
            WatchEvent::new("/r/a.txt", WatchOperation::Write),
            WatchEvent::new("/r/a.txt", WatchOperation::Write),
            WatchEvent::new("/r/b.txt", WatchOperation::Write),
            WatchEvent::new("/r/b.txt", WatchOperation::Remove),
            WatchEvent::new("/r/b.txt", WatchOperation::Rename),
            WatchEvent::new("/r/a.txt", WatchOperation::Write),
        ];
        assert_eq!(
            ops(&coalesce(events)),
            vec![
                ("/r/a.txt", WatchOperation::Create),
                ("/r/b.txt", WatchOperation::Write),
                ("/r/b.txt", WatchOperation::Remove),
                ("/r/a.txt", WatchOperation::Write),
            ]
        );
    }

    #[test]
    fn forgetting_a_directory_drops_its_subtree_only() {
        let mut watched: HashSet<PathBuf> = ["/r", "/r/sub", "/r/sub/deep", "/r/subway"]
            .iter()
            .map(PathBuf::from)
            .collect();
        let mut gone = forget_tree(&mut watched, Path::new("/r/sub"));
        gone.sort();
        assert_eq!(gone, vec![PathBuf::from("/r/sub"), PathBuf::from("/r/sub/deep")]);
        assert!(watched.contains(Path::new("/r")));
        assert!(watched.contains(Path::new("/r/subway")));
        assert!(forget_tree(&mut watched, Path::new("/r/file.txt")).is_empty());
    }

    #[test]
    fn write_then_create_keeps_create() {
        let events = vec![
            WatchEvent::new("/r/a.txt", WatchOperation::Write),
            WatchEvent::new("/r/a.txt", WatchOperation::Create),
        ];
        assert_eq!(
            ops(&coalesce(events)),
            vec![("/r/a.txt", WatchOperation::Create)]
        );
    }
}
