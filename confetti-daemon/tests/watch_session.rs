mod common;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use common::Repo;
use confetti_daemon::{
    DaemonError, EventHandler, ReconcilerConfig, ResourceWatermark, Session, SyncWatcher,
};
use confetti_sync::dispatch::DispatchConfig;
use confetti_sync::transport::Method;
use confetti_sync::{Notification, RecordingTransport, SyncError};
use tokio::sync::broadcast;

async fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    done()
}

#[tokio::test]
async fn session_resolves_services_and_repository() {
    let repo = Repo::project();
    let transport = Arc::new(RecordingTransport::new());
    let session = Session::with_transport(repo.path(), None, transport, DispatchConfig::default())
        .expect("session");

    assert_eq!(session.repository(), "acme/site");
    assert_eq!(session.environment().key, "dev");
    assert_eq!(session.baseline(), "");
    assert_eq!(
        session.dispatcher().remote().parser_url(),
        "http://api.localhost/parser"
    );
}

#[tokio::test]
async fn session_sync_all_pushes_then_parses() {
    let repo = Repo::project();
    repo.write("views/home.blade.php", "<h1>home</h1>\n");
    let transport = Arc::new(RecordingTransport::new());
    let session =
        Session::with_transport(repo.path(), None, transport.clone(), DispatchConfig::default())
            .expect("session");
    let mut notifications = session.subscribe();

    let synced = session.sync_all().await.expect("sync");
    assert_eq!(synced, vec!["app_config.yaml", "views/home.blade.php"]);

    let mut changed = Vec::new();
    while let Ok(notification) = notifications.try_recv() {
        if let Notification::LocalFileChanged { path } = notification {
            changed.push(path);
        }
    }
    changed.sort();
    assert_eq!(changed, vec!["app_config.yaml", "views/home.blade.php"]);

    let patches = transport.requests_with(Method::Patch);
    assert_eq!(patches.len(), 2);
    assert!(patches
        .iter()
        .all(|r| r.url == "http://api.localhost/parser/source"));

    let posts: Vec<String> = transport
        .requests_with(Method::Post)
        .into_iter()
        .map(|r| r.url)
        .collect();
    assert_eq!(
        posts,
        vec![
            "http://api.localhost/parser/parse_base_components",
            "http://api.localhost/parser/parse_component",
            "http://api.localhost/parser/parse_component",
        ]
    );
}

#[tokio::test]
async fn session_sync_all_aborts_on_too_many_changes() {
    let repo = Repo::project();
    repo.write("a.txt", "a\n");
    let transport = Arc::new(RecordingTransport::new());
    let config = DispatchConfig {
        max_changes: 1,
        ..DispatchConfig::default()
    };
    let session =
        Session::with_transport(repo.path(), None, transport.clone(), config).expect("session");

    let err = session.sync_all().await.expect_err("too many");
    assert!(matches!(
        err,
        DaemonError::Sync(SyncError::TooManyChanges { count: 2, max: 1 })
    ));
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn missing_git_directory_is_rejected() {
    let dir = tempfile::TempDir::new().expect("dir");
    let transport = Arc::new(RecordingTransport::new());
    let result = Session::with_transport(dir.path(), None, transport, DispatchConfig::default());
    assert!(matches!(result, Err(DaemonError::NotARepository { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn watcher_pushes_modified_file() {
    let repo = Repo::init();
    repo.write("a.txt", "x\n");
    let head = repo.commit_all("initial");
    let root = fs::canonicalize(repo.path()).expect("canonical root");
    let transport = Arc::new(RecordingTransport::new());
    let remote = confetti_sync::RemoteApi::new(transport.clone(), "http://p.test", "http://r.test");
    let dispatcher = confetti_sync::SyncDispatcher::new(
        confetti_sync::GitCli::new(&root),
        remote,
        DispatchConfig::default(),
    );
    let watermark = Arc::new(ResourceWatermark::new(None));
    let handler = EventHandler::new(&dispatcher, head, watermark.clone());

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let watch = tokio::spawn(SyncWatcher::new(handler, dispatcher).run(shutdown_rx));
    tokio::time::sleep(Duration::from_millis(300)).await;

    fs::write(root.join("a.txt"), "xy\n").expect("modify");
    let pushed = wait_for(|| !transport.requests_with(Method::Patch).is_empty()).await;
    shutdown_tx.send(()).expect("shutdown");
    watch.await.expect("join").expect("watcher result");

    assert!(pushed, "no patch was sent");
    for request in transport.requests_with(Method::Patch) {
        let body = request.body.expect("body");
        assert_eq!(body["path"], "a.txt");
        assert!(body["patch"].as_str().expect("patch").contains("+xy"));
    }
    assert!(watermark.is_dirty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn recreated_directory_is_watched_again() {
    let repo = Repo::init();
    repo.write("sub/a.txt", "a\n");
    let head = repo.commit_all("initial");
    let root = fs::canonicalize(repo.path()).expect("canonical root");
    let transport = Arc::new(RecordingTransport::new());
    let remote = confetti_sync::RemoteApi::new(transport.clone(), "http://p.test", "http://r.test");
    let dispatcher = confetti_sync::SyncDispatcher::new(
        confetti_sync::GitCli::new(&root),
        remote,
        DispatchConfig::default(),
    );
    let handler = EventHandler::new(&dispatcher, head, Arc::new(ResourceWatermark::new(None)));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let watch = tokio::spawn(SyncWatcher::new(handler, dispatcher).run(shutdown_rx));
    tokio::time::sleep(Duration::from_millis(300)).await;

    fs::remove_dir_all(root.join("sub")).expect("remove dir");
    tokio::time::sleep(Duration::from_millis(300)).await;
    fs::create_dir(root.join("sub")).expect("recreate dir");
    tokio::time::sleep(Duration::from_millis(800)).await;
    fs::write(root.join("sub/b.txt"), "b\n").expect("write in recreated dir");

    let patched = wait_for(|| {
        transport
            .requests_with(Method::Patch)
            .iter()
            .any(|r| r.body.as_ref().map(|b| b["path"] == "sub/b.txt").unwrap_or(false))
    })
    .await;
    shutdown_tx.send(()).expect("shutdown");
    watch.await.expect("join").expect("watcher result");

    assert!(patched, "file in recreated directory was never sent");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn watch_with_reset_wipes_cache_and_checks_out() {
    let repo = Repo::project();
    repo.write(".confetti/Components/old.php", "<?php\n");
    repo.write(".gitignore", ".confetti/\n");
    repo.commit_all("initial");
    let transport = Arc::new(RecordingTransport::with_responder(|request| {
        if request.url.ends_with("/resources") {
            Ok("[]".to_string())
        } else {
            Ok(String::new())
        }
    }));
    let session =
        Session::with_transport(repo.path(), None, transport.clone(), DispatchConfig::default())
            .expect("session");
    let reconciler = ReconcilerConfig {
        idle_interval: Duration::from_millis(10),
        retry_delay: Duration::from_millis(10),
        follow_up_polls: 1,
        follow_up_interval: Duration::from_millis(10),
    };

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let watch = tokio::spawn(session.watch(true, reconciler, shutdown_rx));
    let listed = wait_for(|| {
        transport
            .requests_with(Method::Get)
            .iter()
            .any(|r| r.url.ends_with("/resources"))
    })
    .await;
    shutdown_tx.send(()).expect("shutdown");
    watch.await.expect("join").expect("watch result");

    assert!(listed, "resources were never listed");
    assert!(!repo.file(".confetti/Components").exists());

    let checkout = &transport.requests_with(Method::Put)[0];
    assert!(checkout.url.ends_with("/checkout"));
    assert_eq!(checkout.body.as_ref().expect("body")["reset"], true);
}
