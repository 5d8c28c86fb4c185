#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use confetti_sync::dispatch::DispatchConfig;
use confetti_sync::{GitCli, RecordingTransport, RemoteApi, SyncDispatcher};
use tempfile::TempDir;

pub const APP_CONFIG: &str = r#"
environments:
  - key: dev
    run_on_localhost: true
    containers:
      - hosts: [office.localhost]
      - name: confetti-cms/parser
        hosts: [api.localhost]
        paths: [/parser]
      - name: confetti-cms/shared-resource
        hosts: [api.localhost]
        paths: [/resources-service]
"#;

pub struct Repo {
    pub dir: TempDir,
}

impl Repo {
    pub fn init() -> Self {
        let repo = Self {
            dir: TempDir::new().expect("tempdir"),
        };
        repo.run(&["init", "-q"]);
        repo.run(&["config", "user.email", "dev@example.com"]);
        repo.run(&["config", "user.name", "Dev"]);
        repo.run(&["config", "commit.gpgsign", "false"]);
        repo
    }

    /// A repository with an origin and an app config, ready for a session.
    pub fn project() -> Self {
        let repo = Self::init();
        repo.run(&["remote", "add", "origin", "git@github.com:acme/site.git"]);
        repo.write("app_config.yaml", APP_CONFIG);
        repo
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self, relative: &str) -> PathBuf {
        self.path().join(relative)
    }

    pub fn git(&self) -> GitCli {
        GitCli::new(self.path())
    }

    pub fn write(&self, relative: &str, contents: &str) {
        let full = self.file(relative);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(full, contents).expect("write file");
    }

    pub fn run(&self, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .expect("spawn git");
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).into_owned()
    }

    pub fn commit_all(&self, message: &str) -> String {
        self.run(&["add", "-A"]);
        self.run(&["commit", "-q", "-m", message]);
        self.run(&["rev-parse", "HEAD"]).trim().to_string()
    }

    pub fn dispatcher(&self, transport: Arc<RecordingTransport>) -> SyncDispatcher {
        let remote = RemoteApi::new(transport, "http://parser.test", "http://resources.test");
        SyncDispatcher::new(self.git(), remote, DispatchConfig::default())
    }
}
