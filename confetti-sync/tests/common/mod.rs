#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::process::Command;

use confetti_sync::GitCli;
use tempfile::TempDir;

/// Scratch git repository with a configured identity.
pub struct Repo {
    pub dir: TempDir,
    pub git: GitCli,
}

impl Repo {
    pub fn init() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let repo = Self {
            git: GitCli::new(dir.path()),
            dir,
        };
        repo.run(&["init", "-q"]);
        repo.run(&["config", "user.email", "dev@example.com"]);
        repo.run(&["config", "user.name", "Dev"]);
        repo.run(&["config", "commit.gpgsign", "false"]);
        repo
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, relative: &str, contents: &str) {
        let full = self.path().join(relative);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(full, contents).expect("write file");
    }

    pub fn remove(&self, relative: &str) {
        fs::remove_file(self.path().join(relative)).expect("remove file");
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

    /// Stage everything, commit, return the new HEAD.
    pub fn commit_all(&self, message: &str) -> String {
        self.run(&["add", "-A"]);
        self.run(&["commit", "-q", "-m", message]);
        self.run(&["rev-parse", "HEAD"]).trim().to_string()
    }
}

/// Twenty distinct lines, the first `changed` of them rewritten.
pub fn numbered_lines(changed: usize) -> String {
    (0..20)
        .map(|i| {
            if i < changed {
                format!("rewritten line {i} with other words\n")
            } else {
                format!("original line number {i} of the component\n")
            }
        })
        .collect()
}
