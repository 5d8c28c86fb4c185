//! Thin wrapper over the `git` command line.
//!
//! Only the text output of a handful of plumbing/porcelain commands is
//! relied upon; parsing lives in [`crate::status`] and [`crate::patch`].

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use regex::Regex;

use crate::error::{io_err, SyncError};

/// A git working tree rooted at `root`.
#[derive(Debug, Clone)]
pub struct GitCli {
    root: PathBuf,
}

impl GitCli {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run git and return stdout; any non-zero exit is an error.
    pub fn run(&self, args: &[&str]) -> Result<String, SyncError> {
        self.run_accepting(args, &[0])
    }

    /// Run git and accept the listed exit codes as success.
    pub fn run_accepting(&self, args: &[&str], ok_codes: &[i32]) -> Result<String, SyncError> {
        let output = self.output(args)?;
        let code = output.status.code().unwrap_or(-1);
        if !ok_codes.contains(&code) {
            return Err(git_failure(args, &output));
        }
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        tracing::trace!(
            command = %args.join(" "),
            output = %truncate(&stdout, 400),
            "git command finished",
        );
        Ok(stdout)
    }

    fn output(&self, args: &[&str]) -> Result<Output, SyncError> {
        Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .map_err(|e| io_err(&self.root, e))
    }

    /// Newest commit known on `origin`; empty when there is no remote branch.
    pub fn remote_commit(&self) -> Result<String, SyncError> {
        let out = self.run(&[
            "for-each-ref",
            "refs/remotes/origin",
            "--count",
            "1",
            "--format",
            "%(objectname)",
        ])?;
        Ok(out.trim().to_string())
    }

    /// `org/repo` derived from `remote.origin.url`.
    pub fn repository_name(&self) -> Result<String, SyncError> {
        let url = self.run(&["config", "--get", "remote.origin.url"])?;
        parse_repository_name(url.trim()).ok_or_else(|| SyncError::Git {
            command: "config --get remote.origin.url".to_string(),
            message: format!("failed to parse repo name from url: '{}'", url.trim()),
        })
    }

    /// Whether git ignore rules exclude `relative` (a repository-relative path).
    pub fn is_ignored(&self, relative: &str) -> Result<bool, SyncError> {
        if relative.is_empty() {
            return Ok(false);
        }
        // check-ignore exits 1 when the path is not ignored.
        let out = self.run_accepting(&["check-ignore", "--", relative], &[0, 1])?;
        Ok(!out.trim().is_empty())
    }

    /// Whether `relative` is in the index.
    pub fn is_tracked(&self, relative: &str) -> Result<bool, SyncError> {
        let out = self.run(&["ls-files", "--", relative])?;
        Ok(!out.trim().is_empty())
    }

    pub fn diff_name_status(&self, baseline: &str) -> Result<String, SyncError> {
        let mut args = vec!["diff", "--name-status", "--find-renames"];
        if !baseline.is_empty() {
            args.push(baseline);
        }
        self.run(&args)
    }

    pub fn diff_staged_name_status(&self) -> Result<String, SyncError> {
        self.run(&["diff", "--name-status", "--find-renames", "--staged"])
    }

    pub fn untracked_files(&self) -> Result<String, SyncError> {
        self.run(&["ls-files", "--others", "--exclude-standard"])
    }

    pub fn status_porcelain_v2(&self) -> Result<String, SyncError> {
        self.run(&["status", "--porcelain=v2", "--untracked-files=all"])
    }

    /// Unified diff of one path against `baseline` (or the index when empty).
    pub fn diff_path(&self, baseline: &str, path: &str, binary: bool) -> Result<String, SyncError> {
        let mut args = vec!["diff"];
        if binary {
            args.push("--binary");
        }
        if !baseline.is_empty() {
            args.push(baseline);
        }
        args.extend(["--", path]);
        self.run(&args)
    }

    /// Full-content addition patch of `path` against the null source.
    pub fn diff_new_file(&self, path: &str, binary: bool) -> Result<String, SyncError> {
        let mut args = vec!["diff", "--no-index"];
        if binary {
            args.push("--binary");
        }
        args.extend(["--", "/dev/null", path]);
        // --no-index exits 1 when the inputs differ.
        self.run_accepting(&args, &[0, 1])
    }
}

/// Parse `git@host:org/repo.git` or `https://host/org/repo.git` into `org/repo`.
pub fn parse_repository_name(url: &str) -> Option<String> {
    let re = Regex::new(r"([^/:]*/[^/]*)\.git$").ok()?;
    re.captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn git_failure(args: &[&str], output: &Output) -> SyncError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let first_line = stderr.lines().next().unwrap_or_default().to_string();
    SyncError::Git {
        command: args.join(" "),
        message: if first_line.is_empty() {
            format!("exit status {}", output.status)
        } else {
            first_line
        },
    }
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}(...)", &text[..idx]),
        None => text.to_string(),
    }
}
