//! Domain types for change detection and synchronisation.
//!
//! Paths inside [`Change`] and [`Patch`] are repository-relative strings with
//! `/` separators, exactly as git prints them. [`WatchEvent`] carries the
//! absolute path reported by the filesystem watcher.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Status letter of one side (staged or unstaged) of a git change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GitStatus {
    #[default]
    Unchanged,
    Untracked,
    Added,
    Modified,
    Deleted,
    Renamed,
    Copied,
    ChangeType,
    Unmerged,
}

impl GitStatus {
    /// Map a git status letter (`M`, `A`, `D`, `R`, `C`, `T`, `U`, `?`, `.`).
    pub fn from_code(code: char) -> Option<Self> {
        match code {
            '.' | ' ' => Some(GitStatus::Unchanged),
            '?' => Some(GitStatus::Untracked),
            'A' => Some(GitStatus::Added),
            'M' => Some(GitStatus::Modified),
            'D' => Some(GitStatus::Deleted),
            'R' => Some(GitStatus::Renamed),
            'C' => Some(GitStatus::Copied),
            'T' => Some(GitStatus::ChangeType),
            'U' | 'X' => Some(GitStatus::Unmerged),
            _ => None,
        }
    }

    pub fn code(self) -> char {
        match self {
            GitStatus::Unchanged => '.',
            GitStatus::Untracked => '?',
            GitStatus::Added => 'A',
            GitStatus::Modified => 'M',
            GitStatus::Deleted => 'D',
            GitStatus::Renamed => 'R',
            GitStatus::Copied => 'C',
            GitStatus::ChangeType => 'T',
            GitStatus::Unmerged => 'U',
        }
    }
}

impl fmt::Display for GitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GitStatus::Unchanged => "unchanged",
            GitStatus::Untracked => "untracked",
            GitStatus::Added => "added",
            GitStatus::Modified => "modified",
            GitStatus::Deleted => "deleted",
            GitStatus::Renamed => "renamed",
            GitStatus::Copied => "copied",
            GitStatus::ChangeType => "changetype",
            GitStatus::Unmerged => "unmerged",
        };
        f.write_str(label)
    }
}

/// Low-level filesystem operation reported by the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchOperation {
    Create,
    Write,
    Remove,
    Rename,
    Chmod,
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// One file-level delta relative to the baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub path: String,
    /// Source path of a rename or copy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_path: Option<String>,
    pub staged_status: GitStatus,
    pub unstaged_status: GitStatus,
    /// Rename/copy confidence (0–100). Zero for every other status.
    #[serde(default)]
    pub similarity_score: u8,
}

impl Change {
    pub fn new(path: impl Into<String>, staged: GitStatus, unstaged: GitStatus) -> Self {
        Self {
            path: path.into(),
            from_path: None,
            staged_status: staged,
            unstaged_status: unstaged,
            similarity_score: 0,
        }
    }

    /// A file git does not know about yet.
    pub fn untracked(path: impl Into<String>) -> Self {
        Self::new(path, GitStatus::Added, GitStatus::Untracked)
    }

    pub fn is_rename(&self) -> bool {
        self.from_path.is_some()
            && (self.staged_status == GitStatus::Renamed
                || self.unstaged_status == GitStatus::Renamed)
    }

    pub fn is_deletion(&self) -> bool {
        self.staged_status == GitStatus::Deleted || self.unstaged_status == GitStatus::Deleted
    }

    /// True when the remote has never seen this path.
    pub fn is_new(&self) -> bool {
        [self.staged_status, self.unstaged_status]
            .iter()
            .any(|s| matches!(s, GitStatus::Added | GitStatus::Untracked | GitStatus::Copied))
    }

    /// The most significant status of the two sides, unstaged first.
    pub fn status(&self) -> GitStatus {
        if self.unstaged_status != GitStatus::Unchanged {
            self.unstaged_status
        } else {
            self.staged_status
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{} {}",
            self.staged_status.code(),
            self.unstaged_status.code(),
            self.path
        )?;
        if let Some(from) = &self.from_path {
            write!(f, " (from {from}, {}%)", self.similarity_score)?;
        }
        Ok(())
    }
}

/// Unified diff for a single path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub path: String,
    pub content: String,
    pub is_binary: bool,
    pub is_new_file: bool,
}

impl Patch {
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Raw filesystem notification, already reduced to one path and one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub operation: WatchOperation,
}

impl WatchEvent {
    pub fn new(path: impl Into<PathBuf>, operation: WatchOperation) -> Self {
        Self {
            path: path.into(),
            operation,
        }
    }

    /// Rename and remove both mean "this path is gone".
    pub fn is_removal(&self) -> bool {
        matches!(
            self.operation,
            WatchOperation::Remove | WatchOperation::Rename
        )
    }

    pub fn is_create(&self) -> bool {
        self.operation == WatchOperation::Create
    }
}

/// Changes collected in one pass, bounded by `max_changes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncBatch {
    changes: Vec<Change>,
    max_changes: usize,
}

impl SyncBatch {
    /// Build a batch, expanding every rename into a deletion of the source
    /// followed by the renamed path. Order is preserved.
    pub fn from_changes(changes: Vec<Change>, max_changes: usize) -> Self {
        let mut expanded = Vec::with_capacity(changes.len());
        for change in changes {
            if change.is_rename() {
                if let Some(from) = &change.from_path {
                    expanded.push(Change::new(
                        from.clone(),
                        GitStatus::Deleted,
                        GitStatus::Unchanged,
                    ));
                }
            }
            expanded.push(change);
        }
        Self {
            changes: expanded,
            max_changes,
        }
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn into_changes(self) -> Vec<Change> {
        self.changes
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn max_changes(&self) -> usize {
        self.max_changes
    }

    pub fn exceeds_cap(&self) -> bool {
        self.changes.len() > self.max_changes
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_roundtrip_through_letters() {
        for code in ['.', '?', 'A', 'M', 'D', 'R', 'C', 'T', 'U'] {
            let status = GitStatus::from_code(code).expect("known code");
            assert_eq!(status.code(), code);
        }
        assert_eq!(GitStatus::from_code('Z'), None);
    }

    #[test]
    fn rename_expands_into_delete_then_rename() {
        let mut rename = Change::new("b.txt", GitStatus::Renamed, GitStatus::Unchanged);
        rename.from_path = Some("a.txt".to_string());
        rename.similarity_score = 100;

        let batch = SyncBatch::from_changes(vec![rename.clone(), Change::untracked("c.txt")], 10);
        let paths: Vec<_> = batch.changes().iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, ["a.txt", "b.txt", "c.txt"]);
        assert!(batch.changes()[0].is_deletion());
        assert_eq!(batch.changes()[1], rename);
    }

    #[test]
    fn cap_counts_expanded_changes() {
        let mut rename = Change::new("b", GitStatus::Renamed, GitStatus::Unchanged);
        rename.from_path = Some("a".to_string());
        let batch = SyncBatch::from_changes(vec![rename], 1);
        assert_eq!(batch.len(), 2);
        assert!(batch.exceeds_cap());
    }

    #[test]
    fn untracked_change_is_new_and_not_deleted() {
        let change = Change::untracked("logo.svg");
        assert!(change.is_new());
        assert!(!change.is_deletion());
        assert_eq!(change.status(), GitStatus::Untracked);
        assert_eq!(change.to_string(), "A? logo.svg");
    }

    #[test]
    fn watch_event_classification() {
        assert!(WatchEvent::new("/x", WatchOperation::Rename).is_removal());
        assert!(WatchEvent::new("/x", WatchOperation::Remove).is_removal());
        assert!(!WatchEvent::new("/x", WatchOperation::Write).is_removal());
        assert!(WatchEvent::new("/x", WatchOperation::Create).is_create());
    }
}
