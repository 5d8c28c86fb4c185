//! Change detection: turn git status/diff output into [`Change`] records.
//!
//! Two modes exist:
//!
//! * [`changes_since`]: tracked changes relative to a baseline commit (or
//!   the index when there is none) plus untracked files. Used by every sync
//!   pass.
//! * [`local_status`]: the richer porcelain v2 view with separate staged and
//!   unstaged status letters, used before any baseline exists.
//!
//! Lines that do not match the expected grammar are skipped, never treated as
//! errors. Only invoking git can fail.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use confetti_core::paths::is_ignored_path;
use confetti_core::{Change, GitStatus};

use crate::error::SyncError;
use crate::git::GitCli;

/// Characters git may print in a path we are willing to sync.
const PATH: &str = r"[-_/0-9A-Za-z.]+";

/// Changes relative to `baseline`, untracked files last.
pub fn changes_since(git: &GitCli, baseline: &str) -> Result<Vec<Change>, SyncError> {
    let mut raw = git.diff_name_status(baseline)?;
    if baseline.is_empty() {
        raw.push('\n');
        raw.push_str(&git.diff_staged_name_status()?);
    }
    let mut changes = dedup_by_path(parse_name_status(&raw));
    changes.extend(parse_untracked_list(&git.untracked_files()?));
    Ok(filter_ignored(changes))
}

/// Porcelain v2 status of the working tree.
pub fn local_status(git: &GitCli) -> Result<Vec<Change>, SyncError> {
    let raw = git.status_porcelain_v2()?;
    Ok(filter_ignored(parse_porcelain_v2(&raw)))
}

/// Drop the root, hidden paths and editor swap/backup files.
pub fn filter_ignored(changes: Vec<Change>) -> Vec<Change> {
    changes
        .into_iter()
        .filter(|change| {
            let ignored = is_ignored_path(&change.path);
            if ignored {
                tracing::trace!(path = %change.path, "ignoring hidden or temporary path");
            }
            !ignored
        })
        .collect()
}

fn dedup_by_path(changes: Vec<Change>) -> Vec<Change> {
    let mut seen = HashSet::new();
    changes
        .into_iter()
        .filter(|c| seen.insert(c.path.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// Parsers
// ---------------------------------------------------------------------------

fn name_status_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"^(?P<status>[ACDMTUXR.])(?P<score>\d*)\s+(?P<path>{PATH})(?:\s+(?P<to_path>{PATH}))?\s*$"
        ))
        .expect("name-status pattern is valid")
    })
}

fn ordinary_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"^1 (?P<xy>[.MTADRCU]{{2}}) (?:\S+ ){{6}}(?P<path>{PATH})$"
        ))
        .expect("ordinary entry pattern is valid")
    })
}

fn renamed_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"^2 (?P<xy>[.MTADRCU]{{2}}) (?:\S+ ){{6}}[RC](?P<score>\d{{1,3}}) (?P<path>{PATH})\t(?P<from>{PATH})$"
        ))
        .expect("rename entry pattern is valid")
    })
}

fn unmerged_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"^u (?P<xy>[.MTADRCU]{{2}}) (?:\S+ ){{8}}(?P<path>{PATH})$"
        ))
        .expect("unmerged entry pattern is valid")
    })
}

fn untracked_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"^\? (?P<path>{PATH})$")).expect("untracked pattern is valid")
    })
}

/// Parse `git diff --name-status` output.
///
/// Renames and copies keep their source in `from_path`; the status is put on
/// the staged side.
pub fn parse_name_status(raw: &str) -> Vec<Change> {
    let re = name_status_re();
    let mut changes = Vec::new();
    for line in raw.lines() {
        let Some(caps) = re.captures(line) else {
            continue;
        };
        let Some(status) = caps["status"].chars().next().and_then(GitStatus::from_code) else {
            continue;
        };
        let path = caps["path"].to_string();
        let to_path = caps.name("to_path").map(|m| m.as_str().to_string());

        match (status, to_path) {
            (GitStatus::Renamed | GitStatus::Copied, Some(to_path)) => {
                let mut change = Change::new(to_path, status, GitStatus::Unchanged);
                change.from_path = Some(path);
                change.similarity_score = parse_score(&caps["score"]);
                changes.push(change);
            }
            (GitStatus::Renamed | GitStatus::Copied, None) => continue,
            (status, _) => changes.push(Change::new(path, status, GitStatus::Unchanged)),
        }
    }
    changes
}

/// Parse a plain list of paths (`git ls-files --others`) as untracked files.
pub fn parse_untracked_list(raw: &str) -> Vec<Change> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(Change::untracked)
        .collect()
}

/// Parse `git status --porcelain=v2` output.
pub fn parse_porcelain_v2(raw: &str) -> Vec<Change> {
    let mut changes = Vec::new();
    for line in raw.lines() {
        if let Some(caps) = ordinary_re().captures(line) {
            if let Some((staged, unstaged)) = parse_xy(&caps["xy"]) {
                changes.push(Change::new(&caps["path"], staged, unstaged));
            }
        } else if let Some(caps) = renamed_re().captures(line) {
            if let Some((staged, unstaged)) = parse_xy(&caps["xy"]) {
                let mut change = Change::new(&caps["path"], staged, unstaged);
                change.from_path = Some(caps["from"].to_string());
                change.similarity_score = parse_score(&caps["score"]);
                changes.push(change);
            }
        } else if let Some(caps) = unmerged_re().captures(line) {
            changes.push(Change::new(
                &caps["path"],
                GitStatus::Unmerged,
                GitStatus::Unmerged,
            ));
        } else if let Some(caps) = untracked_re().captures(line) {
            changes.push(Change::untracked(&caps["path"]));
        }
    }
    changes
}

fn parse_xy(xy: &str) -> Option<(GitStatus, GitStatus)> {
    let mut chars = xy.chars();
    let staged = GitStatus::from_code(chars.next()?)?;
    let unstaged = GitStatus::from_code(chars.next()?)?;
    Some((staged, unstaged))
}

fn parse_score(raw: &str) -> u8 {
    raw.parse::<u8>().map(|s| s.min(100)).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
