//! Patch synthesis for a single path.
//!
//! A tracked diff against the baseline is tried first. A file flagged as new
//! whose tracked diff is empty (it is untracked) falls back to a full-content
//! addition patch. An addition patch that is still empty means the editor
//! created the file and has not written it yet; that is reported as
//! [`PatchOutcome::EmptyNewFile`], never as an error and never as "no change".

use std::io::ErrorKind;

use similar::TextDiff;

use confetti_core::Patch;

use crate::error::{io_err, SyncError};
use crate::git::GitCli;

/// Extensions diffed as text. Everything else is diffed with `--binary`.
const TEXT_EXTENSIONS: &[&str] = &[
    "php", "html", "htm", "css", "scss", "sass", "less", "js", "mjs", "cjs", "ts", "tsx", "jsx",
    "vue", "json", "json5", "md", "txt", "xml", "svg", "yml", "yaml", "toml", "ini", "env", "csv",
    "sql", "sh", "conf", "lock", "twig", "blade",
];

/// Result of building a patch for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    Ready(Patch),
    /// The file is new and has no content yet.
    EmptyNewFile { path: String },
}

pub fn is_textual(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => TEXT_EXTENSIONS
            .iter()
            .any(|known| known.eq_ignore_ascii_case(ext)),
        _ => false,
    }
}

/// Build the patch for `path` relative to `baseline`.
pub fn build(
    git: &GitCli,
    baseline: &str,
    path: &str,
    is_new: bool,
) -> Result<PatchOutcome, SyncError> {
    let is_binary = !is_textual(path);
    let content = git.diff_path(baseline, path, is_binary)?;
    if !content.is_empty() || !is_new {
        return Ok(PatchOutcome::Ready(Patch {
            path: path.to_string(),
            content,
            is_binary,
            is_new_file: is_new,
        }));
    }

    let content = if is_empty_on_disk(git, path)? {
        String::new()
    } else if is_binary {
        git.diff_new_file(path, true)?
    } else {
        match new_text_file_patch(git, path)? {
            Some(content) => content,
            // Not valid UTF-8 despite the extension: let git encode it.
            None => git.diff_new_file(path, true)?,
        }
    };

    if content.is_empty() {
        tracing::debug!(path, "new file has no content yet, skipping patch");
        return Ok(PatchOutcome::EmptyNewFile {
            path: path.to_string(),
        });
    }

    Ok(PatchOutcome::Ready(Patch {
        path: path.to_string(),
        content,
        is_binary,
        is_new_file: true,
    }))
}

/// A missing file counts as empty: it was removed before we got to it.
fn is_empty_on_disk(git: &GitCli, path: &str) -> Result<bool, SyncError> {
    let full = git.root().join(path);
    match std::fs::metadata(&full) {
        Ok(meta) => Ok(meta.len() == 0),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(true),
        Err(err) => Err(io_err(&full, err)),
    }
}

/// Addition patch for a text file, in `git diff` layout.
///
/// Returns `Ok(None)` when the file is not UTF-8, and an empty string when it
/// vanished or was truncated since the size check.
fn new_text_file_patch(git: &GitCli, path: &str) -> Result<Option<String>, SyncError> {
    let full = git.root().join(path);
    let bytes = match std::fs::read(&full) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Some(String::new())),
        Err(err) => return Err(io_err(&full, err)),
    };
    let Ok(text) = String::from_utf8(bytes) else {
        return Ok(None);
    };
    if text.is_empty() {
        return Ok(Some(String::new()));
    }

    let new_header = format!("b/{path}");
    let unified = TextDiff::from_lines("", text.as_str())
        .unified_diff()
        .header("/dev/null", &new_header)
        .context_radius(3)
        .to_string();
    Ok(Some(format!(
        "diff --git a/{path} b/{path}\nnew file mode 100644\n{unified}"
    )))
}
