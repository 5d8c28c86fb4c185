use std::path::{Component, Path, PathBuf};

/// Hidden directory mirroring the remote-generated artifact tree.
pub const CACHE_DIR: &str = ".confetti";
pub const AUTH_TOKEN_FILE: &str = "auth_token.json";

/// Files with this suffix define base components other components extend.
pub const BASE_DEFINITION_SUFFIX: &str = "Component.php";

/// Artifact names ending in this suffix announce a deletion.
pub const REMOVED_SUFFIX: &str = ".removed";

pub fn cache_dir(root: &Path) -> PathBuf {
    root.join(CACHE_DIR)
}

pub fn auth_token_path(root: &Path) -> PathBuf {
    cache_dir(root).join(AUTH_TOKEN_FILE)
}

pub fn is_base_definition(path: &str) -> bool {
    path.ends_with(BASE_DEFINITION_SUFFIX)
}

/// Whether a repository-relative path must never be synced or watched:
/// the root itself, hidden files or directories, and editor swap/backup files.
pub fn is_ignored_path(path: &str) -> bool {
    if path.is_empty() || path == "/" {
        return true;
    }
    if path.starts_with('.') || path.contains("/.") {
        return true;
    }
    path.ends_with("swp") || path.ends_with('~')
}

/// Repository-relative path with `/` separators, or `None` outside `root`.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    Some(parts.join("/"))
}

/// Resolve an artifact name inside the cache directory, refusing names that
/// would escape it.
pub fn cache_target(root: &Path, name: &str) -> Option<PathBuf> {
    let relative = Path::new(name);
    if name.is_empty() || relative.is_absolute() {
        return None;
    }
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return None;
    }
    Some(cache_dir(root).join(relative))
}
