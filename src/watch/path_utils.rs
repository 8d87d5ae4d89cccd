// src/watch/path_utils.rs

//! Utility functions for path handling in the watcher.

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

/// Whether file paths compare case-insensitively on this platform.
pub const PATH_COMPARISON_IGNORE_CASE: bool = cfg!(any(windows, target_os = "macos"));

/// Key used for path lookups: the path itself on case-sensitive platforms,
/// a lower-cased copy elsewhere.
pub fn path_key(path: &Path) -> PathBuf {
    if PATH_COMPARISON_IGNORE_CASE {
        PathBuf::from(path.to_string_lossy().to_lowercase())
    } else {
        path.to_path_buf()
    }
}

pub fn paths_equal(a: &Path, b: &Path) -> bool {
    path_key(a) == path_key(b)
}

pub fn names_equal(a: &OsStr, b: &OsStr) -> bool {
    if PATH_COMPARISON_IGNORE_CASE {
        a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
    } else {
        a == b
    }
}

/// `path` equals `dir` or lies somewhere beneath it.
pub fn is_within(path: &Path, dir: &Path) -> bool {
    path_key(path).starts_with(path_key(dir))
}

/// Lexically normalise `path` against `base`: relative paths are joined onto
/// `base`, and `.` / `..` components are folded without touching the disk.
pub fn absolutize(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Directories containing `path`, innermost first.
pub fn containing_directories(path: &Path) -> impl Iterator<Item = &Path> {
    path.ancestors().skip(1).filter(|p| !p.as_os_str().is_empty())
}

/// First containing directory whose name starts with `.`.
pub fn hidden_containing_directory(path: &Path) -> Option<&Path> {
    containing_directories(path).find(|dir| {
        dir.file_name()
            .map(|name| name.to_string_lossy().starts_with('.'))
            .unwrap_or(false)
    })
}

/// Display `path` relative to `base` as `./sub/file`, or in full when it is
/// outside `base`.
pub fn display_relative(base: &Path, path: &Path) -> String {
    match path.strip_prefix(base) {
        Ok(rel) if !rel.as_os_str().is_empty() => {
            format!("./{}", rel.to_string_lossy().replace('\\', "/"))
        }
        _ => path.display().to_string(),
    }
}

/// Forward-slash relative path of `path` under `root`, if it is under it.
pub fn relative_str(root: &Path, path: &Path) -> Option<String> {
    path.strip_prefix(root)
        .ok()
        .map(|rel| rel.to_string_lossy().replace('\\', "/"))
}
