// src/build/glob.rs

//! Item-spec globs anchored at a project directory.
//!
//! A glob such as `src/**/Generated/*.cs` splits into a fixed directory
//! (`<project>/src`), a wildcard directory part (`**/Generated`) and a file
//! name part (`*.cs`). Two globs with the same three parts match the same
//! set of paths.

use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};

use crate::watch::path_utils::{absolutize, path_key, PATH_COMPARISON_IGNORE_CASE};

const WILDCARD_CHARS: &[char] = &['*', '?', '['];

/// Structural identity of a glob.
pub type GlobKey = (PathBuf, String, String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobParts {
    pub fixed_directory: PathBuf,
    pub wildcard_directory: String,
    pub file_name: String,
}

pub fn has_wildcard(spec: &str) -> bool {
    spec.contains(WILDCARD_CHARS)
}

/// Split `spec` into its structural parts, anchored at `base_dir`.
///
/// Returns `None` for specs that cannot be used as a glob: empty specs and
/// specs that climb (`..`) after a wildcard.
pub fn split_glob(base_dir: &Path, spec: &str) -> Option<GlobParts> {
    let spec = spec.trim().replace('\\', "/");
    if spec.is_empty() {
        return None;
    }

    let segments: Vec<&str> = spec.split('/').filter(|s| !s.is_empty()).collect();
    let (last, dirs) = segments.split_last()?;
    let first_wildcard = segments.iter().position(|s| has_wildcard(s));

    let (fixed, wildcard, file_name): (&[&str], &[&str], String) = match first_wildcard {
        None => (dirs, &[], (*last).to_string()),
        Some(first) if *last == "**" => (&segments[..first], &segments[first..], "*".to_string()),
        Some(first) if first == segments.len() - 1 => (dirs, &[], (*last).to_string()),
        Some(first) => (&segments[..first], &segments[first..segments.len() - 1], (*last).to_string()),
    };

    if wildcard.iter().any(|s| *s == "..") || file_name == ".." {
        return None;
    }

    let mut fixed_rel = PathBuf::new();
    for segment in fixed {
        fixed_rel.push(segment);
    }
    // Keep absolute specs absolute.
    let fixed_rel = if spec.starts_with('/') {
        Path::new("/").join(fixed_rel)
    } else {
        fixed_rel
    };

    Some(GlobParts {
        fixed_directory: absolutize(base_dir, &fixed_rel),
        wildcard_directory: wildcard.join("/"),
        file_name,
    })
}

impl GlobParts {
    pub fn key(&self) -> GlobKey {
        let fold = |s: &str| {
            if PATH_COMPARISON_IGNORE_CASE {
                s.to_lowercase()
            } else {
                s.to_string()
            }
        };
        (
            path_key(&self.fixed_directory),
            fold(&self.wildcard_directory),
            fold(&self.file_name),
        )
    }

    /// Absolute glob pattern with forward slashes.
    pub fn pattern(&self) -> String {
        let fixed = self.fixed_directory.to_string_lossy().replace('\\', "/");
        let mut pattern = globset::escape(fixed.trim_end_matches('/'));
        if !self.wildcard_directory.is_empty() {
            pattern.push('/');
            pattern.push_str(&self.wildcard_directory);
        }
        pattern.push('/');
        pattern.push_str(&self.file_name);
        pattern
    }

    pub fn compile(&self) -> Result<GlobMatcher, globset::Error> {
        let glob = GlobBuilder::new(&self.pattern())
            .literal_separator(true)
            .case_insensitive(PATH_COMPARISON_IGNORE_CASE)
            .build()?;
        Ok(glob.compile_matcher())
    }
}

/// Match an absolute path against a compiled absolute glob.
pub fn matches(matcher: &GlobMatcher, path: &Path) -> bool {
    matcher.is_match(path.to_string_lossy().replace('\\', "/"))
}
