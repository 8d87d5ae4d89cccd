// src/build/exclusions.rs

//! Decides which reported changes are build noise.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use globset::GlobMatcher;
use tracing::debug;

use crate::build::glob::{matches, split_glob, GlobKey};
use crate::build::graph::{property_names, ProjectGraph, ProjectInstance};
use crate::report::{messages, Reporter};
use crate::types::ChangeKind;
use crate::watch::path_utils::{is_within, path_key};

#[derive(Debug, Clone)]
pub struct ExclusionGlob {
    pub key: GlobKey,
    pub raw: String,
    pub project_directory: PathBuf,
    matcher: GlobMatcher,
}

/// Output directories plus `DefaultItemExcludes` globs from every project.
///
/// Globs are kept once per structural key; the first project to register a
/// key owns it.
#[derive(Debug, Clone, Default)]
pub struct FilePathExclusions {
    globs: Vec<ExclusionGlob>,
    output_directories: Vec<PathBuf>,
}

impl FilePathExclusions {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_graph(graph: &ProjectGraph) -> Self {
        let mut exclusions = Self::empty();
        let mut keys = HashSet::new();

        for node in graph.nodes() {
            exclusions.add_project(&node.instance, &mut keys);
        }

        debug!(
            globs = exclusions.globs.len(),
            output_directories = exclusions.output_directories.len(),
            "item exclusions computed"
        );
        exclusions
    }

    fn add_project(&mut self, project: &ProjectInstance, keys: &mut HashSet<GlobKey>) {
        let project_dir = project.directory();

        if project.default_items_enabled() {
            for raw in project.property_list(property_names::DEFAULT_ITEM_EXCLUDES) {
                let Some(parts) = split_glob(project_dir, &raw) else {
                    debug!(glob = %raw, "skipping illegal exclusion glob");
                    continue;
                };
                let key = parts.key();
                if keys.contains(&key) {
                    continue;
                }
                match parts.compile() {
                    Ok(matcher) => {
                        keys.insert(key.clone());
                        self.globs.push(ExclusionGlob {
                            key,
                            raw,
                            project_directory: project_dir.to_path_buf(),
                            matcher,
                        });
                    }
                    Err(err) => debug!(glob = %raw, error = %err, "skipping exclusion glob"),
                }
            }
        } else {
            // No reliable glob without default items; exclude build output wholesale.
            for dir in [project.output_directory(), project.intermediate_output_directory()]
                .into_iter()
                .flatten()
            {
                self.add_output_directory(dir);
            }
        }
    }

    pub fn add_output_directory(&mut self, dir: PathBuf) {
        if !self.output_directories.iter().any(|d| path_key(d) == path_key(&dir)) {
            self.output_directories.push(dir);
        }
    }

    pub fn globs(&self) -> &[ExclusionGlob] {
        &self.globs
    }

    pub fn output_directories(&self) -> &[PathBuf] {
        &self.output_directories
    }

    pub fn is_empty(&self) -> bool {
        self.globs.is_empty() && self.output_directories.is_empty()
    }

    /// Whether a change at `path` should be ignored. Reports the reason.
    pub fn is_excluded(&self, path: &Path, kind: ChangeKind, reporter: &dyn Reporter) -> bool {
        if self.output_directories.iter().any(|dir| is_within(path, dir)) {
            reporter.report(
                &messages::IGNORING_CHANGE_IN_OUTPUT_DIRECTORY,
                &[&kind, &path.display()],
            );
            return true;
        }

        if let Some(glob) = self.globs.iter().find(|g| matches(&g.matcher, path)) {
            reporter.report(
                &messages::IGNORING_CHANGE_IN_EXCLUDED_FILE,
                &[
                    &path.display(),
                    &kind,
                    &property_names::DEFAULT_ITEM_EXCLUDES,
                    &glob.raw,
                    &glob.project_directory.display(),
                ],
            );
            return true;
        }

        false
    }
}
