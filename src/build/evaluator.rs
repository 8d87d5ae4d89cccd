// src/build/evaluator.rs

//! The build-system seam.
//!
//! Everything the watcher knows about projects comes through
//! [`ProjectEvaluator`]. Production uses
//! [`ManifestEvaluator`](crate::build::manifest::ManifestEvaluator); tests
//! hand in a scripted fake.

use std::collections::BTreeMap;
use std::path::Path;

use crate::build::graph::{ProjectGraph, ProjectInstance};

pub trait ProjectEvaluator: Send + Sync {
    /// Load the graph rooted at `root_project`. `None` means the graph could
    /// not be loaded; the evaluator logs why.
    fn try_load_project_graph(
        &self,
        root_project: &Path,
        global_properties: &BTreeMap<String, String>,
    ) -> Option<ProjectGraph>;

    /// Run `targets` on `instance`, populating its items. Returns whether every
    /// target succeeded.
    fn build(&self, instance: &mut ProjectInstance, targets: &[&str]) -> bool;
}
