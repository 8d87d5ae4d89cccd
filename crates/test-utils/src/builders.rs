#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use devwatch::build::evaluation::{EvaluationResult, FileSetBuilder};
use devwatch::build::graph::{property_names, NodeIndex, ProjectGraph, ProjectInstance, ProjectItem};

/// Builder for `ProjectInstance` to simplify test setup.
pub struct ProjectBuilder {
    instance: ProjectInstance,
}

impl ProjectBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            instance: ProjectInstance::new(path),
        }
    }

    pub fn property(mut self, name: &str, value: &str) -> Self {
        self.instance.set_property(name, value);
        self
    }

    /// `Microsoft.NET.Sdk.Web`: a web app with Razor support.
    pub fn web(self) -> Self {
        self.property(property_names::USING_SDK_WEB, "true")
            .property(property_names::USING_SDK_RAZOR, "true")
    }

    pub fn import(mut self, path: impl Into<PathBuf>) -> Self {
        self.instance.imports.push(path.into());
        self
    }

    pub fn item(mut self, item_type: &str, include: &str) -> Self {
        self.instance.items.push(ProjectItem::new(item_type, include));
        self
    }

    pub fn build(self) -> ProjectInstance {
        self.instance
    }
}

/// Builder for `ProjectGraph`; the first project added is the entry point.
#[derive(Default)]
pub struct GraphBuilder {
    graph: ProjectGraph,
    nodes: HashMap<PathBuf, NodeIndex>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn project(mut self, instance: ProjectInstance) -> Self {
        let path = instance.full_path.clone();
        let index = self.graph.add_project(instance);
        if self.nodes.is_empty() {
            self.graph.add_entry_point(index);
        }
        self.nodes.insert(path, index);
        self
    }

    pub fn reference(mut self, dependent: impl AsRef<Path>, dependency: impl AsRef<Path>) -> Self {
        let dependent = self.nodes[dependent.as_ref()];
        let dependency = self.nodes[dependency.as_ref()];
        self.graph.add_reference(dependent, dependency);
        self
    }

    pub fn build(self) -> ProjectGraph {
        self.graph
    }
}

/// Evaluation result over `graph` with `files` owned by the entry project.
/// `(path, Some(asset))` marks a static web asset.
pub fn evaluation_with_files(graph: ProjectGraph, files: &[(&str, Option<&str>)]) -> EvaluationResult {
    let project = graph
        .entry_point()
        .map(|n| n.instance.full_path.clone())
        .unwrap_or_default();
    let mut set = FileSetBuilder::new();
    for (path, asset) in files {
        set.add_file(Path::new(path), &project, asset.map(str::to_string));
    }
    EvaluationResult::new(set.build(), Arc::new(graph))
}
