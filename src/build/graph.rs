// src/build/graph.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use petgraph::Direction;

pub use petgraph::graph::NodeIndex;

use crate::errors::{DevWatchError, Result};

/// Well-known property names.
pub mod property_names {
    pub const TARGET_FRAMEWORK: &str = "TargetFramework";
    pub const TARGET_FRAMEWORKS: &str = "TargetFrameworks";
    pub const ENABLE_DEFAULT_ITEMS: &str = "EnableDefaultItems";
    pub const DEFAULT_ITEM_EXCLUDES: &str = "DefaultItemExcludes";
    pub const OUTPUT_PATH: &str = "OutputPath";
    pub const INTERMEDIATE_OUTPUT_PATH: &str = "IntermediateOutputPath";
    pub const USING_SDK_RAZOR: &str = "UsingMicrosoftNETSdkRazor";
    pub const USING_SDK_WEB: &str = "UsingMicrosoftNETSdkWeb";
    pub const WATCH_CONTENT_FILES: &str = "DotNetWatchContentFiles";
    pub const CUSTOM_COLLECT_WATCH_ITEMS: &str = "CustomCollectWatchItems";
    pub const ADD_CSHTML_FILES_TO_WATCH_LIST: &str = "AddCshtmlFilesToDotNetWatchList";
}

/// Well-known item types and metadata.
pub mod item_names {
    pub const COMPILE: &str = "Compile";
    pub const ADDITIONAL_FILES: &str = "AdditionalFiles";
    pub const WATCH: &str = "Watch";
    pub const CONTENT: &str = "Content";
    /// Metadata that opts an item out of watching when `false`.
    pub const WATCH_METADATA: &str = "Watch";
}

/// Targets the watcher asks the evaluator to run.
pub mod target_names {
    pub const GENERATE_WATCH_LIST: &str = "GenerateWatchList";
    pub const RESTORE: &str = "Restore";
}

/// One evaluated item. `include` is the item pattern as evaluated: relative to the
/// project directory unless absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectItem {
    pub item_type: String,
    pub include: String,
    pub metadata: BTreeMap<String, String>,
}

impl ProjectItem {
    pub fn new(item_type: impl Into<String>, include: impl Into<String>) -> Self {
        Self {
            item_type: item_type.into(),
            include: include.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }

    /// Metadata lookup, case-insensitive on the name.
    pub fn metadata(&self, name: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Evaluated state of one project. Cloning yields an independent copy that
/// builds can populate without touching the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectInstance {
    pub full_path: PathBuf,
    pub global_properties: BTreeMap<String, String>,
    pub properties: BTreeMap<String, String>,
    pub items: Vec<ProjectItem>,
    /// Files imported while evaluating the project.
    pub imports: Vec<PathBuf>,
    /// Targets declared by the project, with the items each one adds.
    pub targets: BTreeMap<String, Vec<ProjectItem>>,
}

impl ProjectInstance {
    pub fn new(full_path: impl Into<PathBuf>) -> Self {
        Self {
            full_path: full_path.into(),
            global_properties: BTreeMap::new(),
            properties: BTreeMap::new(),
            items: Vec::new(),
            imports: Vec::new(),
            targets: BTreeMap::new(),
        }
    }

    pub fn directory(&self) -> &Path {
        self.full_path.parent().unwrap_or_else(|| Path::new(""))
    }

    /// Property lookup, case-insensitive on the name. Empty values read as
    /// unset.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.trim().is_empty())
    }

    pub fn set_property(&mut self, name: &str, value: impl Into<String>) {
        let existing = self
            .properties
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .cloned();
        self.properties
            .insert(existing.unwrap_or_else(|| name.to_string()), value.into());
    }

    pub fn property_is_true(&self, name: &str) -> bool {
        self.property(name)
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn property_is_false(&self, name: &str) -> bool {
        self.property(name)
            .map(|v| v.trim().eq_ignore_ascii_case("false"))
            .unwrap_or(false)
    }

    /// `;`-separated property value, trimmed, without empty entries.
    pub fn property_list(&self, name: &str) -> Vec<String> {
        self.property(name)
            .map(split_list)
            .unwrap_or_default()
    }

    pub fn items_of_type<'a>(&'a self, item_type: &'a str) -> impl Iterator<Item = &'a ProjectItem> + 'a {
        self.items
            .iter()
            .filter(move |i| i.item_type.eq_ignore_ascii_case(item_type))
    }

    pub fn target_framework(&self) -> Option<&str> {
        self.property(property_names::TARGET_FRAMEWORK)
    }

    /// Multi-targeting aggregator with no single framework of its own.
    pub fn is_outer_build(&self) -> bool {
        self.target_framework().is_none()
            && !self.property_list(property_names::TARGET_FRAMEWORKS).is_empty()
    }

    pub fn default_items_enabled(&self) -> bool {
        !self.property_is_false(property_names::ENABLE_DEFAULT_ITEMS)
    }

    pub fn output_directory(&self) -> Option<PathBuf> {
        self.property(property_names::OUTPUT_PATH)
            .map(|p| self.directory().join(p.replace('\\', "/")))
    }

    pub fn intermediate_output_directory(&self) -> Option<PathBuf> {
        self.property(property_names::INTERMEDIATE_OUTPUT_PATH)
            .map(|p| self.directory().join(p.replace('\\', "/")))
    }

    pub fn is_web_app(&self) -> bool {
        self.property_is_true(property_names::USING_SDK_WEB)
            || self.property_is_true(property_names::USING_SDK_RAZOR)
    }
}

pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectNode {
    pub instance: ProjectInstance,
}

impl ProjectNode {
    pub fn project_path(&self) -> &Path {
        &self.instance.full_path
    }
}

/// Projects and their project-to-project references.
///
/// Edges run from a dependency to its dependent, so a topological order
/// visits dependencies first.
#[derive(Debug, Clone, Default)]
pub struct ProjectGraph {
    graph: DiGraph<ProjectNode, ()>,
    entry_points: Vec<NodeIndex>,
}

impl ProjectGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_project(&mut self, instance: ProjectInstance) -> NodeIndex {
        self.graph.add_node(ProjectNode { instance })
    }

    /// Record that `dependent` references `dependency`.
    pub fn add_reference(&mut self, dependent: NodeIndex, dependency: NodeIndex) {
        if !self.graph.contains_edge(dependency, dependent) {
            self.graph.add_edge(dependency, dependent, ());
        }
    }

    pub fn add_entry_point(&mut self, node: NodeIndex) {
        if !self.entry_points.contains(&node) {
            self.entry_points.push(node);
        }
    }

    pub fn node(&self, index: NodeIndex) -> Option<&ProjectNode> {
        self.graph.node_weight(index)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ProjectNode> {
        self.graph.node_weights()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// The node the graph was loaded for (the first entry point).
    pub fn entry_point(&self) -> Option<&ProjectNode> {
        self.entry_points.first().and_then(|i| self.graph.node_weight(*i))
    }

    pub fn entry_point_index(&self) -> Option<NodeIndex> {
        self.entry_points.first().copied()
    }

    /// Projects referenced by `node`.
    pub fn references_of(&self, node: NodeIndex) -> Vec<&ProjectNode> {
        self.graph
            .neighbors_directed(node, Direction::Incoming)
            .filter_map(|i| self.graph.node_weight(i))
            .collect()
    }

    /// Nodes with dependencies before dependents.
    pub fn topological_order(&self) -> Result<Vec<&ProjectNode>> {
        let order = toposort(&self.graph, None).map_err(|cycle| {
            let path = self
                .graph
                .node_weight(cycle.node_id())
                .map(|n| n.instance.full_path.display().to_string())
                .unwrap_or_default();
            DevWatchError::ProjectGraph(format!("project reference cycle involving {path}"))
        })?;
        Ok(order
            .into_iter()
            .filter_map(|i| self.graph.node_weight(i))
            .collect())
    }

    /// Distinct project file paths in the graph.
    pub fn project_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.nodes().map(|n| n.instance.full_path.clone()).collect();
        paths.sort();
        paths.dedup();
        paths
    }
}
