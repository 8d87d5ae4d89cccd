// src/build/manifest.rs

//! A small TOML project format and its evaluator.
//!
//! ```toml
//! sdk = "Web"
//! imports = ["../Directory.Build.toml"]
//! references = ["../Lib/Lib.proj"]
//!
//! [properties]
//! TargetFramework = "net8.0"
//!
//! [[items]]
//! type = "Compile"
//! include = "../Shared/*.cs"
//!
//! [[targets]]
//! name = "CollectScripts"
//! items = [{ type = "Watch", include = "scripts/**/*.js" }]
//! ```
//!
//! Declared items are expanded when the project is loaded. Default items
//! (`**/*.cs`, and `wwwroot/**` for Razor projects) and the items of custom
//! targets are only added when the corresponding target is built, so they
//! land on the instance being built and never on the graph.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use anyhow::Context;
use globset::GlobMatcher;
use petgraph::graph::NodeIndex;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::build::evaluator::ProjectEvaluator;
use crate::build::glob::{has_wildcard, matches, split_glob};
use crate::build::graph::{
    item_names, property_names, split_list, target_names, ProjectGraph, ProjectInstance,
    ProjectItem,
};
use crate::errors::{DevWatchError, Result};
use crate::fs::{walk_files, FileSystem};
use crate::watch::path_utils::{absolutize, path_key, relative_str};

/// Reserved metadata name carrying the exclude spec of an unexpanded target item.
const EXCLUDE_METADATA: &str = "Exclude";

const DEFAULT_ITEM_EXCLUDES: &str = "bin/**;obj/**;**/.*/**";

static PROPERTY_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\(([A-Za-z_][A-Za-z0-9_.\-]*)\)").expect("property reference pattern is valid")
});

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawManifest {
    pub sdk: Option<String>,
    pub imports: Vec<String>,
    pub references: Vec<String>,
    pub properties: BTreeMap<String, String>,
    pub items: Vec<RawItem>,
    pub targets: Vec<RawTarget>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawItem {
    #[serde(rename = "type")]
    pub item_type: String,
    pub include: String,
    #[serde(default)]
    pub exclude: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTarget {
    pub name: String,
    #[serde(default)]
    pub items: Vec<RawItem>,
}

/// Evaluates TOML project manifests read through a [`FileSystem`].
#[derive(Debug, Clone)]
pub struct ManifestEvaluator {
    fs: Arc<dyn FileSystem>,
}

impl ManifestEvaluator {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }

    /// Evaluate one manifest. Returns the instance and the absolute paths of
    /// the projects it references.
    pub fn load_instance(
        &self,
        path: &Path,
        global_properties: &BTreeMap<String, String>,
    ) -> Result<(ProjectInstance, Vec<PathBuf>)> {
        let raw = self.read_manifest(path)?;
        let mut instance = ProjectInstance::new(path);
        instance.global_properties = global_properties.clone();

        let dir = instance.directory().to_path_buf();
        instance.set_property("MSBuildProjectDirectory", dir.display().to_string());
        instance.set_property("MSBuildProjectFullPath", path.display().to_string());
        instance.set_property("Configuration", "Debug");
        apply_sdk(&mut instance, raw.sdk.as_deref());

        let mut visited = HashSet::new();
        for import in &raw.imports {
            self.apply_import(&mut instance, &absolutize(&dir, Path::new(import)), &mut visited)?;
        }

        for (name, value) in &raw.properties {
            let value = expand_properties(value, &instance);
            instance.set_property(name, value);
        }
        for (name, value) in global_properties {
            instance.set_property(name, value.clone());
        }
        apply_derived_defaults(&mut instance);

        for item in &raw.items {
            let expanded = self.expand_item(&instance, item)?;
            instance.items.extend(expanded);
        }

        for target in &raw.targets {
            let items = target
                .items
                .iter()
                .map(|item| {
                    let mut spec = ProjectItem::new(&item.item_type, &item.include);
                    spec.metadata = item.metadata.clone();
                    if let Some(exclude) = &item.exclude {
                        spec.metadata.insert(EXCLUDE_METADATA.to_string(), exclude.clone());
                    }
                    spec
                })
                .collect();
            instance.targets.insert(target.name.clone(), items);
        }

        let references = raw
            .references
            .iter()
            .map(|r| absolutize(&dir, Path::new(&r.replace('\\', "/"))))
            .collect();

        Ok((instance, references))
    }

    fn read_manifest(&self, path: &Path) -> Result<RawManifest> {
        let text = self
            .fs
            .read_to_string(path)
            .with_context(|| format!("loading project {}", path.display()))?;
        Ok(toml::from_str(&text)?)
    }

    fn apply_import(
        &self,
        instance: &mut ProjectInstance,
        path: &Path,
        visited: &mut HashSet<PathBuf>,
    ) -> Result<()> {
        if !visited.insert(path_key(path)) {
            return Ok(());
        }

        let raw = self.read_manifest(path)?;
        let dir = path.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
        for nested in &raw.imports {
            self.apply_import(instance, &absolutize(&dir, Path::new(nested)), visited)?;
        }
        for (name, value) in &raw.properties {
            let value = expand_properties(value, instance);
            instance.set_property(name, value);
        }
        instance.imports.push(path.to_path_buf());
        Ok(())
    }

    fn expand_item(&self, instance: &ProjectInstance, item: &RawItem) -> Result<Vec<ProjectItem>> {
        let include = expand_properties(&item.include, instance);
        let exclude = item
            .exclude
            .as_deref()
            .map(|e| expand_properties(e, instance))
            .unwrap_or_default();

        let specs = self.expand_specs(instance.directory(), &include, &exclude)?;
        Ok(specs
            .into_iter()
            .map(|include| ProjectItem {
                item_type: item.item_type.clone(),
                include,
                metadata: item.metadata.clone(),
            })
            .collect())
    }

    /// Expand `;`-separated include specs relative to `dir`, minus anything
    /// matching `exclude`. Literal specs are kept even if the file is absent.
    fn expand_specs(&self, dir: &Path, include: &str, exclude: &str) -> Result<Vec<String>> {
        let excludes: Vec<GlobMatcher> = split_list(exclude)
            .iter()
            .filter_map(|spec| split_glob(dir, spec))
            .filter_map(|parts| parts.compile().ok())
            .collect();
        let is_excluded = |path: &Path| excludes.iter().any(|m| matches(m, path));

        let mut seen = HashSet::new();
        let mut out = Vec::new();

        for spec in split_list(include) {
            if !has_wildcard(&spec) {
                let absolute = absolutize(dir, Path::new(&spec.replace('\\', "/")));
                if !is_excluded(&absolute) && seen.insert(path_key(&absolute)) {
                    out.push(spec.replace('\\', "/"));
                }
                continue;
            }

            let Some(parts) = split_glob(dir, &spec) else {
                debug!(%spec, "skipping illegal item glob");
                continue;
            };
            let matcher = match parts.compile() {
                Ok(m) => m,
                Err(err) => {
                    debug!(%spec, error = %err, "skipping item glob that does not compile");
                    continue;
                }
            };
            if !self.fs.is_dir(&parts.fixed_directory) {
                continue;
            }

            for file in walk_files(self.fs.as_ref(), &parts.fixed_directory, &|_| false)? {
                if matches(&matcher, &file) && !is_excluded(&file) && seen.insert(path_key(&file)) {
                    out.push(relative_str(dir, &file).unwrap_or_else(|| file.display().to_string()));
                }
            }
        }

        Ok(out)
    }

    fn add_items(instance: &mut ProjectInstance, items: Vec<ProjectItem>) {
        for item in items {
            let duplicate = instance.items.iter().any(|existing| {
                existing.item_type.eq_ignore_ascii_case(&item.item_type)
                    && existing.include == item.include
            });
            if !duplicate {
                instance.items.push(item);
            }
        }
    }

    fn generate_watch_list(&self, instance: &mut ProjectInstance) -> Result<()> {
        if !instance.default_items_enabled() {
            return Ok(());
        }

        let excludes = instance
            .property(property_names::DEFAULT_ITEM_EXCLUDES)
            .unwrap_or("")
            .to_string();
        let dir = instance.directory().to_path_buf();

        let compile = self.expand_specs(&dir, "**/*.cs", &excludes)?;
        Self::add_items(
            instance,
            compile
                .into_iter()
                .map(|inc| ProjectItem::new(item_names::COMPILE, inc))
                .collect(),
        );

        if instance.property_is_true(property_names::USING_SDK_RAZOR) {
            let content = self.expand_specs(&dir, "wwwroot/**", &excludes)?;
            Self::add_items(
                instance,
                content
                    .into_iter()
                    .map(|inc| ProjectItem::new(item_names::CONTENT, inc))
                    .collect(),
            );
        }
        Ok(())
    }

    fn run_custom_target(&self, instance: &mut ProjectInstance, specs: Vec<ProjectItem>) -> Result<()> {
        let dir = instance.directory().to_path_buf();
        let mut items = Vec::new();
        for spec in specs {
            let mut metadata = spec.metadata.clone();
            let exclude = metadata.remove(EXCLUDE_METADATA).unwrap_or_default();
            let include = expand_properties(&spec.include, instance);
            let exclude = expand_properties(&exclude, instance);
            for inc in self.expand_specs(&dir, &include, &exclude)? {
                items.push(ProjectItem {
                    item_type: spec.item_type.clone(),
                    include: inc,
                    metadata: metadata.clone(),
                });
            }
        }
        Self::add_items(instance, items);
        Ok(())
    }
}

impl ProjectEvaluator for ManifestEvaluator {
    fn try_load_project_graph(
        &self,
        root_project: &Path,
        global_properties: &BTreeMap<String, String>,
    ) -> Option<ProjectGraph> {
        let mut loader = GraphLoader {
            evaluator: self,
            graph: ProjectGraph::new(),
            loaded: HashMap::new(),
            visiting: Vec::new(),
        };

        let root = match loader.load(root_project, global_properties) {
            Ok(root) => root,
            Err(err) => {
                warn!(project = %root_project.display(), error = %err, "failed to load project graph");
                return None;
            }
        };

        let mut graph = loader.graph;
        graph.add_entry_point(root);
        if let Err(err) = graph.topological_order() {
            warn!(error = %err, "project graph is not a DAG");
            return None;
        }
        Some(graph)
    }

    fn build(&self, instance: &mut ProjectInstance, targets: &[&str]) -> bool {
        for target in targets {
            let custom = instance
                .targets
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(target))
                .map(|(_, specs)| specs.clone());

            let result = if target.eq_ignore_ascii_case(target_names::RESTORE) {
                Ok(())
            } else if target.eq_ignore_ascii_case(target_names::GENERATE_WATCH_LIST) {
                self.generate_watch_list(instance)
            } else if let Some(specs) = custom {
                self.run_custom_target(instance, specs)
            } else {
                warn!(project = %instance.full_path.display(), %target, "target does not exist");
                return false;
            };

            if let Err(err) = result {
                warn!(project = %instance.full_path.display(), %target, error = %err, "target failed");
                return false;
            }
        }
        true
    }
}

type LoadKey = (PathBuf, Option<String>);

struct GraphLoader<'a> {
    evaluator: &'a ManifestEvaluator,
    graph: ProjectGraph,
    loaded: HashMap<LoadKey, NodeIndex>,
    visiting: Vec<LoadKey>,
}

impl GraphLoader<'_> {
    fn load(&mut self, path: &Path, global: &BTreeMap<String, String>) -> Result<NodeIndex> {
        let key = (
            path_key(path),
            global.get(property_names::TARGET_FRAMEWORK).cloned(),
        );
        if let Some(index) = self.loaded.get(&key) {
            return Ok(*index);
        }
        if self.visiting.contains(&key) {
            return Err(DevWatchError::ProjectGraph(format!(
                "project reference cycle involving {}",
                path.display()
            )));
        }
        self.visiting.push(key.clone());

        let (instance, references) = self.evaluator.load_instance(path, global)?;

        let index = if instance.is_outer_build() {
            let frameworks = instance.property_list(property_names::TARGET_FRAMEWORKS);
            let outer = self.graph.add_project(instance);
            for framework in frameworks {
                let mut inner_global = global.clone();
                inner_global.insert(property_names::TARGET_FRAMEWORK.to_string(), framework);
                let inner = self.load(path, &inner_global)?;
                self.graph.add_reference(outer, inner);
            }
            outer
        } else {
            let node = self.graph.add_project(instance);
            let mut reference_global = global.clone();
            reference_global.remove(property_names::TARGET_FRAMEWORK);
            for reference in references {
                let dependency = self.load(&reference, &reference_global)?;
                self.graph.add_reference(node, dependency);
            }
            node
        };

        self.visiting.pop();
        self.loaded.insert(key, index);
        Ok(index)
    }
}

fn apply_sdk(instance: &mut ProjectInstance, sdk: Option<&str>) {
    let sdk = sdk.unwrap_or("Microsoft.NET.Sdk").to_ascii_lowercase();
    let sdk = sdk.trim_start_matches("microsoft.net.sdk").trim_start_matches('.');
    match sdk {
        "web" => {
            instance.set_property(property_names::USING_SDK_WEB, "true");
            instance.set_property(property_names::USING_SDK_RAZOR, "true");
        }
        "razor" | "blazorwebassembly" => {
            instance.set_property(property_names::USING_SDK_RAZOR, "true");
        }
        _ => {}
    }
}

fn apply_derived_defaults(instance: &mut ProjectInstance) {
    let configuration = instance.property("Configuration").unwrap_or("Debug").to_string();
    let framework_dir = instance
        .target_framework()
        .map(|tf| format!("{tf}/"))
        .unwrap_or_default();

    if instance.property(property_names::OUTPUT_PATH).is_none() {
        instance.set_property(
            property_names::OUTPUT_PATH,
            format!("bin/{configuration}/{framework_dir}"),
        );
    }
    if instance.property(property_names::INTERMEDIATE_OUTPUT_PATH).is_none() {
        instance.set_property(
            property_names::INTERMEDIATE_OUTPUT_PATH,
            format!("obj/{configuration}/{framework_dir}"),
        );
    }
    if instance.property(property_names::DEFAULT_ITEM_EXCLUDES).is_none() {
        instance.set_property(property_names::DEFAULT_ITEM_EXCLUDES, DEFAULT_ITEM_EXCLUDES);
    }
}

/// Replace `$(Name)` references with current property values; unknown names
/// expand to nothing.
pub fn expand_properties(value: &str, instance: &ProjectInstance) -> String {
    PROPERTY_REFERENCE
        .replace_all(value, |caps: &regex::Captures<'_>| {
            instance.property(&caps[1]).unwrap_or("").to_string()
        })
        .into_owned()
}
