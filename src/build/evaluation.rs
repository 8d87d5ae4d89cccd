// src/build/evaluation.rs

//! One design-time evaluation pass: which files matter, and to which
//! projects.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use tracing::{debug, warn};

use crate::build::evaluator::ProjectEvaluator;
use crate::build::exclusions::FilePathExclusions;
use crate::build::graph::{item_names, property_names, target_names, ProjectGraph, ProjectInstance};
use crate::report::{messages, Reporter};
use crate::watch::path_utils::{absolutize, path_key, paths_equal, relative_str};
use crate::watch::FileWatcher;

/// Properties that turn a build into a compiler-free design-time pass.
pub const EVALUATION_PROPERTIES: &[(&str, &str)] = &[
    ("DesignTimeBuild", "true"),
    ("SkipCompilerExecution", "true"),
    ("ProvideCommandLineArgs", "true"),
    ("DotNetWatchBuild", "true"),
];

const WWWROOT_PREFIX: &str = "wwwroot/";

/// A file that belongs to at least one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileItem {
    pub file_path: PathBuf,
    pub containing_project_paths: BTreeSet<PathBuf>,
    /// Web-root relative path when the file is also a static web asset.
    pub static_web_asset_path: Option<String>,
}

impl FileItem {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            containing_project_paths: BTreeSet::new(),
            static_web_asset_path: None,
        }
    }

    /// Record another project that includes this file. Returns false if it
    /// was already recorded under the same path key; the first spelling wins.
    pub fn add_containing_project(&mut self, project: impl Into<PathBuf>) -> bool {
        let project = project.into();
        if self
            .containing_project_paths
            .iter()
            .any(|known| paths_equal(known, &project))
        {
            return false;
        }
        self.containing_project_paths.insert(project)
    }

    pub fn is_static_web_asset(&self) -> bool {
        self.static_web_asset_path.is_some()
    }
}

/// Accumulates [`FileItem`]s while projects are walked.
#[derive(Debug, Default)]
pub struct FileSetBuilder {
    files: BTreeMap<PathBuf, FileItem>,
}

impl FileSetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, path: &Path, project: &Path, static_web_asset_path: Option<String>) {
        let item = self
            .files
            .entry(path_key(path))
            .or_insert_with(|| FileItem::new(path));
        item.add_containing_project(project);
        if item.static_web_asset_path.is_none() {
            item.static_web_asset_path = static_web_asset_path;
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn build(self) -> BTreeMap<PathBuf, FileItem> {
        self.files
    }
}

/// Knobs for [`EvaluationResult::try_create`].
#[derive(Debug, Clone, Default)]
pub struct EvaluationOptions {
    pub target_framework: Option<String>,
    /// Skip `wwwroot` content items.
    pub suppress_static_files: bool,
    /// Report every watched path, not only the count.
    pub list_files: bool,
}

/// Immutable snapshot of one evaluation. A new evaluation replaces it.
#[derive(Debug)]
pub struct EvaluationResult {
    files: BTreeMap<PathBuf, FileItem>,
    project_graph: Arc<ProjectGraph>,
    item_exclusions: OnceLock<FilePathExclusions>,
    build_files: OnceLock<BTreeSet<PathBuf>>,
}

impl EvaluationResult {
    pub fn new(files: BTreeMap<PathBuf, FileItem>, project_graph: Arc<ProjectGraph>) -> Self {
        Self {
            files,
            project_graph,
            item_exclusions: OnceLock::new(),
            build_files: OnceLock::new(),
        }
    }

    /// Evaluate `root_project` and collect its watchable files.
    ///
    /// Returns `None` when the graph fails to load, restore fails, or any
    /// design-time target fails. The caller reports that to the user.
    pub fn try_create(
        evaluator: &dyn ProjectEvaluator,
        root_project: &Path,
        property_overrides: &BTreeMap<String, String>,
        options: &EvaluationOptions,
        restore: bool,
        reporter: &dyn Reporter,
    ) -> Option<Self> {
        let global_properties = evaluation_properties(property_overrides, options);

        let graph = evaluator.try_load_project_graph(root_project, &global_properties)?;

        if restore {
            let root = graph.entry_point()?;
            let mut instance = root.instance.clone();
            if !evaluator.build(&mut instance, &[target_names::RESTORE]) {
                warn!(project = %root_project.display(), "restore failed");
                return None;
            }
        }

        let order = match graph.topological_order() {
            Ok(order) => order,
            Err(err) => {
                warn!(error = %err, "cannot order project graph");
                return None;
            }
        };

        let mut file_set = FileSetBuilder::new();
        for node in order {
            if node.instance.is_outer_build() {
                continue;
            }

            // Builds populate items; run them on a copy so the graph stays as loaded.
            let mut instance = node.instance.clone();
            let custom_targets = instance.property_list(property_names::CUSTOM_COLLECT_WATCH_ITEMS);
            let mut targets = vec![target_names::GENERATE_WATCH_LIST];
            targets.extend(custom_targets.iter().map(String::as_str));

            if !evaluator.build(&mut instance, &targets) {
                warn!(project = %instance.full_path.display(), ?targets, "design-time build failed");
                return None;
            }

            collect_files(&instance, options, &mut file_set);
        }

        let files = file_set.build();
        reporter.report(&messages::WATCHING_FILES_FOR_CHANGES, &[&files.len()]);
        if options.list_files {
            for item in files.values() {
                reporter.report(
                    &messages::WATCHING_FILES_FOR_CHANGES_FILE_PATH,
                    &[&item.file_path.display()],
                );
            }
        }

        Some(Self::new(files, Arc::new(graph)))
    }

    pub fn files(&self) -> &BTreeMap<PathBuf, FileItem> {
        &self.files
    }

    pub fn get(&self, path: &Path) -> Option<&FileItem> {
        self.files.get(&path_key(path))
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(&path_key(path))
    }

    pub fn project_graph(&self) -> &Arc<ProjectGraph> {
        &self.project_graph
    }

    pub fn root_project(&self) -> Option<&ProjectInstance> {
        self.project_graph.entry_point().map(|n| &n.instance)
    }

    pub fn item_exclusions(&self) -> &FilePathExclusions {
        self.item_exclusions
            .get_or_init(|| FilePathExclusions::from_graph(&self.project_graph))
    }

    /// Project files and their imports: changes here need a new evaluation.
    pub fn build_files(&self) -> &BTreeSet<PathBuf> {
        self.build_files.get_or_init(|| {
            let mut files = BTreeSet::new();
            for node in self.project_graph.nodes() {
                files.insert(node.instance.full_path.clone());
                files.extend(node.instance.imports.iter().cloned());
            }
            files
        })
    }

    pub fn is_build_file(&self, path: &Path) -> bool {
        let key = path_key(path);
        self.build_files().iter().any(|f| path_key(f) == key)
    }

    /// Start watching everything this evaluation cares about.
    pub fn watch_files(&self, watcher: &mut FileWatcher) {
        watcher.watch_containing_directories(self.files.values().map(|f| &f.file_path), true);
        watcher.watch_files(self.build_files().iter());
    }
}

fn evaluation_properties(
    overrides: &BTreeMap<String, String>,
    options: &EvaluationOptions,
) -> BTreeMap<String, String> {
    let mut properties = overrides.clone();
    if let Some(framework) = &options.target_framework {
        properties.insert(property_names::TARGET_FRAMEWORK.to_string(), framework.clone());
    }
    for (name, value) in EVALUATION_PROPERTIES {
        properties.insert((*name).to_string(), (*value).to_string());
    }
    properties
}

fn collect_files(instance: &ProjectInstance, options: &EvaluationOptions, file_set: &mut FileSetBuilder) {
    let project_dir = instance.directory();
    let project_path = instance.full_path.as_path();
    let watched = |item: &&crate::build::graph::ProjectItem| {
        !item
            .metadata(item_names::WATCH_METADATA)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("false"))
    };

    for item_type in [item_names::COMPILE, item_names::ADDITIONAL_FILES, item_names::WATCH] {
        for item in instance.items_of_type(item_type).filter(watched) {
            let path = absolutize(project_dir, Path::new(&item.include.replace('\\', "/")));
            file_set.add_file(&path, project_path, None);
        }
    }

    let collect_content = !options.suppress_static_files
        && instance.property_is_true(property_names::USING_SDK_RAZOR)
        && !instance.property_is_false(property_names::WATCH_CONTENT_FILES);
    if !collect_content {
        return;
    }

    for item in instance.items_of_type(item_names::CONTENT).filter(watched) {
        let path = absolutize(project_dir, Path::new(&item.include.replace('\\', "/")));
        let Some(relative) = relative_str(project_dir, &path) else {
            continue;
        };
        if relative.to_ascii_lowercase().starts_with(WWWROOT_PREFIX) {
            debug!(path = %path.display(), "static web asset");
            file_set.add_file(&path, project_path, Some(relative));
        }
    }
}
