use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use devwatch::build::evaluator::ProjectEvaluator;
use devwatch::build::graph::{target_names, ProjectGraph, ProjectInstance, ProjectItem};

/// A scripted evaluator that:
/// - hands out a clone of the configured graph (or fails to load)
/// - adds the configured items when `GenerateWatchList` is built
/// - records every load and build.
#[derive(Default)]
pub struct FakeEvaluator {
    graph: Mutex<Option<ProjectGraph>>,
    items: Mutex<HashMap<PathBuf, Vec<ProjectItem>>>,
    fail_builds: Mutex<bool>,
    loads: Mutex<Vec<BTreeMap<String, String>>>,
    builds: Mutex<Vec<(PathBuf, Vec<String>)>>,
}

impl FakeEvaluator {
    pub fn new(graph: ProjectGraph) -> Self {
        let evaluator = Self::default();
        evaluator.set_graph(Some(graph));
        evaluator
    }

    /// `None` makes the next loads fail.
    pub fn set_graph(&self, graph: Option<ProjectGraph>) {
        *self.graph.lock().unwrap() = graph;
    }

    pub fn set_items(&self, project: impl Into<PathBuf>, items: Vec<ProjectItem>) {
        self.items.lock().unwrap().insert(project.into(), items);
    }

    pub fn add_item(&self, project: impl Into<PathBuf>, item: ProjectItem) {
        self.items
            .lock()
            .unwrap()
            .entry(project.into())
            .or_default()
            .push(item);
    }

    pub fn fail_builds(&self, fail: bool) {
        *self.fail_builds.lock().unwrap() = fail;
    }

    pub fn load_count(&self) -> usize {
        self.loads.lock().unwrap().len()
    }

    /// Global properties of the most recent load.
    pub fn last_global_properties(&self) -> Option<BTreeMap<String, String>> {
        self.loads.lock().unwrap().last().cloned()
    }

    pub fn builds(&self) -> Vec<(PathBuf, Vec<String>)> {
        self.builds.lock().unwrap().clone()
    }
}

impl ProjectEvaluator for FakeEvaluator {
    fn try_load_project_graph(
        &self,
        _root_project: &Path,
        global_properties: &BTreeMap<String, String>,
    ) -> Option<ProjectGraph> {
        self.loads.lock().unwrap().push(global_properties.clone());
        self.graph.lock().unwrap().clone()
    }

    fn build(&self, instance: &mut ProjectInstance, targets: &[&str]) -> bool {
        self.builds.lock().unwrap().push((
            instance.full_path.clone(),
            targets.iter().map(|t| t.to_string()).collect(),
        ));
        if *self.fail_builds.lock().unwrap() {
            return false;
        }
        if targets.contains(&target_names::GENERATE_WATCH_LIST) {
            if let Some(items) = self.items.lock().unwrap().get(&instance.full_path) {
                instance.items.extend(items.iter().cloned());
            }
        }
        true
    }
}
