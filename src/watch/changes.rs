// src/watch/changes.rs

//! Folding raw watcher events into one change per path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::types::{ChangeKind, ChangedPath};
use crate::watch::path_utils::path_key;

/// Collapse a batch of changes to at most one change per path.
///
/// Per path, in arrival order:
/// - repeated kinds collapse into one;
/// - delete followed by add (with any updates between) is an update;
/// - add followed by delete cancels out;
/// - a delete discards an earlier update;
/// - updates after an add are absorbed by the add.
///
/// The surviving change is the last delete, else the last add, else the last
/// update. Output keeps the order in which paths first appeared. `Renamed`
/// entries are treated as updates here; resolve them with
/// [`resolve_renames`] first when direction matters.
pub fn normalize_path_changes(changes: impl IntoIterator<Item = ChangedPath>) -> Vec<ChangedPath> {
    let mut order: Vec<PathBuf> = Vec::new();
    let mut groups: HashMap<PathBuf, Vec<ChangedPath>> = HashMap::new();

    for change in changes {
        let key = path_key(&change.path);
        let group = groups.entry(key.clone()).or_default();
        if group.is_empty() {
            order.push(key);
        }
        group.push(change);
    }

    order
        .into_iter()
        .filter_map(|key| groups.remove(&key).and_then(fold_group))
        .collect()
}

fn fold_group(group: Vec<ChangedPath>) -> Option<ChangedPath> {
    let mut last_update: Option<ChangedPath> = None;
    let mut last_delete: Option<ChangedPath> = None;
    let mut last_add: Option<ChangedPath> = None;
    let mut previous: Option<ChangeKind> = None;

    for item in group {
        let kind = match item.kind {
            ChangeKind::Renamed => ChangeKind::Modified,
            kind => kind,
        };

        if previous == Some(kind) {
            continue;
        }
        previous = Some(kind);

        match kind {
            ChangeKind::Added => {
                if last_delete.is_some() {
                    last_delete = None;
                    last_add = None;
                    if last_update.is_none() {
                        last_update = Some(ChangedPath::new(item.path, ChangeKind::Modified));
                    }
                } else {
                    last_add = Some(item);
                }
            }
            ChangeKind::Removed => {
                if last_add.is_some() {
                    last_delete = None;
                    last_add = None;
                } else {
                    last_delete = Some(item);
                    last_update = None;
                }
            }
            ChangeKind::Modified | ChangeKind::Renamed => {
                if last_add.is_none() {
                    last_update = Some(ChangedPath::new(item.path, ChangeKind::Modified));
                }
            }
        }
    }

    last_delete.or(last_add).or(last_update)
}

/// Replace `Renamed` changes by `Added` or `Removed` depending on whether the
/// path exists now.
pub fn resolve_renames(
    changes: impl IntoIterator<Item = ChangedPath>,
    exists: impl Fn(&Path) -> bool,
) -> Vec<ChangedPath> {
    changes
        .into_iter()
        .map(|change| match change.kind {
            ChangeKind::Renamed => {
                let kind = if exists(&change.path) {
                    ChangeKind::Added
                } else {
                    ChangeKind::Removed
                };
                ChangedPath::new(change.path, kind)
            }
            _ => change,
        })
        .collect()
}
