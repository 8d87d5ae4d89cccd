// src/engine/core.rs

//! Pure decisions of the watch loop.
//!
//! Everything here is synchronous and free of IO so it can be unit tested
//! against hand-built evaluation results. The async shell in
//! [`runtime`](crate::engine::runtime) carries the decisions out.

use std::path::Path;

use crate::build::evaluation::{EvaluationResult, FileItem};
use crate::build::graph::property_names;
use crate::engine::{ChangeAction, ChangePlan, ChangedFile};
use crate::report::{MessageDescriptor, Reporter, messages};
use crate::types::{ChangeKind, ChangedPath};
use crate::watch::path_utils::{display_relative, hidden_containing_directory};

/// Extensions of new files the compiler picks up without a project edit.
const RECOMPILATION_EXTENSIONS: &[&str] = &[".cs", ".razor", ".razor.css", ".cshtml.css"];

/// Should a raw change be acted upon at all?
pub fn accept_change(
    change: &ChangedPath,
    evaluation: &EvaluationResult,
    reporter: &dyn Reporter,
) -> bool {
    let path = change.path.as_path();

    if evaluation.contains(path) {
        return true;
    }

    if has_extension(path, ".binlog") {
        return false;
    }

    if let Some(hidden) = hidden_containing_directory(path) {
        reporter.report(
            &messages::IGNORING_CHANGE_IN_HIDDEN_DIRECTORY,
            &[&hidden.display(), &change.kind, &path.display()],
        );
        return false;
    }

    if evaluation.is_build_file(path) {
        return true;
    }

    !evaluation
        .item_exclusions()
        .is_excluded(path, change.kind, reporter)
}

/// Filter used while no evaluation is available (after a failed one).
pub fn accept_change_without_evaluation(change: &ChangedPath) -> bool {
    !has_extension(&change.path, ".binlog") && hidden_containing_directory(&change.path).is_none()
}

/// Pair each change with what the evaluation knows about its path. Known
/// files report `Added` as `Modified`: the file was already part of the set.
pub fn resolve_changed_files(
    changes: &[ChangedPath],
    evaluation: &EvaluationResult,
) -> Vec<ChangedFile> {
    changes
        .iter()
        .map(|change| match evaluation.get(&change.path) {
            Some(item) => ChangedFile {
                item: item.clone(),
                kind: match change.kind {
                    ChangeKind::Added => ChangeKind::Modified,
                    other => other,
                },
            },
            None => ChangedFile {
                item: FileItem::new(change.path.clone()),
                kind: change.kind,
            },
        })
        .collect()
}

/// Could a newly added file change the compilation?
pub fn is_recompilation_source(path: &Path, evaluation: &EvaluationResult) -> bool {
    if RECOMPILATION_EXTENSIONS.iter().any(|ext| has_extension(path, ext)) {
        return true;
    }
    if has_extension(path, ".cshtml") {
        return !evaluation.root_project().is_some_and(|root| {
            root.property_is_false(property_names::ADD_CSHTML_FILES_TO_WATCH_LIST)
        });
    }
    false
}

/// True when any added file could change the compilation.
pub fn may_require_recompilation(changed: &[ChangedFile], evaluation: &EvaluationResult) -> bool {
    changed.iter().any(|file| {
        file.kind == ChangeKind::Added && is_recompilation_source(&file.item.file_path, evaluation)
    })
}

fn is_relevant(file: &ChangedFile, evaluation: &EvaluationResult) -> bool {
    let path = file.item.file_path.as_path();
    evaluation.contains(path)
        || evaluation.is_build_file(path)
        || (file.kind == ChangeKind::Added && is_recompilation_source(path, evaluation))
}

/// Decide what a batch of changed files means.
///
/// Re-planning against a fresh evaluation is the caller's job whenever
/// `requires_evaluation` is set.
pub fn plan_change(changed: &[ChangedFile], evaluation: &EvaluationResult) -> ChangePlan {
    let requires_evaluation = changed.iter().any(|file| {
        let path = &file.item.file_path;
        file.kind == ChangeKind::Added
            || (file.kind == ChangeKind::Removed && evaluation.contains(path))
            || evaluation.is_build_file(path)
    });

    let relevant: Vec<&ChangedFile> = changed
        .iter()
        .filter(|file| is_relevant(file, evaluation))
        .collect();

    let action = if relevant.is_empty() {
        ChangeAction::Ignore
    } else if relevant
        .iter()
        .all(|f| f.kind == ChangeKind::Modified && f.item.is_static_web_asset())
    {
        ChangeAction::RefreshStaticAssets(
            relevant
                .iter()
                .filter_map(|f| f.item.static_web_asset_path.clone())
                .collect(),
        )
    } else {
        let first = &relevant[0];
        ChangeAction::Restart(format!(
            "{} {}",
            first.kind,
            first.item.file_path.display()
        ))
    };

    ChangePlan {
        requires_evaluation,
        action,
    }
}

/// Whether a re-evaluation was caused by new files or by build files.
pub fn is_project_change(changed: &[ChangedFile], evaluation: &EvaluationResult) -> bool {
    changed
        .iter()
        .any(|file| evaluation.is_build_file(&file.item.file_path))
}

/// Message announcing why the project is evaluated again.
pub fn re_evaluation_reason(
    changed: &[ChangedFile],
    evaluation: &EvaluationResult,
) -> &'static MessageDescriptor {
    if is_project_change(changed, evaluation) {
        &messages::PROJECT_CHANGE_TRIGGERED_RE_EVALUATION
    } else if changed.iter().any(|file| {
        file.kind == ChangeKind::Removed && evaluation.contains(&file.item.file_path)
    }) {
        &messages::FILE_REMOVAL_TRIGGERED_RE_EVALUATION
    } else {
        &messages::FILE_ADDITION_TRIGGERED_RE_EVALUATION
    }
}

/// Combine the plan made before a re-evaluation with the one made after.
///
/// A removed file is gone from the fresh evaluation, so the new plan may
/// ignore a change that still needs a restart.
pub fn keep_restart(before: ChangeAction, after: ChangeAction) -> ChangeAction {
    match (before, after) {
        (ChangeAction::Restart(reason), ChangeAction::Ignore) => ChangeAction::Restart(reason),
        (_, after) => after,
    }
}

/// One-line summary such as `File updated: ./Program.cs`.
pub fn describe_changes(changed: &[ChangedFile], base: &Path) -> String {
    let mut parts = Vec::new();
    for kind in [
        ChangeKind::Added,
        ChangeKind::Modified,
        ChangeKind::Removed,
        ChangeKind::Renamed,
    ] {
        let paths: Vec<String> = changed
            .iter()
            .filter(|f| f.kind == kind)
            .map(|f| display_relative(base, &f.item.file_path))
            .collect();
        match paths.len() {
            0 => {}
            1 => parts.push(format!("File {kind}: {}", paths[0])),
            _ => parts.push(format!("Files {kind}: {}", paths.join(", "))),
        }
    }
    parts.join(". ")
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|name| name.ends_with(extension) && name.len() > extension.len())
}
