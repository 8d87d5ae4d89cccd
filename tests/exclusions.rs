// tests/exclusions.rs

mod common;
use crate::common::builders::{GraphBuilder, ProjectBuilder};

use std::path::{Path, PathBuf};

use devwatch::build::exclusions::FilePathExclusions;
use devwatch::report::messages;
use devwatch::types::ChangeKind;
use devwatch_test_utils::recording_reporter::RecordingReporter;
use proptest::prelude::*;

#[test]
fn structurally_identical_globs_are_stored_once() {
    // Two projects in one directory produce the same anchored globs.
    let graph = GraphBuilder::new()
        .project(
            ProjectBuilder::new("/s/App/App.proj")
                .property("DefaultItemExcludes", "bin/**;obj/**")
                .build(),
        )
        .project(
            ProjectBuilder::new("/s/App/App.Tests.proj")
                .property("DefaultItemExcludes", "bin/**;obj/**;**/*.user")
                .build(),
        )
        .project(
            ProjectBuilder::new("/s/Lib/Lib.proj")
                .property("DefaultItemExcludes", "bin/**")
                .build(),
        )
        .build();

    let exclusions = FilePathExclusions::from_graph(&graph);

    let patterns: Vec<(PathBuf, String)> = exclusions
        .globs()
        .iter()
        .map(|g| (g.project_directory.clone(), g.raw.clone()))
        .collect();
    assert_eq!(
        patterns,
        vec![
            (PathBuf::from("/s/App"), "bin/**".to_string()),
            (PathBuf::from("/s/App"), "obj/**".to_string()),
            (PathBuf::from("/s/App"), "**/*.user".to_string()),
            (PathBuf::from("/s/Lib"), "bin/**".to_string()),
        ]
    );
}

#[test]
fn illegal_globs_are_skipped() {
    let graph = GraphBuilder::new()
        .project(
            ProjectBuilder::new("/s/App/App.proj")
                .property("DefaultItemExcludes", "**/../*.cs;obj/**")
                .build(),
        )
        .build();

    let exclusions = FilePathExclusions::from_graph(&graph);
    assert_eq!(exclusions.globs().len(), 1);
    assert_eq!(exclusions.globs()[0].raw, "obj/**");
}

#[test]
fn projects_without_default_items_exclude_output_directories() {
    let graph = GraphBuilder::new()
        .project(
            ProjectBuilder::new("/s/App/App.proj")
                .property("EnableDefaultItems", "false")
                .property("DefaultItemExcludes", "**/*.cs")
                .property("OutputPath", "bin/Debug/")
                .property("IntermediateOutputPath", "obj/Debug/")
                .build(),
        )
        .build();
    let reporter = RecordingReporter::new();

    let exclusions = FilePathExclusions::from_graph(&graph);
    assert!(exclusions.globs().is_empty());
    assert_eq!(exclusions.output_directories().len(), 2);

    assert!(exclusions.is_excluded(
        Path::new("/s/App/obj/Debug/App.AssemblyInfo.cs"),
        ChangeKind::Modified,
        &reporter
    ));
    assert!(!exclusions.is_excluded(Path::new("/s/App/Program.cs"), ChangeKind::Modified, &reporter));
    assert_eq!(reporter.count(&messages::IGNORING_CHANGE_IN_OUTPUT_DIRECTORY), 1);
    assert_eq!(reporter.count(&messages::IGNORING_CHANGE_IN_EXCLUDED_FILE), 0);
}

fn segment() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_]{1,8}(\\.[a-z]{1,3})?"
}

proptest! {
    #[test]
    fn anything_under_an_output_directory_is_excluded(
        segments in proptest::collection::vec(segment(), 1..5),
        kind in prop_oneof![
            Just(ChangeKind::Added),
            Just(ChangeKind::Modified),
            Just(ChangeKind::Removed),
        ],
    ) {
        let mut exclusions = FilePathExclusions::empty();
        exclusions.add_output_directory(PathBuf::from("/s/App/bin/Debug"));
        let reporter = RecordingReporter::new();

        let mut path = PathBuf::from("/s/App/bin/Debug");
        for s in &segments {
            path.push(s);
        }

        prop_assert!(exclusions.is_excluded(&path, kind, &reporter));
        prop_assert!(!exclusions.is_excluded(Path::new("/s/App/Program.cs"), kind, &reporter));
    }
}
