#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use devwatch::build::ManifestEvaluator;
use devwatch::fs::mock::MockFileSystem;

pub use devwatch_test_utils::builders;
pub use devwatch_test_utils::{eventually, init_tracing, with_timeout};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Temp directory whose name does not start with `.`, so changes inside it
/// are not mistaken for hidden-directory noise.
pub fn project_dir() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("devwatch")
        .tempdir()
        .expect("create temp dir")
}

/// Write `contents` to `root/relative`, creating parent directories.
pub fn write_file(root: &Path, relative: &str, contents: &str) -> PathBuf {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent dirs");
    }
    std::fs::write(&path, contents).expect("write file");
    path
}

/// An in-memory tree plus an evaluator reading from it.
pub fn mock_tree(files: &[(&str, &str)]) -> (MockFileSystem, ManifestEvaluator) {
    let fs = MockFileSystem::new();
    for (path, contents) in files {
        fs.add_file(path, contents.as_bytes());
    }
    let evaluator = ManifestEvaluator::new(Arc::new(fs.clone()));
    (fs, evaluator)
}
