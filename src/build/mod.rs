// src/build/mod.rs

//! Project evaluation.
//!
//! - [`graph`]: projects, items and references.
//! - [`evaluator`]: the trait the build system is consumed through.
//! - [`manifest`]: a TOML-manifest implementation of that trait.
//! - [`evaluation`]: turns an evaluated graph into the set of watched files.
//! - [`exclusions`]: output directories and exclude globs.

pub mod evaluation;
pub mod evaluator;
pub mod exclusions;
pub mod glob;
pub mod graph;
pub mod manifest;

pub use evaluation::{EvaluationOptions, EvaluationResult, FileItem, FileSetBuilder};
pub use evaluator::ProjectEvaluator;
pub use exclusions::FilePathExclusions;
pub use graph::{ProjectGraph, ProjectInstance, ProjectItem, ProjectNode};
pub use manifest::ManifestEvaluator;
