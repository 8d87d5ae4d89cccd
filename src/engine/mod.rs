// src/engine/mod.rs

//! The watch loop.
//!
//! The pure decision functions (which changes matter, whether they need a
//! re-evaluation, refresh versus restart) live in [`core`]; the async shell
//! that evaluates, builds, launches and waits lives in [`runtime`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::build::evaluation::FileItem;
use crate::config::model::LaunchProfile;
use crate::types::ChangeKind;

pub mod core;
pub mod runtime;

pub use runtime::WatchLoop;

/// A changed path resolved against the current evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    pub item: FileItem,
    pub kind: ChangeKind,
}

/// What to do about a batch of changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeAction {
    Ignore,
    /// Push these web-relative asset paths to connected browsers.
    RefreshStaticAssets(Vec<String>),
    /// Rebuild and relaunch; the string names the triggering change.
    Restart(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangePlan {
    pub requires_evaluation: bool,
    pub action: ChangeAction,
}

/// Everything the watch loop needs to know about the user's request.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub project: PathBuf,
    /// `-p NAME=VALUE` build properties.
    pub properties: BTreeMap<String, String>,
    pub target_framework: Option<String>,
    /// Print the watched files and exit.
    pub list: bool,
    /// Report every watched file after an evaluation.
    pub list_watched_files: bool,
    pub suppress_static_files: bool,
    pub dotnet_path: PathBuf,
    pub application_arguments: Vec<String>,
    pub launch_profile: Option<LaunchProfile>,
    pub elevate_waiting_message: bool,
}

impl WatchOptions {
    pub fn new(project: impl Into<PathBuf>) -> Self {
        Self {
            project: project.into(),
            properties: BTreeMap::new(),
            target_framework: None,
            list: false,
            list_watched_files: false,
            suppress_static_files: false,
            dotnet_path: PathBuf::from("dotnet"),
            application_arguments: Vec::new(),
            launch_profile: None,
            elevate_waiting_message: false,
        }
    }
}
