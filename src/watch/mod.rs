// src/watch/mod.rs

//! File watching and change detection.
//!
//! This module is responsible for:
//! - Wiring up `notify` backends per directory, with a polling fallback.
//! - Merging overlapping watches so one physical change is reported once.
//! - Folding raw events into one change per path per batch.
//!
//! It does **not** decide whether a change matters; that is the job of the
//! exclusion filter and the watch loop.

pub mod changes;
pub mod directory;
pub mod path_utils;
pub mod watcher;

pub use changes::{normalize_path_changes, resolve_renames};
pub use directory::{
    changes_from_event, DirectoryWatcher, EventCallback, NotifyBackendFactory,
    WatcherBackendFactory,
};
pub use watcher::{FileWatcher, FileWatcherOptions, SuspendGuard};
