// src/watch/watcher.rs

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::report::{messages, Reporter};
use crate::types::ChangedPath;
use crate::watch::changes::{normalize_path_changes, resolve_renames};
use crate::watch::directory::{
    DirectoryWatcher, NotifyBackendFactory, WatchContext, WatchEvent, WatcherBackendFactory,
};
use crate::watch::path_utils::{is_within, path_key};

/// Tuning knobs for [`FileWatcher`].
#[derive(Debug, Clone, Copy)]
pub struct FileWatcherOptions {
    /// Skip native notification and poll from the start.
    pub use_polling: bool,
    pub polling_interval: Duration,
    /// How long to keep collecting after the first change of a batch.
    pub settle_delay: Duration,
}

impl Default for FileWatcherOptions {
    fn default() -> Self {
        Self {
            use_polling: false,
            polling_interval: Duration::from_secs(1),
            settle_delay: Duration::from_millis(50),
        }
    }
}

/// Unified change stream over any number of directory and file watches.
///
/// Watches are merged: a recursive watch on a directory subsumes every
/// watch beneath it, and watching several files in one directory shares one
/// backend with a file-name filter.
pub struct FileWatcher {
    ctx: WatchContext,
    settle_delay: Duration,
    rx: mpsc::UnboundedReceiver<WatchEvent>,
    /// Changes received but not yet handed out. Survives a cancelled wait.
    pending: Vec<ChangedPath>,
    suspension: Arc<Suspension>,
    tree_watchers: BTreeMap<PathBuf, DirectoryWatcher>,
    directory_watchers: BTreeMap<PathBuf, DirectoryWatcher>,
}

impl fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileWatcher")
            .field("tree_watchers", &self.tree_watchers.keys().collect::<Vec<_>>())
            .field(
                "directory_watchers",
                &self.directory_watchers.keys().collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct Suspension {
    depth: AtomicUsize,
    resumed: Notify,
}

/// Holds back batches of a [`FileWatcher`] while alive. Changes keep being
/// collected and are delivered once the last guard is dropped.
#[must_use = "watching resumes as soon as the guard is dropped"]
pub struct SuspendGuard {
    suspension: Arc<Suspension>,
}

impl Drop for SuspendGuard {
    fn drop(&mut self) {
        if self.suspension.depth.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.suspension.resumed.notify_waiters();
        }
    }
}

impl FileWatcher {
    pub fn new(options: FileWatcherOptions, reporter: Arc<dyn Reporter>) -> Self {
        Self::with_factory(options, reporter, Arc::new(NotifyBackendFactory))
    }

    pub fn with_factory(
        options: FileWatcherOptions,
        reporter: Arc<dyn Reporter>,
        factory: Arc<dyn WatcherBackendFactory>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            ctx: WatchContext {
                factory,
                use_polling: options.use_polling,
                polling_interval: options.polling_interval,
                tx,
                reporter,
            },
            settle_delay: options.settle_delay,
            rx,
            pending: Vec::new(),
            suspension: Arc::default(),
            tree_watchers: BTreeMap::new(),
            directory_watchers: BTreeMap::new(),
        }
    }

    /// True once any directory (tree or single level) is being watched.
    pub fn is_watching(&self) -> bool {
        !self.tree_watchers.is_empty() || !self.directory_watchers.is_empty()
    }

    /// Watch individual files. Siblings share one watcher on their directory.
    pub fn watch_files<P: AsRef<Path>>(&mut self, files: impl IntoIterator<Item = P>) {
        for file in files {
            let file = file.as_ref();
            let (Some(dir), Some(name)) = (file.parent(), file.file_name()) else {
                continue;
            };
            self.add_directory_watcher(dir, Some(name.to_os_string()));
        }
    }

    /// Watch every file in the directories containing `paths`.
    pub fn watch_containing_directories<P: AsRef<Path>>(
        &mut self,
        paths: impl IntoIterator<Item = P>,
        include_subdirectories: bool,
    ) {
        let dirs: BTreeSet<PathBuf> = paths
            .into_iter()
            .filter_map(|p| p.as_ref().parent().map(Path::to_path_buf))
            .collect();

        for dir in dirs {
            if include_subdirectories {
                self.add_tree_watcher(&dir);
            } else {
                self.add_directory_watcher(&dir, None);
            }
        }
    }

    /// Watched directory trees, sorted.
    pub fn watched_directory_trees(&self) -> Vec<PathBuf> {
        self.tree_watchers.values().map(|w| w.directory().to_path_buf()).collect()
    }

    /// Watched single directories with their file-name filter (empty = all).
    pub fn watched_directories(&self) -> Vec<(PathBuf, Vec<String>)> {
        self.directory_watchers
            .values()
            .map(|w| (w.directory().to_path_buf(), w.file_names()))
            .collect()
    }

    /// Number of backends currently polling instead of using native events.
    pub fn polling_watcher_count(&self) -> usize {
        self.tree_watchers
            .values()
            .chain(self.directory_watchers.values())
            .filter(|w| w.is_polling())
            .count()
    }

    /// Hold back batches until the returned guard goes away.
    pub fn suspend(&self) -> SuspendGuard {
        self.suspension.depth.fetch_add(1, Ordering::SeqCst);
        SuspendGuard {
            suspension: Arc::clone(&self.suspension),
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.suspension.depth.load(Ordering::SeqCst) > 0
    }

    /// Wait for the next batch of changes, one entry per path.
    ///
    /// Returns `None` when cancelled. Cancel safe: changes received before
    /// cancellation are kept for the next call. Batches that normalize to
    /// nothing (e.g. a file created and deleted again) are skipped.
    pub async fn wait_for_changes(
        &mut self,
        cancel: &CancellationToken,
    ) -> Option<Vec<ChangedPath>> {
        loop {
            while self.pending.is_empty() {
                let event = tokio::select! {
                    _ = cancel.cancelled() => return None,
                    event = self.rx.recv() => event?,
                };
                self.absorb(event);
            }

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(self.settle_delay) => {}
            }
            self.wait_until_resumed(cancel).await?;
            while let Ok(event) = self.rx.try_recv() {
                self.absorb(event);
            }

            let batch = std::mem::take(&mut self.pending);
            let resolved = resolve_renames(batch, |p| p.exists());
            let normalized = normalize_path_changes(resolved);
            if !normalized.is_empty() {
                debug!(count = normalized.len(), "file change batch");
                return Some(normalized);
            }
        }
    }

    async fn wait_until_resumed(&self, cancel: &CancellationToken) -> Option<()> {
        loop {
            // Registered before the check so a resume in between is not missed.
            let resumed = self.suspension.resumed.notified();
            if !self.is_suspended() {
                return Some(());
            }
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = resumed => {}
            }
        }
    }

    fn absorb(&mut self, event: WatchEvent) {
        match event {
            WatchEvent::Change(change) => self.pending.push(change),
            WatchEvent::BackendFailed { directory, error } => {
                self.fall_back_to_polling(&directory, &error)
            }
        }
    }

    /// Swap a native backend that failed at runtime for a polling one.
    fn fall_back_to_polling(&mut self, directory: &Path, error: &str) {
        let key = path_key(directory);
        let watcher = match self.tree_watchers.get_mut(&key) {
            Some(watcher) => watcher,
            None => match self.directory_watchers.get_mut(&key) {
                Some(watcher) => watcher,
                // Already replaced by a covering tree watch.
                None => return,
            },
        };
        if watcher.is_polling() {
            return;
        }

        match watcher.fall_back_to_polling(&self.ctx) {
            Ok(()) => {
                info!(?directory, error, "native watcher replaced by polling");
                self.ctx.reporter.report(
                    &messages::USING_POLLING_FILE_WATCHER,
                    &[&error, &self.ctx.polling_interval.as_millis()],
                );
            }
            Err(err) => self.report_watch_failure(directory, &err),
        }
    }

    fn covering_tree(&self, dir: &Path) -> Option<&Path> {
        self.tree_watchers
            .values()
            .map(DirectoryWatcher::directory)
            .find(|tree| is_within(dir, tree))
    }

    fn add_tree_watcher(&mut self, dir: &Path) {
        if self.covering_tree(dir).is_some() {
            return;
        }

        // The new tree subsumes everything beneath it.
        self.tree_watchers.retain(|_, w| !is_within(w.directory(), dir));
        self.directory_watchers.retain(|_, w| !is_within(w.directory(), dir));

        match DirectoryWatcher::start(dir.to_path_buf(), true, BTreeSet::new(), &self.ctx) {
            Ok(watcher) => {
                self.tree_watchers.insert(path_key(dir), watcher);
            }
            Err(err) => self.report_watch_failure(dir, &err),
        }
    }

    fn add_directory_watcher(&mut self, dir: &Path, file_name: Option<OsString>) {
        if self.covering_tree(dir).is_some() {
            return;
        }

        let key = path_key(dir);
        if let Some(existing) = self.directory_watchers.get(&key) {
            match file_name {
                Some(name) => existing.add_file_name(name),
                None => existing.watch_all_files(),
            }
            return;
        }

        let names: BTreeSet<OsString> = file_name.into_iter().collect();
        match DirectoryWatcher::start(dir.to_path_buf(), false, names, &self.ctx) {
            Ok(watcher) => {
                self.directory_watchers.insert(key, watcher);
            }
            Err(err) => self.report_watch_failure(dir, &err),
        }
    }

    fn report_watch_failure(&self, dir: &Path, err: &crate::errors::DevWatchError) {
        warn!(?dir, error = %err, "unable to watch directory");
        self.ctx
            .reporter
            .warn(&format!("Unable to watch directory '{}': {err}", dir.display()));
    }
}
