// src/watch/directory.rs

//! One `notify` watch on one directory.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::report::{messages, Reporter};
use crate::types::{ChangeKind, ChangedPath};
use crate::watch::path_utils::{is_within, names_equal, paths_equal};

/// Callback handed to a `notify` backend.
pub type EventCallback = Box<dyn FnMut(notify::Result<Event>) + Send + 'static>;

/// Creates `notify` backends. Production uses [`NotifyBackendFactory`];
/// tests can simulate an unavailable native watcher.
pub trait WatcherBackendFactory: Send + Sync + fmt::Debug {
    fn native(&self, callback: EventCallback) -> notify::Result<Box<dyn Watcher + Send>>;

    fn polling(
        &self,
        callback: EventCallback,
        interval: Duration,
    ) -> notify::Result<Box<dyn Watcher + Send>>;
}

#[derive(Debug, Clone, Default)]
pub struct NotifyBackendFactory;

impl WatcherBackendFactory for NotifyBackendFactory {
    fn native(&self, callback: EventCallback) -> notify::Result<Box<dyn Watcher + Send>> {
        Ok(Box::new(RecommendedWatcher::new(callback, Config::default())?))
    }

    fn polling(
        &self,
        callback: EventCallback,
        interval: Duration,
    ) -> notify::Result<Box<dyn Watcher + Send>> {
        let config = Config::default().with_poll_interval(interval);
        Ok(Box::new(PollWatcher::new(callback, config)?))
    }
}

/// What directory watchers send to their owning `FileWatcher`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WatchEvent {
    Change(ChangedPath),
    /// A native backend reported an error after it started.
    BackendFailed { directory: PathBuf, error: String },
}

/// Everything a directory watcher needs from its owning `FileWatcher`.
#[derive(Clone)]
pub(crate) struct WatchContext {
    pub factory: Arc<dyn WatcherBackendFactory>,
    pub use_polling: bool,
    pub polling_interval: Duration,
    pub tx: mpsc::UnboundedSender<WatchEvent>,
    pub reporter: Arc<dyn Reporter>,
}

/// Watches a single directory, either its direct children or the whole tree.
///
/// An empty file-name filter means every file in scope is reported.
pub struct DirectoryWatcher {
    directory: PathBuf,
    recursive: bool,
    file_names: Arc<RwLock<BTreeSet<OsString>>>,
    polling: bool,
    _backend: Box<dyn Watcher + Send>,
}

impl fmt::Debug for DirectoryWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryWatcher")
            .field("directory", &self.directory)
            .field("recursive", &self.recursive)
            .field("polling", &self.polling)
            .finish_non_exhaustive()
    }
}

impl DirectoryWatcher {
    pub(crate) fn start(
        directory: PathBuf,
        recursive: bool,
        file_names: BTreeSet<OsString>,
        ctx: &WatchContext,
    ) -> Result<Self> {
        let file_names = Arc::new(RwLock::new(file_names));
        let scope = Scope::new(&directory, recursive, Arc::clone(&file_names));

        if !ctx.use_polling {
            let native = ctx
                .factory
                .native(scope.clone().into_callback(ctx, true))
                .and_then(|mut backend| {
                    backend
                        .watch(&directory, recursive_mode(recursive))
                        .map(|_| backend)
                });

            match native {
                Ok(backend) => {
                    debug!(?directory, recursive, "native watcher started");
                    return Ok(Self {
                        directory,
                        recursive,
                        file_names,
                        polling: false,
                        _backend: backend,
                    });
                }
                Err(err) => {
                    warn!(?directory, error = %err, "native watcher unavailable; polling instead");
                    ctx.reporter.report(
                        &messages::USING_POLLING_FILE_WATCHER,
                        &[&err, &ctx.polling_interval.as_millis()],
                    );
                }
            }
        }

        let backend = start_polling(&directory, recursive, scope, ctx)?;
        Ok(Self {
            directory,
            recursive,
            file_names,
            polling: true,
            _backend: backend,
        })
    }

    /// Replace a failed native backend with a polling one over the same
    /// directory and file-name filter.
    pub(crate) fn fall_back_to_polling(&mut self, ctx: &WatchContext) -> Result<()> {
        let scope = Scope::new(&self.directory, self.recursive, Arc::clone(&self.file_names));
        self._backend = start_polling(&self.directory, self.recursive, scope, ctx)?;
        self.polling = true;
        Ok(())
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    pub fn is_polling(&self) -> bool {
        self.polling
    }

    /// Current file-name filter, sorted. Empty means all files.
    pub fn file_names(&self) -> Vec<String> {
        self.file_names
            .read()
            .map(|names| names.iter().map(|n| n.to_string_lossy().into_owned()).collect())
            .unwrap_or_default()
    }

    pub fn watches_all_files(&self) -> bool {
        self.file_names.read().map(|n| n.is_empty()).unwrap_or(true)
    }

    pub(crate) fn add_file_name(&self, name: OsString) {
        if let Ok(mut names) = self.file_names.write() {
            if !names.is_empty() {
                names.insert(name);
            }
        }
    }

    pub(crate) fn watch_all_files(&self) {
        if let Ok(mut names) = self.file_names.write() {
            names.clear();
        }
    }
}

fn recursive_mode(recursive: bool) -> RecursiveMode {
    if recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    }
}

fn start_polling(
    directory: &Path,
    recursive: bool,
    scope: Scope,
    ctx: &WatchContext,
) -> Result<Box<dyn Watcher + Send>> {
    let mut backend = ctx
        .factory
        .polling(scope.into_callback(ctx, false), ctx.polling_interval)?;
    backend.watch(directory, recursive_mode(recursive))?;
    debug!(?directory, recursive, "polling watcher started");
    Ok(backend)
}

/// Which event paths a watcher reports, evaluated on notify's thread.
#[derive(Clone)]
struct Scope {
    directory: PathBuf,
    canonical: Option<PathBuf>,
    recursive: bool,
    file_names: Arc<RwLock<BTreeSet<OsString>>>,
}

impl Scope {
    fn new(directory: &Path, recursive: bool, file_names: Arc<RwLock<BTreeSet<OsString>>>) -> Self {
        let canonical = directory
            .canonicalize()
            .ok()
            .filter(|c| !paths_equal(c, directory));
        Self {
            directory: directory.to_path_buf(),
            canonical,
            recursive,
            file_names,
        }
    }

    /// Map a backend-reported path onto the watched directory's spelling and
    /// decide whether it is in scope.
    fn accept(&self, path: &Path) -> Option<PathBuf> {
        let path = match &self.canonical {
            Some(canonical) if !is_within(path, &self.directory) => path
                .strip_prefix(canonical)
                .map(|rel| self.directory.join(rel))
                .ok()?,
            _ => path.to_path_buf(),
        };

        if paths_equal(&path, &self.directory) {
            return None;
        }

        let in_directory = if self.recursive {
            is_within(&path, &self.directory)
        } else {
            path.parent().map(|p| paths_equal(p, &self.directory)).unwrap_or(false)
        };
        if !in_directory {
            return None;
        }

        let names = self.file_names.read().ok()?;
        if names.is_empty() {
            return Some(path);
        }
        let name = path.file_name()?;
        names.iter().any(|n| names_equal(n, name)).then_some(path)
    }

    /// Events keep flowing while the owning watcher is suspended; filtering
    /// out build output is left to the consumer.
    fn into_callback(self, ctx: &WatchContext, native: bool) -> EventCallback {
        let tx = ctx.tx.clone();

        // A send error means the FileWatcher was dropped.
        Box::new(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for change in changes_from_event(event) {
                    if let Some(path) = self.accept(&change.path) {
                        let _ = tx.send(WatchEvent::Change(ChangedPath::new(path, change.kind)));
                    }
                }
            }
            Err(err) if native => {
                warn!(directory = ?self.directory, error = %err, "native watcher failed");
                let _ = tx.send(WatchEvent::BackendFailed {
                    directory: self.directory.clone(),
                    error: err.to_string(),
                });
            }
            Err(err) => {
                warn!(directory = ?self.directory, error = %err, "file watch error");
            }
        })
    }
}

/// Translate one `notify` event into path changes.
pub fn changes_from_event(event: Event) -> Vec<ChangedPath> {
    let kind = match event.kind {
        EventKind::Create(_) => ChangeKind::Added,
        EventKind::Remove(_) => ChangeKind::Removed,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => ChangeKind::Removed,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => ChangeKind::Added,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut paths = event.paths.into_iter();
            let mut out = Vec::with_capacity(2);
            if let Some(from) = paths.next() {
                out.push(ChangedPath::new(from, ChangeKind::Removed));
            }
            if let Some(to) = paths.next() {
                out.push(ChangedPath::new(to, ChangeKind::Added));
            }
            return out;
        }
        EventKind::Modify(ModifyKind::Name(_)) => ChangeKind::Renamed,
        EventKind::Modify(_) | EventKind::Any => ChangeKind::Modified,
        EventKind::Access(_) | EventKind::Other => return Vec::new(),
    };

    event
        .paths
        .into_iter()
        .map(|path| ChangedPath::new(path, kind))
        .collect()
}
