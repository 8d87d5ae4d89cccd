// tests/file_watcher.rs

mod common;
use crate::common::builders::{evaluation_with_files, GraphBuilder, ProjectBuilder};
use crate::common::{init_tracing, project_dir, with_timeout, write_file, TestResult};

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use devwatch::engine::core::accept_change;
use devwatch::report::{messages, Reporter};
use devwatch::types::{ChangeKind, ChangedPath};
use devwatch::watch::{
    EventCallback, FileWatcher, FileWatcherOptions, NotifyBackendFactory, WatcherBackendFactory,
};
use devwatch_test_utils::recording_reporter::RecordingReporter;
use tokio_util::sync::CancellationToken;

fn watcher(options: FileWatcherOptions) -> (FileWatcher, Arc<RecordingReporter>) {
    let reporter = Arc::new(RecordingReporter::new());
    let watcher = FileWatcher::new(options, Arc::clone(&reporter) as Arc<dyn Reporter>);
    (watcher, reporter)
}

fn canonical_root(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().canonicalize().expect("canonical temp dir")
}

fn has(batch: &[ChangedPath], path: &Path, kind: ChangeKind) -> bool {
    batch.iter().any(|c| c.path == path && c.kind == kind)
}

/// Native backend that is never available.
#[derive(Debug)]
struct NoNativeWatcher;

impl WatcherBackendFactory for NoNativeWatcher {
    fn native(
        &self,
        _callback: EventCallback,
    ) -> notify::Result<Box<dyn notify::Watcher + Send>> {
        Err(notify::Error::generic("inotify limit reached"))
    }

    fn polling(
        &self,
        callback: EventCallback,
        interval: Duration,
    ) -> notify::Result<Box<dyn notify::Watcher + Send>> {
        NotifyBackendFactory.polling(callback, interval)
    }
}

/// Native backend that starts fine and only reports what the test fires.
#[derive(Default)]
struct ScriptedNative {
    callbacks: Mutex<Vec<EventCallback>>,
}

impl fmt::Debug for ScriptedNative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedNative").finish_non_exhaustive()
    }
}

impl ScriptedNative {
    fn fail(&self, message: &str) {
        for callback in self.callbacks.lock().unwrap().iter_mut() {
            callback(Err(notify::Error::generic(message)));
        }
    }
}

impl WatcherBackendFactory for ScriptedNative {
    fn native(
        &self,
        callback: EventCallback,
    ) -> notify::Result<Box<dyn notify::Watcher + Send>> {
        self.callbacks.lock().unwrap().push(callback);
        Ok(Box::new(notify::NullWatcher))
    }

    fn polling(
        &self,
        callback: EventCallback,
        interval: Duration,
    ) -> notify::Result<Box<dyn notify::Watcher + Send>> {
        NotifyBackendFactory.polling(callback, interval)
    }
}

#[test]
fn files_in_one_directory_share_a_watcher() {
    let dir = project_dir();
    let root = canonical_root(&dir);
    std::fs::create_dir_all(root.join("src")).unwrap();
    let (mut watcher, _reporter) = watcher(FileWatcherOptions::default());

    watcher.watch_files([root.join("src/B.cs"), root.join("src/A.cs")]);
    watcher.watch_files([root.join("src/A.cs")]);

    assert_eq!(
        watcher.watched_directories(),
        vec![(root.join("src"), vec!["A.cs".to_string(), "B.cs".to_string()])]
    );
    assert!(watcher.watched_directory_trees().is_empty());
}

#[test]
fn watching_a_whole_directory_clears_its_file_filter() {
    let dir = project_dir();
    let root = canonical_root(&dir);
    let (mut watcher, _reporter) = watcher(FileWatcherOptions::default());

    watcher.watch_files([root.join("App.proj")]);
    watcher.watch_containing_directories([root.join("Program.cs")], false);
    watcher.watch_files([root.join("Other.proj")]);

    assert_eq!(watcher.watched_directories(), vec![(root.clone(), Vec::new())]);
}

#[test]
fn a_tree_watch_subsumes_watches_beneath_it() {
    let dir = project_dir();
    let root = canonical_root(&dir);
    std::fs::create_dir_all(root.join("src/Pages")).unwrap();
    let (mut watcher, _reporter) = watcher(FileWatcherOptions::default());

    watcher.watch_files([root.join("src/Pages/Index.razor")]);
    watcher.watch_containing_directories([root.join("src/Pages/Index.razor")], true);
    assert_eq!(watcher.watched_directory_trees(), vec![root.join("src/Pages")]);

    watcher.watch_containing_directories([root.join("App.proj")], true);
    watcher.watch_files([root.join("src/Program.cs")]);

    assert_eq!(watcher.watched_directory_trees(), vec![root.clone()]);
    assert!(watcher.watched_directories().is_empty());
}

#[tokio::test]
async fn native_watcher_reports_new_and_updated_files() -> TestResult {
    init_tracing();
    let dir = project_dir();
    let root = canonical_root(&dir);
    let existing = write_file(&root, "src/Existing.cs", "class A {}");
    let (mut watcher, _reporter) = watcher(FileWatcherOptions::default());
    watcher.watch_containing_directories([root.join("App.proj")], true);
    let cancel = CancellationToken::new();

    let added = write_file(&root, "src/Added.cs", "class B {}");
    let batch = with_timeout(watcher.wait_for_changes(&cancel)).await.expect("batch");
    assert!(has(&batch, &added, ChangeKind::Added), "{batch:?}");

    std::fs::write(&existing, "class A { int x; }")?;
    // Late events for the new file may arrive in a batch of their own.
    with_timeout(async {
        loop {
            let batch = watcher.wait_for_changes(&cancel).await.expect("batch");
            if has(&batch, &existing, ChangeKind::Modified) {
                break;
            }
        }
    })
    .await;
    Ok(())
}

#[tokio::test]
async fn file_filter_hides_siblings() -> TestResult {
    let dir = project_dir();
    let root = canonical_root(&dir);
    let watched = write_file(&root, "App.proj", "");
    let (mut watcher, _reporter) = watcher(FileWatcherOptions::default());
    watcher.watch_files([&watched]);
    let cancel = CancellationToken::new();

    write_file(&root, "notes.txt", "ignored");
    std::fs::write(&watched, "sdk = \"Web\"")?;

    let batch = with_timeout(watcher.wait_for_changes(&cancel)).await.expect("batch");
    assert!(batch.iter().all(|c| c.path == watched), "{batch:?}");
    assert!(has(&batch, &watched, ChangeKind::Modified), "{batch:?}");
    Ok(())
}

#[tokio::test]
async fn changes_made_while_suspended_are_delivered_after_resume() -> TestResult {
    init_tracing();
    let dir = project_dir();
    let root = canonical_root(&dir);
    std::fs::create_dir_all(root.join("bin"))?;
    let project = write_file(&root, "App.proj", "");
    let (mut watcher, reporter) = watcher(FileWatcherOptions::default());
    watcher.watch_containing_directories([&project], true);
    let cancel = CancellationToken::new();

    let guard = watcher.suspend();
    assert!(watcher.is_suspended());
    let output = write_file(&root, "bin/App.dll", "");
    let source = write_file(&root, "Program.cs", "class P {}");
    let held = tokio::time::timeout(
        Duration::from_millis(300),
        watcher.wait_for_changes(&cancel),
    )
    .await;
    assert!(held.is_err(), "batch delivered while suspended: {held:?}");

    drop(guard);
    assert!(!watcher.is_suspended());
    let batch = with_timeout(watcher.wait_for_changes(&cancel)).await.expect("batch");
    assert!(has(&batch, &source, ChangeKind::Added), "{batch:?}");
    assert!(has(&batch, &output, ChangeKind::Added), "{batch:?}");

    // Build output is dropped by the exclusion filter, not by the watcher.
    let graph = GraphBuilder::new()
        .project(
            ProjectBuilder::new(project.clone())
                .property("DefaultItemExcludes", "bin/**")
                .property("OutputPath", "bin/")
                .build(),
        )
        .build();
    let evaluation = evaluation_with_files(graph, &[(source.to_str().unwrap(), None)]);
    let kept: Vec<&PathBuf> = batch
        .iter()
        .filter(|change| accept_change(change, &evaluation, &*reporter))
        .map(|change| &change.path)
        .collect();
    assert_eq!(kept, vec![&source]);
    Ok(())
}

#[tokio::test]
async fn a_cancelled_wait_keeps_the_changes_it_received() -> TestResult {
    let dir = project_dir();
    let root = canonical_root(&dir);
    let (mut watcher, _reporter) = watcher(FileWatcherOptions {
        settle_delay: Duration::from_millis(200),
        ..FileWatcherOptions::default()
    });
    watcher.watch_containing_directories([root.join("App.proj")], true);
    let cancel = CancellationToken::new();

    let added = write_file(&root, "Program.cs", "");
    tokio::time::sleep(Duration::from_millis(100)).await;
    // Gives up in the middle of the settle delay.
    let interrupted = tokio::time::timeout(
        Duration::from_millis(50),
        watcher.wait_for_changes(&cancel),
    )
    .await;
    assert!(interrupted.is_err(), "{interrupted:?}");

    let batch = with_timeout(watcher.wait_for_changes(&cancel)).await.expect("batch");
    assert!(has(&batch, &added, ChangeKind::Added), "{batch:?}");
    Ok(())
}

#[tokio::test]
async fn falls_back_to_polling_when_native_watching_fails() -> TestResult {
    init_tracing();
    let dir = project_dir();
    let root = canonical_root(&dir);
    let reporter = Arc::new(RecordingReporter::new());
    let mut watcher = FileWatcher::with_factory(
        FileWatcherOptions {
            polling_interval: Duration::from_millis(100),
            ..FileWatcherOptions::default()
        },
        Arc::clone(&reporter) as Arc<dyn Reporter>,
        Arc::new(NoNativeWatcher),
    );
    watcher.watch_containing_directories([root.join("App.proj")], true);

    assert_eq!(watcher.polling_watcher_count(), 1);
    let texts = reporter.texts(&messages::USING_POLLING_FILE_WATCHER);
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("100ms"), "{}", texts[0]);

    let cancel = CancellationToken::new();
    let added = write_file(&root, "Pages/Index.razor", "<h1/>");
    let batch = with_timeout(watcher.wait_for_changes(&cancel)).await.expect("batch");
    assert!(has(&batch, &added, ChangeKind::Added), "{batch:?}");
    Ok(())
}

#[tokio::test]
async fn native_watcher_failing_later_is_replaced_by_polling() -> TestResult {
    init_tracing();
    let dir = project_dir();
    let root = canonical_root(&dir);
    let reporter = Arc::new(RecordingReporter::new());
    let native = Arc::new(ScriptedNative::default());
    let mut watcher = FileWatcher::with_factory(
        FileWatcherOptions {
            polling_interval: Duration::from_millis(100),
            ..FileWatcherOptions::default()
        },
        Arc::clone(&reporter) as Arc<dyn Reporter>,
        Arc::clone(&native) as Arc<dyn WatcherBackendFactory>,
    );
    watcher.watch_containing_directories([root.join("App.proj")], true);
    assert_eq!(watcher.polling_watcher_count(), 0);

    native.fail("event queue overflowed");
    let cancel = CancellationToken::new();
    // The failure is handled while waiting; no file changed yet.
    let quiet = tokio::time::timeout(
        Duration::from_millis(300),
        watcher.wait_for_changes(&cancel),
    )
    .await;
    assert!(quiet.is_err(), "{quiet:?}");
    assert_eq!(watcher.polling_watcher_count(), 1);
    let texts = reporter.texts(&messages::USING_POLLING_FILE_WATCHER);
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("event queue overflowed"), "{}", texts[0]);

    let added = write_file(&root, "Program.cs", "");
    let batch = with_timeout(watcher.wait_for_changes(&cancel)).await.expect("batch");
    assert!(has(&batch, &added, ChangeKind::Added), "{batch:?}");
    Ok(())
}

#[tokio::test]
async fn polling_can_be_forced() -> TestResult {
    let dir = project_dir();
    let root = canonical_root(&dir);
    let (mut watcher, reporter) = watcher(FileWatcherOptions {
        use_polling: true,
        polling_interval: Duration::from_millis(100),
        ..FileWatcherOptions::default()
    });
    watcher.watch_containing_directories([root.join("App.proj")], true);
    assert_eq!(watcher.polling_watcher_count(), 1);
    assert!(!reporter.contains(&messages::USING_POLLING_FILE_WATCHER));

    let cancel = CancellationToken::new();
    let added = write_file(&root, "Program.cs", "");
    let batch = with_timeout(watcher.wait_for_changes(&cancel)).await.expect("batch");
    assert!(has(&batch, &added, ChangeKind::Added), "{batch:?}");
    Ok(())
}

#[tokio::test]
async fn cancellation_ends_the_wait() {
    let dir = project_dir();
    let root = canonical_root(&dir);
    let (mut watcher, _reporter) = watcher(FileWatcherOptions::default());
    watcher.watch_containing_directories([root.join("App.proj")], true);
    let cancel = CancellationToken::new();
    cancel.cancel();

    assert!(with_timeout(watcher.wait_for_changes(&cancel)).await.is_none());
}
