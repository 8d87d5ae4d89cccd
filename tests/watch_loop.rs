// tests/watch_loop.rs

mod common;
use crate::common::builders::{GraphBuilder, ProjectBuilder};
use crate::common::{eventually, init_tracing, project_dir, write_file};

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use devwatch::browser::launcher::{BrowserLauncher, BrowserOpener, OpenFuture};
use devwatch::browser::server::ENDPOINT_ENV_VAR;
use devwatch::browser::tls::NoDevCert;
use devwatch::browser::BrowserConnector;
use devwatch::build::evaluator::ProjectEvaluator;
use devwatch::build::graph::{ProjectGraph, ProjectItem};
use devwatch::config::environment::EnvironmentOptions;
use devwatch::config::model::LaunchProfile;
use devwatch::engine::runtime::{DOTNET_WATCH_ENV_VAR, DOTNET_WATCH_ITERATION_ENV_VAR};
use devwatch::engine::{WatchLoop, WatchOptions};
use devwatch::report::{messages, Reporter};
use devwatch::watch::{FileWatcher, FileWatcherOptions};
use devwatch_test_utils::fake_evaluator::FakeEvaluator;
use devwatch_test_utils::fake_process::FakeProcessLauncher;
use devwatch_test_utils::recording_reporter::RecordingReporter;
use futures::StreamExt;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

struct NeverOpens;

impl BrowserOpener for NeverOpens {
    fn open<'a>(&'a self, _url: &'a str) -> OpenFuture<'a> {
        Box::pin(async { false })
    }
}

/// One watch session over a temp project, driven by fakes.
struct Session {
    _dir: tempfile::TempDir,
    root: PathBuf,
    project: PathBuf,
    evaluator: Arc<FakeEvaluator>,
    launcher: FakeProcessLauncher,
    reporter: Arc<RecordingReporter>,
    connector: Arc<BrowserConnector>,
    shutdown: CancellationToken,
}

impl Session {
    fn new(web: bool) -> Self {
        init_tracing();
        let dir = project_dir();
        let root = dir.path().canonicalize().expect("canonical temp dir").join("App");
        let project = write_file(&root, "App.proj", "");
        write_file(&root, "Program.cs", "class Program {}");

        let mut builder = ProjectBuilder::new(project.clone()).property("DefaultItemExcludes", "bin/**;obj/**");
        if web {
            builder = builder.web();
        }
        let graph = GraphBuilder::new().project(builder.build()).build();
        let evaluator = Arc::new(FakeEvaluator::new(graph));
        evaluator.set_items(project.clone(), vec![ProjectItem::new("Compile", "Program.cs")]);

        let reporter = Arc::new(RecordingReporter::new());
        let connector = Arc::new(BrowserConnector::new(
            EnvironmentOptions::default(),
            Arc::new(NoDevCert),
            BrowserLauncher::new(Arc::new(NeverOpens), Arc::clone(&reporter) as Arc<dyn Reporter>),
            Arc::clone(&reporter) as Arc<dyn Reporter>,
        ));

        Self {
            _dir: dir,
            root,
            project,
            evaluator,
            launcher: FakeProcessLauncher::new(),
            reporter,
            connector,
            shutdown: CancellationToken::new(),
        }
    }

    fn graph(&self, web: bool) -> ProjectGraph {
        let mut builder = ProjectBuilder::new(self.project.clone());
        if web {
            builder = builder.web();
        }
        GraphBuilder::new().project(builder.build()).build()
    }

    fn options(&self) -> WatchOptions {
        WatchOptions::new(&self.project)
    }

    /// Run the loop until `driver` finishes, then shut it down.
    async fn run<F>(&self, options: WatchOptions, driver: F)
    where
        F: Future<Output = ()>,
    {
        let watcher = FileWatcher::new(
            FileWatcherOptions::default(),
            Arc::clone(&self.reporter) as Arc<dyn Reporter>,
        );
        let watch_loop = WatchLoop::new(
            options,
            Arc::clone(&self.evaluator) as Arc<dyn ProjectEvaluator>,
            Arc::new(self.launcher.clone()),
            Arc::clone(&self.connector),
            Arc::clone(&self.reporter) as Arc<dyn Reporter>,
            watcher,
        );
        let shutdown = self.shutdown.clone();
        let driver = async {
            driver.await;
            shutdown.cancel();
        };

        let (result, ()) = tokio::time::timeout(
            Duration::from_secs(30),
            async { tokio::join!(watch_loop.run(self.shutdown.clone()), driver) },
        )
        .await
        .expect("watch session timed out");
        result.expect("watch loop succeeds");
    }

    async fn wait_for_applications(&self, count: usize) {
        assert!(
            eventually(|| self.launcher.applications().len() >= count).await,
            "expected {count} launches, got {}",
            self.launcher.applications().len()
        );
    }

    fn touch(&self, relative: &str, contents: &str) {
        write_file(&self.root, relative, contents);
    }
}

#[tokio::test]
async fn builds_launches_and_restarts_on_source_change() {
    let session = Session::new(false);

    session
        .run(session.options(), async {
            session.wait_for_applications(1).await;
            let first = session.launcher.applications()[0].clone();
            session.touch("Program.cs", "class Program { static void Main() {} }");

            session.wait_for_applications(2).await;
            assert!(first.was_terminated());
        })
        .await;

    let builds = session.launcher.builds();
    assert!(builds.len() >= 2);
    assert_eq!(
        builds[0].spec.arguments,
        vec!["build".to_string(), session.project.display().to_string()]
    );

    let apps = session.launcher.applications();
    let spec = &apps[0].spec;
    assert_eq!(
        spec.arguments,
        vec![
            "run".to_string(),
            "--no-build".to_string(),
            "--no-launch-profile".to_string(),
            "--project".to_string(),
            session.project.display().to_string(),
        ]
    );
    assert_eq!(spec.env_value(DOTNET_WATCH_ENV_VAR), Some("1"));
    assert_eq!(spec.env_value(DOTNET_WATCH_ITERATION_ENV_VAR), Some("1"));
    assert_eq!(apps[1].spec.env_value(DOTNET_WATCH_ITERATION_ENV_VAR), Some("2"));
    assert!(spec.env_value(ENDPOINT_ENV_VAR).is_none());

    // The evaluation was reused for the restart.
    assert_eq!(session.evaluator.load_count(), 1);
    assert!(session
        .reporter
        .texts(&messages::FILE_CHANGES)
        .contains(&"File updated: ./Program.cs".to_string()));
    assert!(session.reporter.contains(&messages::SKIPPING_BROWSER_REFRESH_NOT_WEB_APP));
    assert!(session.reporter.contains(&messages::SHUTDOWN_REQUESTED));
    assert!(session.launcher.applications().iter().all(|p| p.was_terminated()));
}

#[tokio::test]
async fn options_and_launch_profile_flow_into_the_commands() {
    let session = Session::new(false);
    let mut options = session.options();
    options.properties.insert("Configuration".to_string(), "Release".to_string());
    options.target_framework = Some("net8.0".to_string());
    options.application_arguments = vec!["--port".to_string(), "9000".to_string()];
    options.launch_profile = Some(LaunchProfile {
        name: "http".to_string(),
        application_urls: vec!["http://localhost:5080".to_string()],
        environment: [("ASPNETCORE_ENVIRONMENT".to_string(), "Development".to_string())].into(),
        ..LaunchProfile::default()
    });

    session
        .run(options, async {
            session.wait_for_applications(1).await;
        })
        .await;

    let build = &session.launcher.builds()[0].spec;
    assert!(build.arguments.contains(&"-p:Configuration=Release".to_string()));
    assert!(build.arguments.ends_with(&["--framework".to_string(), "net8.0".to_string()]));

    let app = &session.launcher.applications()[0].spec;
    assert!(app.arguments.ends_with(&[
        "--framework".to_string(),
        "net8.0".to_string(),
        "--".to_string(),
        "--port".to_string(),
        "9000".to_string(),
    ]));
    assert_eq!(app.env_value("ASPNETCORE_ENVIRONMENT"), Some("Development"));
    assert_eq!(app.env_value("ASPNETCORE_URLS"), Some("http://localhost:5080"));
    assert_eq!(app.working_directory.as_deref(), Some(session.root.as_path()));

    let global = session.evaluator.last_global_properties().expect("loaded");
    assert_eq!(global.get("Configuration").map(String::as_str), Some("Release"));
    assert_eq!(global.get("TargetFramework").map(String::as_str), Some("net8.0"));
    assert_eq!(global.get("DesignTimeBuild").map(String::as_str), Some("true"));
}

#[tokio::test]
async fn failed_build_waits_for_a_change() {
    let session = Session::new(false);
    session.launcher.set_build_exit_code(Some(1));

    session
        .run(session.options(), async {
            assert!(eventually(|| session.reporter.contains(&messages::BUILD_FAILED)).await);
            assert!(eventually(|| session
                .reporter
                .contains(&messages::WAITING_FOR_FILE_CHANGE_BEFORE_RESTARTING))
            .await);
            assert!(session.launcher.applications().is_empty());

            session.launcher.set_build_exit_code(Some(0));
            session.touch("Program.cs", "class Program { }");
            session.wait_for_applications(1).await;
        })
        .await;

    assert!(session.launcher.builds().len() >= 2);
    assert!(session.reporter.contains(&messages::BUILD_SUCCEEDED));
}

#[tokio::test]
async fn failed_evaluation_asks_for_a_fix_and_retries() {
    let session = Session::new(false);
    let graph = session.graph(false);
    session.evaluator.set_graph(None);

    session
        .run(session.options(), async {
            assert!(eventually(|| session.reporter.contains(&messages::FIX_BUILD_ERROR)).await);
            assert!(session.launcher.processes().is_empty());

            session.evaluator.set_graph(Some(graph.clone()));
            session.touch("App.proj", "sdk = \"Microsoft.NET.Sdk\"");
            session.wait_for_applications(1).await;
        })
        .await;

    assert!(session.evaluator.load_count() >= 2);
}

#[tokio::test]
async fn app_exit_is_reported_and_a_change_restarts_it() {
    let session = Session::new(false);

    session
        .run(session.options(), async {
            session.wait_for_applications(1).await;
            session.launcher.applications()[0].exit(Some(3));
            assert!(eventually(|| session
                .reporter
                .texts(&messages::EXITED_WITH_ERROR_CODE)
                .contains(&"Exited with error code 3".to_string()))
            .await);

            session.touch("Program.cs", "class Program { int x; }");
            session.wait_for_applications(2).await;
        })
        .await;

    assert!(!session.launcher.applications()[0].was_terminated());
}

#[tokio::test]
async fn new_source_file_triggers_re_evaluation() {
    let session = Session::new(false);

    session
        .run(session.options(), async {
            session.wait_for_applications(1).await;
            session
                .evaluator
                .add_item(session.project.clone(), ProjectItem::new("Compile", "Greeter.cs"));
            session.touch("Greeter.cs", "class Greeter {}");

            session.wait_for_applications(2).await;
        })
        .await;

    assert!(session.reporter.contains(&messages::FILE_ADDITION_TRIGGERED_RE_EVALUATION));
    assert!(session.reporter.contains(&messages::RE_EVALUATION_COMPLETED));
    assert!(session.evaluator.load_count() >= 2);
}

#[tokio::test]
async fn deleted_source_file_is_dropped_from_the_next_run() {
    let session = Session::new(false);
    let helper = session.root.join("Helper.cs");
    session.touch("Helper.cs", "class Helper {}");
    session.evaluator.set_items(
        session.project.clone(),
        vec![
            ProjectItem::new("Compile", "Program.cs"),
            ProjectItem::new("Compile", "Helper.cs"),
        ],
    );
    let options = WatchOptions {
        list_watched_files: true,
        ..session.options()
    };

    session
        .run(options, async {
            session.wait_for_applications(1).await;
            session
                .evaluator
                .set_items(session.project.clone(), vec![ProjectItem::new("Compile", "Program.cs")]);
            std::fs::remove_file(&helper).expect("remove helper");

            session.wait_for_applications(2).await;
        })
        .await;

    assert!(session.reporter.contains(&messages::FILE_REMOVAL_TRIGGERED_RE_EVALUATION));
    let listed = session.reporter.texts(&messages::WATCHING_FILES_FOR_CHANGES_FILE_PATH);
    let program = format!("> {}", session.root.join("Program.cs").display());
    assert!(listed.iter().filter(|line| **line == program).count() >= 2, "{listed:?}");
    let helper_line = format!("> {}", helper.display());
    assert_eq!(listed.iter().filter(|line| **line == helper_line).count(), 1, "{listed:?}");

    // Every evaluation restores, not just the first.
    let restores = session
        .evaluator
        .builds()
        .iter()
        .filter(|(_, targets)| targets.iter().any(|t| t == "Restore"))
        .count();
    assert!(restores >= 2, "restores: {restores}");
}

#[tokio::test]
async fn changes_in_excluded_output_are_ignored() {
    let session = Session::new(false);
    session.touch("bin/Debug/App.dll", "");

    session
        .run(session.options(), async {
            session.wait_for_applications(1).await;
            session.touch("bin/Debug/App.dll", "MZ");
            assert!(eventually(|| session
                .reporter
                .contains(&messages::IGNORING_CHANGE_IN_EXCLUDED_FILE))
            .await);
            tokio::time::sleep(Duration::from_millis(200)).await;
        })
        .await;

    assert_eq!(session.launcher.applications().len(), 1);
    assert_eq!(session.evaluator.load_count(), 1);
}

#[tokio::test]
async fn static_asset_change_is_pushed_to_the_browser_without_restart() {
    let session = Session::new(true);
    session.touch("wwwroot/site.css", "body { }");
    session.evaluator.set_items(
        session.project.clone(),
        vec![
            ProjectItem::new("Compile", "Program.cs"),
            ProjectItem::new("Content", "wwwroot/site.css"),
        ],
    );

    session
        .run(session.options(), async {
            session.wait_for_applications(1).await;
            let endpoint = session.launcher.applications()[0]
                .spec
                .env_value(ENDPOINT_ENV_VAR)
                .expect("refresh endpoint passed to the app")
                .to_string();
            assert!(endpoint.starts_with("ws://localhost:"), "{endpoint}");

            let server = session
                .connector
                .refresh_server(&session.project)
                .await
                .expect("refresh server");
            let address = server.server_urls()[0].replacen("http://", "ws://", 1);
            let (mut browser, _) = tokio_tungstenite::connect_async(address).await.expect("connects");
            assert!(eventually(|| server.connection_count() == 1).await);

            session.touch("wwwroot/site.css", "body { color: red; }");
            let text = loop {
                match browser.next().await {
                    Some(Ok(Message::Text(text))) => break text.to_string(),
                    Some(Ok(_)) => continue,
                    other => panic!("browser connection ended: {other:?}"),
                }
            };
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert_eq!(value["type"], "UpdateStaticFile");
            assert_eq!(value["path"], "wwwroot/site.css");
            assert!(eventually(|| session
                .reporter
                .contains(&messages::HOT_RELOAD_OF_STATIC_ASSETS_SUCCEEDED))
            .await);
            browser.close(None).await.ok();
        })
        .await;

    assert_eq!(session.launcher.applications().len(), 1);
    assert!(session.reporter.contains(&messages::CONFIGURED_TO_USE_BROWSER_REFRESH));
}

#[tokio::test]
async fn list_prints_files_without_building() {
    let session = Session::new(false);
    let mut options = session.options();
    options.list = true;

    let watcher = FileWatcher::new(
        FileWatcherOptions::default(),
        Arc::clone(&session.reporter) as Arc<dyn Reporter>,
    );
    let watch_loop = WatchLoop::new(
        options,
        Arc::clone(&session.evaluator) as Arc<dyn ProjectEvaluator>,
        Arc::new(session.launcher.clone()),
        Arc::clone(&session.connector),
        Arc::clone(&session.reporter) as Arc<dyn Reporter>,
        watcher,
    );
    tokio::time::timeout(Duration::from_secs(10), watch_loop.run(CancellationToken::new()))
        .await
        .expect("list finishes")
        .expect("list succeeds");

    assert!(session.launcher.processes().is_empty());
    assert_eq!(session.evaluator.load_count(), 1);
}

#[tokio::test]
async fn shutdown_during_the_first_evaluation_exits_cleanly() {
    let session = Session::new(false);
    session.shutdown.cancel();

    session.run(session.options(), async {}).await;

    assert!(session.launcher.processes().is_empty());
    assert!(session.reporter.contains(&messages::SHUTDOWN_REQUESTED));
}
