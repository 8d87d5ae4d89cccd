// src/lib.rs

pub mod browser;
pub mod build;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod report;
pub mod types;
pub mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::browser::{BrowserConnector, BrowserLauncher, DevCertProbe, DotnetDevCertProbe, SystemBrowserOpener};
use crate::build::ManifestEvaluator;
use crate::cli::CliArgs;
use crate::config::environment::EnvironmentOptions;
use crate::config::loader::load_for_project;
use crate::config::model::LaunchProfile;
use crate::engine::{WatchLoop, WatchOptions};
use crate::errors::DevWatchError;
use crate::exec::RealProcessLauncher;
use crate::fs::RealFileSystem;
use crate::report::{Reporter, TracingReporter};
use crate::watch::{FileWatcher, FileWatcherOptions};

/// Extension of project manifests.
pub const PROJECT_EXTENSION: &str = "proj";

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - environment and launch profile configuration
/// - the manifest evaluator and process launcher
/// - the browser connector (refresh servers, browser launch)
/// - the file watcher and the watch loop
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let environment = EnvironmentOptions::from_env().context("reading environment")?;
    let cwd = std::env::current_dir().context("reading current directory")?;
    let project = resolve_project(args.project.as_deref(), &cwd)?;
    info!(project = %project.display(), "watching project");

    let reporter: Arc<dyn Reporter> = Arc::new(TracingReporter::new());

    let launch_profile = if args.no_launch_profile {
        None
    } else {
        select_launch_profile(&project, args.launch_profile.as_deref(), reporter.as_ref())?
    };

    let mut options = WatchOptions::new(&project);
    options.properties = args.properties.iter().cloned().collect();
    options.target_framework = args.framework.clone();
    options.list = args.list;
    options.list_watched_files = args.verbose || environment.test_flags.running_as_test;
    options.suppress_static_files = environment.suppress_static_file_handling;
    options.dotnet_path = environment.dotnet_path.clone();
    options.application_arguments = args.application_args.clone();
    options.launch_profile = launch_profile;
    options.elevate_waiting_message = environment
        .test_flags
        .elevate_waiting_for_changes_message_severity;

    let evaluator = Arc::new(ManifestEvaluator::new(Arc::new(RealFileSystem)));
    let launcher = Arc::new(RealProcessLauncher::new());

    let probe_timeout = if environment.test_flags.running_as_test {
        None
    } else {
        Some(browser::tls::PROBE_TIMEOUT)
    };
    let probe: Arc<dyn DevCertProbe> =
        Arc::new(DotnetDevCertProbe::new(&environment.dotnet_path).with_timeout(probe_timeout));
    let opener = Arc::new(SystemBrowserOpener::new(environment.browser_path.clone()));
    let connector = Arc::new(BrowserConnector::new(
        environment.clone(),
        probe,
        BrowserLauncher::new(opener, Arc::clone(&reporter)),
        Arc::clone(&reporter),
    ));

    let watcher = FileWatcher::new(
        FileWatcherOptions {
            use_polling: environment.use_polling_file_watcher,
            polling_interval: environment.polling_interval,
            ..FileWatcherOptions::default()
        },
        Arc::clone(&reporter),
    );

    // Ctrl-C → graceful shutdown.
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            debug!("Ctrl+C received");
            shutdown.cancel();
        });
    }

    let watch_loop = WatchLoop::new(
        options,
        evaluator,
        launcher,
        connector,
        reporter,
        watcher,
    );
    watch_loop.run(shutdown).await?;
    Ok(())
}

/// The project to watch: an explicit file, the single manifest in an
/// explicit directory, or the single manifest in `cwd`.
pub fn resolve_project(project: Option<&Path>, cwd: &Path) -> Result<PathBuf, DevWatchError> {
    let candidate = match project {
        Some(path) => cwd.join(path),
        None => cwd.to_path_buf(),
    };
    if candidate.is_file() {
        return Ok(candidate);
    }
    if !candidate.is_dir() {
        return Err(DevWatchError::ConfigError(format!(
            "project '{}' does not exist",
            candidate.display()
        )));
    }

    let mut manifests: Vec<PathBuf> = std::fs::read_dir(&candidate)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(PROJECT_EXTENSION))
        })
        .collect();
    manifests.sort();

    match manifests.len() {
        1 => Ok(manifests.remove(0)),
        0 => Err(DevWatchError::ConfigError(format!(
            "no *.{PROJECT_EXTENSION} project found in '{}'",
            candidate.display()
        ))),
        _ => Err(DevWatchError::ConfigError(format!(
            "multiple *.{PROJECT_EXTENSION} projects found in '{}'; pass --project",
            candidate.display()
        ))),
    }
}

/// Launch profile from `devwatch.toml` next to the project. A named profile
/// that does not exist is reported and ignored.
fn select_launch_profile(
    project: &Path,
    name: Option<&str>,
    reporter: &dyn Reporter,
) -> Result<Option<LaunchProfile>> {
    let Some(directory) = project.parent() else {
        return Ok(None);
    };
    let Some(settings) = load_for_project(directory)
        .with_context(|| format!("loading launch settings for '{}'", project.display()))?
    else {
        return Ok(None);
    };

    let profile = settings.select(name).cloned();
    match (&profile, name) {
        (None, Some(name)) => {
            reporter.warn(&format!("Launch profile '{name}' not found; ignoring launch settings."));
        }
        (Some(profile), _) => debug!(profile = %profile.name, "using launch profile"),
        (None, None) => {}
    }
    Ok(profile)
}
