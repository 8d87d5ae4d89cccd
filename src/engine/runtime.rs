// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::browser::connector::{BrowserConnector, BrowserLaunchSettings, BrowserRefresher};
use crate::browser::server::BrowserRefreshServer;
use crate::build::evaluation::{EvaluationOptions, EvaluationResult};
use crate::build::evaluator::ProjectEvaluator;
use crate::engine::core;
use crate::engine::{ChangeAction, WatchOptions};
use crate::errors::Result;
use crate::exec::{ProcessLauncher, ProcessSpec, RunningProcess};
use crate::report::{MessageSeverity, Reporter, messages};
use crate::types::ChangedPath;
use crate::watch::FileWatcher;

/// Environment variable telling the app it runs under the watcher.
pub const DOTNET_WATCH_ENV_VAR: &str = "DOTNET_WATCH";
/// Environment variable carrying the 1-based launch count.
pub const DOTNET_WATCH_ITERATION_ENV_VAR: &str = "DOTNET_WATCH_ITERATION";

enum LoopEvent {
    Shutdown,
    Exited(Option<i32>),
    Changes(Option<Vec<ChangedPath>>),
}

enum BatchOutcome {
    Ignored,
    Refreshed,
    Restart,
    /// A re-evaluation failed; the next iteration has to evaluate again.
    EvaluationFailed,
}

enum IterationEnd {
    /// Start over, reusing the evaluation when it is still current.
    Restart(Option<EvaluationResult>),
    Shutdown,
}

/// Evaluate, build, launch, wait for changes, repeat.
///
/// Collaborators are injected so the loop can be driven by fakes: the
/// evaluator, the process launcher, the browser connector and the watcher.
pub struct WatchLoop {
    options: WatchOptions,
    evaluator: Arc<dyn ProjectEvaluator>,
    launcher: Arc<dyn ProcessLauncher>,
    connector: Arc<BrowserConnector>,
    reporter: Arc<dyn Reporter>,
    watcher: FileWatcher,
}

impl fmt::Debug for WatchLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchLoop")
            .field("options", &self.options)
            .field("watcher", &self.watcher)
            .finish_non_exhaustive()
    }
}

impl WatchLoop {
    pub fn new(
        options: WatchOptions,
        evaluator: Arc<dyn ProjectEvaluator>,
        launcher: Arc<dyn ProcessLauncher>,
        connector: Arc<BrowserConnector>,
        reporter: Arc<dyn Reporter>,
        watcher: FileWatcher,
    ) -> Self {
        Self {
            options,
            evaluator,
            launcher,
            connector,
            reporter,
            watcher,
        }
    }

    /// Run until `shutdown` is cancelled (or, with `list`, until the files
    /// have been printed).
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        info!(project = %self.options.project.display(), "watch loop started");

        let mut pending: Option<EvaluationResult> = None;
        let mut iteration: u32 = 0;

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let evaluation = match pending.take() {
                Some(evaluation) => evaluation,
                None => match self.evaluate().await {
                    Some(evaluation) => evaluation,
                    None => {
                        self.reporter.report(&messages::FIX_BUILD_ERROR, &[]);
                        self.watcher
                            .watch_containing_directories([&self.options.project], true);
                        if !self.wait_for_change(None, &shutdown).await {
                            break;
                        }
                        continue;
                    }
                },
            };

            if self.options.list {
                for item in evaluation.files().values() {
                    println!("{}", item.file_path.display());
                }
                return Ok(());
            }

            evaluation.watch_files(&mut self.watcher);

            // Changes made during the build are held back, not lost.
            let built = {
                let _suspended = self.watcher.suspend();
                self.build(&shutdown).await
            };
            if shutdown.is_cancelled() {
                break;
            }
            if !built {
                self.reporter
                    .report(&messages::WAITING_FOR_FILE_CHANGE_BEFORE_RESTARTING, &[]);
                if !self.wait_for_change(Some(&evaluation), &shutdown).await {
                    break;
                }
                continue;
            }

            iteration += 1;
            match self.run_iteration(evaluation, iteration, &shutdown).await {
                IterationEnd::Restart(next) => pending = next,
                IterationEnd::Shutdown => break,
            }
        }

        self.reporter.report(&messages::SHUTDOWN_REQUESTED, &[]);
        self.connector.shutdown().await;
        info!("watch loop finished");
        Ok(())
    }

    async fn run_iteration(
        &mut self,
        evaluation: EvaluationResult,
        iteration: u32,
        shutdown: &CancellationToken,
    ) -> IterationEnd {
        let server = match evaluation.root_project() {
            Some(root) => self.connector.get_or_create_refresh_server(root).await,
            None => None,
        };

        let spec = self.application_spec(iteration, server.as_deref());
        let mut process = match self.launcher.launch(spec.clone()).await {
            Ok(process) => process,
            Err(err) => {
                self.reporter.report(
                    &messages::FAILED_TO_LAUNCH_PROCESS,
                    &[&spec.executable.display(), &spec.arguments_display(), &err],
                );
                self.reporter
                    .report(&messages::WAITING_FOR_FILE_CHANGE_BEFORE_RESTARTING, &[]);
                return if self.wait_for_change(Some(&evaluation), shutdown).await {
                    IterationEnd::Restart(Some(evaluation))
                } else {
                    IterationEnd::Shutdown
                };
            }
        };
        let pid = process
            .id()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "?".to_string());
        self.reporter.report(
            &messages::LAUNCHED_PROCESS,
            &[&spec.executable.display(), &spec.arguments_display(), &pid],
        );

        let settings = self
            .options
            .launch_profile
            .as_ref()
            .map(BrowserLaunchSettings::from)
            .unwrap_or_default();
        let refresher = server
            .clone()
            .map(|server| server as Arc<dyn BrowserRefresher>);
        let observer = self.connector.observe_output(
            self.options.project.clone(),
            process.subscribe_output(),
            settings,
            refresher,
            shutdown.child_token(),
        );

        let mut current = evaluation;
        let end = loop {
            self.report_waiting_for_changes();

            let event = tokio::select! {
                _ = shutdown.cancelled() => LoopEvent::Shutdown,
                code = process.wait() => LoopEvent::Exited(code),
                batch = self.watcher.wait_for_changes(shutdown) => LoopEvent::Changes(batch),
            };

            match event {
                LoopEvent::Shutdown | LoopEvent::Changes(None) => break IterationEnd::Shutdown,
                LoopEvent::Exited(code) => {
                    self.report_exit(code);
                    self.reporter
                        .report(&messages::WAITING_FOR_FILE_CHANGE_BEFORE_RESTARTING, &[]);
                    break self.wait_for_restart(current, shutdown).await;
                }
                LoopEvent::Changes(Some(batch)) => {
                    match self
                        .handle_batch(batch, &mut current, server.as_deref(), shutdown)
                        .await
                    {
                        BatchOutcome::Ignored | BatchOutcome::Refreshed => continue,
                        BatchOutcome::Restart => break IterationEnd::Restart(Some(current)),
                        BatchOutcome::EvaluationFailed => break IterationEnd::Restart(None),
                    }
                }
            }
        };

        self.stop_application(&mut process, server.as_deref(), &end, shutdown)
            .await;
        observer.abort();
        end
    }

    async fn stop_application(
        &self,
        process: &mut RunningProcess,
        server: Option<&BrowserRefreshServer>,
        end: &IterationEnd,
        shutdown: &CancellationToken,
    ) {
        if let (IterationEnd::Restart(_), Some(server)) = (end, server) {
            server.send_wait_message(shutdown).await;
        }
        if !process.has_exited() {
            debug!(pid = ?process.id(), "terminating application");
            process.terminate().await;
        }
    }

    /// After the app exited on its own: wait for a change worth a restart.
    async fn wait_for_restart(
        &mut self,
        mut current: EvaluationResult,
        shutdown: &CancellationToken,
    ) -> IterationEnd {
        loop {
            let Some(batch) = self.watcher.wait_for_changes(shutdown).await else {
                return IterationEnd::Shutdown;
            };
            match self.handle_batch(batch, &mut current, None, shutdown).await {
                BatchOutcome::Ignored | BatchOutcome::Refreshed => continue,
                BatchOutcome::Restart => return IterationEnd::Restart(Some(current)),
                BatchOutcome::EvaluationFailed => return IterationEnd::Restart(None),
            }
        }
    }

    /// Filter, resolve and plan one batch, re-evaluating when the plan asks
    /// for it, then carry out static asset refreshes.
    async fn handle_batch(
        &mut self,
        batch: Vec<ChangedPath>,
        current: &mut EvaluationResult,
        server: Option<&BrowserRefreshServer>,
        shutdown: &CancellationToken,
    ) -> BatchOutcome {
        let reporter = Arc::clone(&self.reporter);
        let accepted: Vec<ChangedPath> = batch
            .into_iter()
            .filter(|change| core::accept_change(change, current, reporter.as_ref()))
            .collect();
        if accepted.is_empty() {
            return BatchOutcome::Ignored;
        }

        let mut changed = core::resolve_changed_files(&accepted, current);
        let base = self
            .options
            .project
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_default();
        reporter.report(
            &messages::FILE_CHANGES,
            &[&core::describe_changes(&changed, &base)],
        );

        let mut plan = core::plan_change(&changed, current);
        if plan.requires_evaluation {
            reporter.report(core::re_evaluation_reason(&changed, current), &[]);
            let Some(next) = self.evaluate().await else {
                return BatchOutcome::EvaluationFailed;
            };
            next.watch_files(&mut self.watcher);
            *current = next;
            reporter.report(&messages::RE_EVALUATION_COMPLETED, &[]);

            let previous = plan.action;
            changed = core::resolve_changed_files(&accepted, current);
            plan = core::plan_change(&changed, current);
            plan.action = core::keep_restart(previous, plan.action);
        }

        match plan.action {
            ChangeAction::Ignore => BatchOutcome::Ignored,
            ChangeAction::RefreshStaticAssets(paths) => match server {
                Some(server) => {
                    server.update_static_assets(&paths, shutdown).await;
                    reporter.report(&messages::HOT_RELOAD_OF_STATIC_ASSETS_SUCCEEDED, &[]);
                    BatchOutcome::Refreshed
                }
                None => BatchOutcome::Restart,
            },
            ChangeAction::Restart(reason) => {
                debug!(%reason, "restart required");
                BatchOutcome::Restart
            }
        }
    }

    /// Wait until a batch contains at least one acceptable change. False
    /// when shutting down.
    async fn wait_for_change(
        &mut self,
        evaluation: Option<&EvaluationResult>,
        shutdown: &CancellationToken,
    ) -> bool {
        loop {
            let Some(batch) = self.watcher.wait_for_changes(shutdown).await else {
                return false;
            };
            let accepted = batch.iter().any(|change| match evaluation {
                Some(evaluation) => core::accept_change(change, evaluation, self.reporter.as_ref()),
                None => core::accept_change_without_evaluation(change),
            });
            if accepted {
                return true;
            }
        }
    }

    /// Every evaluation restores first.
    async fn evaluate(&self) -> Option<EvaluationResult> {
        let evaluator = Arc::clone(&self.evaluator);
        let reporter = Arc::clone(&self.reporter);
        let project = self.options.project.clone();
        let properties = self.options.properties.clone();
        let options = EvaluationOptions {
            target_framework: self.options.target_framework.clone(),
            suppress_static_files: self.options.suppress_static_files,
            list_files: self.options.list_watched_files,
        };

        // Evaluation walks the filesystem synchronously.
        let task = tokio::task::spawn_blocking(move || {
            EvaluationResult::try_create(
                evaluator.as_ref(),
                &project,
                &properties,
                &options,
                true,
                reporter.as_ref(),
            )
        });
        match task.await {
            Ok(evaluation) => evaluation,
            Err(err) => {
                warn!(error = %err, "evaluation task failed");
                None
            }
        }
    }

    async fn build(&self, shutdown: &CancellationToken) -> bool {
        let project = &self.options.project;
        let mut spec = ProcessSpec::new(&self.options.dotnet_path)
            .arg("build")
            .arg(project.to_string_lossy());
        for (name, value) in &self.options.properties {
            spec = spec.arg(format!("-p:{name}={value}"));
        }
        if let Some(framework) = &self.options.target_framework {
            spec = spec.args(["--framework", framework.as_str()]);
        }
        if let Some(dir) = project.parent() {
            spec = spec.current_dir(dir);
        }

        self.reporter
            .report(&messages::BUILDING, &[&project.display()]);
        let mut process = match self.launcher.launch(spec.clone()).await {
            Ok(process) => process,
            Err(err) => {
                self.reporter.report(
                    &messages::FAILED_TO_LAUNCH_PROCESS,
                    &[&spec.executable.display(), &spec.arguments_display(), &err],
                );
                return false;
            }
        };

        let code = tokio::select! {
            _ = shutdown.cancelled() => {
                process.terminate().await;
                return false;
            }
            code = process.wait() => code,
        };

        if code == Some(0) {
            self.reporter
                .report(&messages::BUILD_SUCCEEDED, &[&project.display()]);
            true
        } else {
            self.reporter
                .report(&messages::BUILD_FAILED, &[&project.display()]);
            false
        }
    }

    fn application_spec(
        &self,
        iteration: u32,
        server: Option<&BrowserRefreshServer>,
    ) -> ProcessSpec {
        let project = &self.options.project;
        let mut spec = ProcessSpec::new(&self.options.dotnet_path)
            .args(["run", "--no-build", "--no-launch-profile", "--project"])
            .arg(project.to_string_lossy());
        if let Some(framework) = &self.options.target_framework {
            spec = spec.args(["--framework", framework.as_str()]);
        }
        if !self.options.application_arguments.is_empty() {
            spec = spec
                .arg("--")
                .args(self.options.application_arguments.iter().cloned());
        }
        if let Some(dir) = project.parent() {
            spec = spec.current_dir(dir);
        }

        if let Some(profile) = &self.options.launch_profile {
            for (name, value) in profile.environment_variables() {
                spec = spec.env(name, value);
            }
        }
        spec = spec
            .env(DOTNET_WATCH_ENV_VAR, "1")
            .env(DOTNET_WATCH_ITERATION_ENV_VAR, iteration.to_string());
        if let Some(server) = server {
            for (name, value) in server.environment() {
                spec = spec.env(name, value);
            }
        }
        spec
    }

    fn report_waiting_for_changes(&self) {
        let descriptor = if self.options.elevate_waiting_message {
            messages::WAITING_FOR_CHANGES.with_severity(MessageSeverity::Output)
        } else {
            messages::WAITING_FOR_CHANGES
        };
        self.reporter.report(&descriptor, &[]);
    }

    fn report_exit(&self, code: Option<i32>) {
        match code {
            Some(0) => self.reporter.report(&messages::EXITED, &[]),
            Some(code) => self
                .reporter
                .report(&messages::EXITED_WITH_ERROR_CODE, &[&code]),
            None => self
                .reporter
                .report(&messages::EXITED_WITH_UNKNOWN_ERROR_CODE, &[]),
        }
    }
}
