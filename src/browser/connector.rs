// src/browser/connector.rs

//! Decides which projects get a refresh server and when to open a browser.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::browser::connection::ConnectionIds;
use crate::browser::launcher::{self, BrowserLauncher};
use crate::browser::server::{BrowserRefreshServer, RefreshServerOptions};
use crate::browser::tls::DevCertProbe;
use crate::build::graph::ProjectInstance;
use crate::config::environment::{self, EnvironmentOptions};
use crate::config::model::LaunchProfile;
use crate::exec::OutputLine;
use crate::report::{Reporter, messages};

pub type RefreshFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Something that can tell connected browsers to reload.
pub trait BrowserRefresher: Send + Sync {
    fn refresh<'a>(&'a self, cancel: &'a CancellationToken) -> RefreshFuture<'a>;
}

impl BrowserRefresher for BrowserRefreshServer {
    fn refresh<'a>(&'a self, cancel: &'a CancellationToken) -> RefreshFuture<'a> {
        Box::pin(async move {
            self.send_reload_message(cancel).await;
        })
    }
}

/// Projects whose browser has been opened this session.
#[derive(Debug, Default)]
pub struct LaunchedProjects(Mutex<HashSet<PathBuf>>);

impl LaunchedProjects {
    /// True when this call added `project`.
    pub fn try_add(&self, project: &Path) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(project.to_path_buf())
    }

    pub fn contains(&self, project: &Path) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(project)
    }
}

/// Browser-related settings of one launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserLaunchSettings {
    pub launch_browser: bool,
    pub launch_url: Option<String>,
}

impl Default for BrowserLaunchSettings {
    fn default() -> Self {
        Self {
            launch_browser: true,
            launch_url: None,
        }
    }
}

impl From<&LaunchProfile> for BrowserLaunchSettings {
    fn from(profile: &LaunchProfile) -> Self {
        Self {
            launch_browser: profile.launch_browser,
            launch_url: profile.launch_url.clone(),
        }
    }
}

pub struct BrowserConnector {
    options: EnvironmentOptions,
    probe: Arc<dyn DevCertProbe>,
    ids: ConnectionIds,
    reporter: Arc<dyn Reporter>,
    launcher: BrowserLauncher,
    launched: LaunchedProjects,
    servers: tokio::sync::Mutex<HashMap<PathBuf, Option<Arc<BrowserRefreshServer>>>>,
}

impl BrowserConnector {
    pub fn new(
        options: EnvironmentOptions,
        probe: Arc<dyn DevCertProbe>,
        launcher: BrowserLauncher,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        let launcher = launcher.with_mock_browser(options.test_flags.mock_browser);
        Self {
            options,
            probe,
            ids: ConnectionIds::new(),
            reporter,
            launcher,
            launched: LaunchedProjects::default(),
            servers: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn launched_projects(&self) -> &LaunchedProjects {
        &self.launched
    }

    /// The project's refresh server, started on first request. `None` when
    /// refresh is suppressed, the project is not a web app, or the server
    /// failed to start (not retried).
    pub async fn get_or_create_refresh_server(
        &self,
        project: &ProjectInstance,
    ) -> Option<Arc<BrowserRefreshServer>> {
        if self.options.suppress_browser_refresh {
            self.reporter.report(
                &messages::SKIPPING_BROWSER_REFRESH_SUPPRESSED,
                &[&environment::SUPPRESS_BROWSER_REFRESH],
            );
            return None;
        }
        if !project.is_web_app() {
            self.reporter
                .report(&messages::SKIPPING_BROWSER_REFRESH_NOT_WEB_APP, &[]);
            return None;
        }

        let mut servers = self.servers.lock().await;
        if let Some(existing) = servers.get(&project.full_path) {
            return existing.clone();
        }

        let server = BrowserRefreshServer::new(
            RefreshServerOptions {
                host_override: self.options.auto_reload_ws_hostname.clone(),
                port: self.options.auto_reload_ws_port,
            },
            Arc::clone(&self.probe),
            self.ids.clone(),
            Arc::clone(&self.reporter),
        );
        let server = match server.start().await {
            Ok(()) => {
                self.reporter
                    .report(&messages::CONFIGURED_TO_USE_BROWSER_REFRESH, &[]);
                Some(Arc::new(server))
            }
            Err(err) => {
                self.reporter
                    .report(&messages::REFRESH_SERVER_FAILED_TO_START, &[&err]);
                None
            }
        };
        servers.insert(project.full_path.clone(), server.clone());
        server
    }

    pub async fn refresh_server(&self, project: &Path) -> Option<Arc<BrowserRefreshServer>> {
        self.servers.lock().await.get(project).cloned().flatten()
    }

    /// Stop every refresh server.
    pub async fn shutdown(&self) {
        let servers: Vec<_> = self.servers.lock().await.drain().collect();
        for (project, server) in servers {
            if let Some(server) = server {
                debug!(project = %project.display(), "stopping refresh server");
                server.shutdown().await;
            }
        }
    }

    /// Watch the app's output for the `Now listening on:` line. The receiver
    /// is dropped right after the first match. `cancel` aborts a pending
    /// browser reload.
    pub fn observe_output(
        self: &Arc<Self>,
        project: PathBuf,
        mut output: broadcast::Receiver<OutputLine>,
        settings: BrowserLaunchSettings,
        refresher: Option<Arc<dyn BrowserRefresher>>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let connector = Arc::clone(self);
        tokio::spawn(async move {
            let url = loop {
                match output.recv().await {
                    Ok(line) => {
                        if let Some(url) = launcher::parse_listening_url(&line.text) {
                            break url;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "output observer lagged");
                    }
                    Err(RecvError::Closed) => return,
                }
            };
            drop(output);
            connector
                .on_application_listening(&project, &url, &settings, refresher.as_deref(), &cancel)
                .await;
        })
    }

    /// First time for `project`: open a browser (unless suppressed).
    /// Otherwise ask connected browsers to reload.
    ///
    /// A suppressed launch does not count as the first one.
    pub async fn on_application_listening(
        &self,
        project: &Path,
        url: &str,
        settings: &BrowserLaunchSettings,
        refresher: Option<&dyn BrowserRefresher>,
        cancel: &CancellationToken,
    ) {
        let suppressed = !settings.launch_browser || self.options.suppress_launch_browser;
        if suppressed {
            debug!(project = %project.display(), "browser launch suppressed");
        } else if self.launched.try_add(project) {
            self.reporter
                .report(&messages::CONFIGURED_TO_LAUNCH_BROWSER, &[]);
            let target = launcher::resolve_launch_url(settings.launch_url.as_deref(), url);
            self.launcher.launch(&target).await;
            return;
        }

        if let Some(refresher) = refresher {
            refresher.refresh(cancel).await;
        }
    }
}
