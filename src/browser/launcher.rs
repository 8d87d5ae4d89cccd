// src/browser/launcher.rs

//! Opening the application URL in a browser.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;
use tracing::debug;
use url::Url;

use crate::report::{Reporter, messages};

/// The line ASP.NET Core prints once Kestrel is listening.
static NOW_LISTENING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Now listening on: (?<url>.*)\s*$").expect("constant regex")
});

/// A browser process still running after this long counts as launched.
const LAUNCH_GRACE: Duration = Duration::from_millis(500);

/// URL from a `Now listening on: <url>` line.
pub fn parse_listening_url(line: &str) -> Option<String> {
    let captures = NOW_LISTENING.captures(line)?;
    let url = captures.name("url")?.as_str().trim();
    (!url.is_empty()).then(|| url.to_string())
}

/// Absolute `launch_url` as is, relative `launch_url` resolved against the
/// server URL, no `launch_url` means the server URL itself.
pub fn resolve_launch_url(launch_url: Option<&str>, server_url: &str) -> String {
    let Some(launch_url) = launch_url.map(str::trim).filter(|u| !u.is_empty()) else {
        return server_url.to_string();
    };
    if Url::parse(launch_url).is_ok_and(|u| u.has_host()) {
        return launch_url.to_string();
    }
    match Url::parse(server_url).and_then(|base| base.join(launch_url)) {
        Ok(url) => url.to_string(),
        Err(err) => {
            debug!(server_url, launch_url, error = %err, "cannot resolve launch URL");
            server_url.to_string()
        }
    }
}

pub type OpenFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

pub trait BrowserOpener: Send + Sync {
    /// True when a browser was started for `url`.
    fn open<'a>(&'a self, url: &'a str) -> OpenFuture<'a>;
}

/// Opens URLs with the platform's default handler, or a configured browser.
#[derive(Debug, Clone, Default)]
pub struct SystemBrowserOpener {
    browser_path: Option<PathBuf>,
}

impl SystemBrowserOpener {
    pub fn new(browser_path: Option<PathBuf>) -> Self {
        Self { browser_path }
    }

    fn command(&self, url: &str) -> Command {
        if let Some(browser) = &self.browser_path {
            let mut cmd = Command::new(browser);
            cmd.arg(url);
            return cmd;
        }
        if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.args(["/c", "start", "", url]);
            cmd
        } else if cfg!(target_os = "macos") {
            let mut cmd = Command::new("open");
            cmd.arg(url);
            cmd
        } else {
            let mut cmd = Command::new("xdg-open");
            cmd.arg(url);
            cmd
        }
    }
}

impl BrowserOpener for SystemBrowserOpener {
    fn open<'a>(&'a self, url: &'a str) -> OpenFuture<'a> {
        Box::pin(async move {
            let mut cmd = self.command(url);
            cmd.stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());
            let mut child = match cmd.spawn() {
                Ok(child) => child,
                Err(err) => {
                    debug!(error = %err, "failed to start browser");
                    return false;
                }
            };
            match tokio::time::timeout(LAUNCH_GRACE, child.wait()).await {
                Ok(Ok(status)) => status.success(),
                Ok(Err(err)) => {
                    debug!(error = %err, "failed to wait for browser");
                    false
                }
                // Still running: that is a browser.
                Err(_) => true,
            }
        })
    }
}

/// Reports and opens launch URLs.
pub struct BrowserLauncher {
    opener: Arc<dyn BrowserOpener>,
    reporter: Arc<dyn Reporter>,
    mock_browser: bool,
}

impl BrowserLauncher {
    pub fn new(opener: Arc<dyn BrowserOpener>, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            opener,
            reporter,
            mock_browser: false,
        }
    }

    /// Only report the URL instead of opening it.
    pub fn with_mock_browser(mut self, mock_browser: bool) -> Self {
        self.mock_browser = mock_browser;
        self
    }

    pub async fn launch(&self, url: &str) -> bool {
        self.reporter.report(&messages::LAUNCHING_BROWSER, &[&url]);
        if self.mock_browser {
            return true;
        }
        if self.opener.open(url).await {
            true
        } else {
            self.reporter
                .report(&messages::UNABLE_TO_LAUNCH_BROWSER, &[&url]);
            false
        }
    }
}
