// src/config/environment.rs

//! Switches read from the process environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{DevWatchError, Result};
use crate::types::TestFlags;

pub const USE_POLLING_FILE_WATCHER: &str = "DOTNET_USE_POLLING_FILE_WATCHER";
pub const POLLING_INTERVAL_MS: &str = "DOTNET_WATCH_POLLING_INTERVAL_MS";
pub const SUPPRESS_BROWSER_REFRESH: &str = "DOTNET_WATCH_SUPPRESS_BROWSER_REFRESH";
pub const SUPPRESS_LAUNCH_BROWSER: &str = "DOTNET_WATCH_SUPPRESS_LAUNCH_BROWSER";
pub const SUPPRESS_STATIC_FILE_HANDLING: &str = "DOTNET_WATCH_SUPPRESS_STATIC_FILE_HANDLING";
pub const AUTO_RELOAD_WS_HOSTNAME: &str = "DOTNET_WATCH_AUTO_RELOAD_WS_HOSTNAME";
pub const AUTO_RELOAD_WS_PORT: &str = "DOTNET_WATCH_AUTO_RELOAD_WS_PORT";
pub const BROWSER_PATH: &str = "DOTNET_WATCH_BROWSER_PATH";
pub const DOTNET_HOST_PATH: &str = "DOTNET_HOST_PATH";
pub const TEST_FLAGS: &str = "__DOTNET_WATCH_TEST_FLAGS";

pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentOptions {
    pub use_polling_file_watcher: bool,
    pub polling_interval: Duration,
    pub suppress_browser_refresh: bool,
    pub suppress_launch_browser: bool,
    pub suppress_static_file_handling: bool,
    pub auto_reload_ws_hostname: Option<String>,
    pub auto_reload_ws_port: Option<u16>,
    pub browser_path: Option<PathBuf>,
    pub dotnet_path: PathBuf,
    pub test_flags: TestFlags,
}

impl Default for EnvironmentOptions {
    fn default() -> Self {
        Self {
            use_polling_file_watcher: false,
            polling_interval: DEFAULT_POLLING_INTERVAL,
            suppress_browser_refresh: false,
            suppress_launch_browser: false,
            suppress_static_file_handling: false,
            auto_reload_ws_hostname: None,
            auto_reload_ws_port: None,
            browser_path: None,
            dotnet_path: PathBuf::from("dotnet"),
            test_flags: TestFlags::default(),
        }
    }
}

impl EnvironmentOptions {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build options from an arbitrary variable source. Empty values count
    /// as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let flag = |name: &str| get(name).is_some_and(|v| is_truthy(&v));

        let polling_interval = match get(POLLING_INTERVAL_MS) {
            Some(value) => Duration::from_millis(value.parse::<u64>().map_err(|_| {
                DevWatchError::ConfigError(format!(
                    "{POLLING_INTERVAL_MS} must be a number of milliseconds (got '{value}')"
                ))
            })?),
            None => DEFAULT_POLLING_INTERVAL,
        };

        let auto_reload_ws_port = get(AUTO_RELOAD_WS_PORT)
            .map(|value| {
                value.parse::<u16>().map_err(|_| {
                    DevWatchError::ConfigError(format!(
                        "{AUTO_RELOAD_WS_PORT} must be a port number (got '{value}')"
                    ))
                })
            })
            .transpose()?;

        let test_flags = match get(TEST_FLAGS) {
            Some(value) => value
                .parse::<TestFlags>()
                .map_err(|e| DevWatchError::ConfigError(format!("{TEST_FLAGS}: {e}")))?,
            None => TestFlags::default(),
        };

        Ok(Self {
            use_polling_file_watcher: flag(USE_POLLING_FILE_WATCHER),
            polling_interval,
            suppress_browser_refresh: flag(SUPPRESS_BROWSER_REFRESH),
            suppress_launch_browser: flag(SUPPRESS_LAUNCH_BROWSER),
            suppress_static_file_handling: flag(SUPPRESS_STATIC_FILE_HANDLING),
            auto_reload_ws_hostname: get(AUTO_RELOAD_WS_HOSTNAME),
            auto_reload_ws_port,
            browser_path: get(BROWSER_PATH).map(PathBuf::from),
            dotnet_path: get(DOTNET_HOST_PATH)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("dotnet")),
            test_flags,
        })
    }
}

pub(crate) fn is_truthy(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> Result<EnvironmentOptions> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvironmentOptions::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        assert_eq!(lookup(&[]).unwrap(), EnvironmentOptions::default());
    }

    #[test]
    fn flags_accept_one_and_true() {
        let options = lookup(&[
            (USE_POLLING_FILE_WATCHER, "1"),
            (SUPPRESS_BROWSER_REFRESH, "TRUE"),
            (SUPPRESS_LAUNCH_BROWSER, "0"),
            (POLLING_INTERVAL_MS, "250"),
            (AUTO_RELOAD_WS_PORT, "5050"),
            (AUTO_RELOAD_WS_HOSTNAME, "devbox"),
            (TEST_FLAGS, "RunningAsTest,MockBrowser"),
        ])
        .unwrap();
        assert!(options.use_polling_file_watcher);
        assert!(options.suppress_browser_refresh);
        assert!(!options.suppress_launch_browser);
        assert_eq!(options.polling_interval, Duration::from_millis(250));
        assert_eq!(options.auto_reload_ws_port, Some(5050));
        assert_eq!(options.auto_reload_ws_hostname.as_deref(), Some("devbox"));
        assert!(options.test_flags.running_as_test);
        assert!(options.test_flags.mock_browser);
    }

    #[test]
    fn malformed_numbers_are_config_errors() {
        assert!(lookup(&[(AUTO_RELOAD_WS_PORT, "http")]).is_err());
        assert!(lookup(&[(POLLING_INTERVAL_MS, "-1")]).is_err());
        assert!(lookup(&[(TEST_FLAGS, "Bogus")]).is_err());
    }
}
