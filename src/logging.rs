// src/logging.rs

//! Logging setup for `devwatch` using `tracing` + `tracing-subscriber`.
//!
//! Reporter messages land on these levels: verbose messages are `debug`
//! events, regular output is `info`, warnings and errors keep their level.
//! So showing verbose messages means enabling `debug`.
//!
//! Priority for determining the level:
//! 1. `--verbose` / `--quiet` / `--log-level` CLI flags
//! 2. `DEVWATCH_LOG` (e.g. "info", "debug")
//! 3. `DOTNET_CLI_CONTEXT_VERBOSE=true`, set by a verbose `dotnet` host
//! 4. `info`
//!
//! Logs go to STDERR; the watched application owns STDOUT.

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::fmt;

use crate::cli::LogLevel;
use crate::config::environment::is_truthy;

pub const LOG_ENV_VAR: &str = "DEVWATCH_LOG";
pub const CLI_CONTEXT_VERBOSE: &str = "DOTNET_CLI_CONTEXT_VERBOSE";

/// Initialise global logging subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let level = resolve_level(cli_level, |name| std::env::var(name).ok());

    fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

/// Pick the max level from CLI flags and an environment source.
pub fn resolve_level<F>(cli_level: Option<LogLevel>, lookup: F) -> Level
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(level) = cli_level {
        return from_log_level(level);
    }
    if let Some(level) = lookup(LOG_ENV_VAR).and_then(|s| parse_level_str(&s)) {
        return level;
    }
    if lookup(CLI_CONTEXT_VERBOSE).is_some_and(|v| is_truthy(v.trim())) {
        return Level::DEBUG;
    }
    Level::INFO
}

fn from_log_level(level: LogLevel) -> Level {
    match level {
        LogLevel::Error => Level::ERROR,
        LogLevel::Warn => Level::WARN,
        LogLevel::Info => Level::INFO,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Trace => Level::TRACE,
    }
}

fn parse_level_str(s: &str) -> Option<Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" | "verbose" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: Vec<(String, String)> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
    }

    #[test]
    fn parses_level_names_loosely() {
        assert_eq!(parse_level_str(" Debug "), Some(Level::DEBUG));
        assert_eq!(parse_level_str("warning"), Some(Level::WARN));
        assert_eq!(parse_level_str("verbose"), Some(Level::DEBUG));
        assert_eq!(parse_level_str("loud"), None);
    }

    #[test]
    fn cli_flags_win_over_the_environment() {
        let vars = env(&[(LOG_ENV_VAR, "trace"), (CLI_CONTEXT_VERBOSE, "true")]);
        assert_eq!(resolve_level(Some(LogLevel::Warn), &vars), Level::WARN);
        assert_eq!(resolve_level(None, &vars), Level::TRACE);
    }

    #[test]
    fn verbose_dotnet_host_shows_verbose_messages() {
        assert_eq!(resolve_level(None, env(&[(CLI_CONTEXT_VERBOSE, "True")])), Level::DEBUG);
        assert_eq!(resolve_level(None, env(&[(CLI_CONTEXT_VERBOSE, "false")])), Level::INFO);
        assert_eq!(resolve_level(None, env(&[(LOG_ENV_VAR, "nonsense")])), Level::INFO);
    }
}
