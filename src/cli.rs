// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `devwatch`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "devwatch",
    version,
    about = "Watch a project graph, rebuild and relaunch on change, live-reload browsers.",
    long_about = None
)]
pub struct CliArgs {
    /// Project manifest to watch.
    ///
    /// Default: the single `*.proj` file in the current working directory.
    #[arg(long, value_name = "PATH")]
    pub project: Option<PathBuf>,

    /// Global build property override, `NAME=VALUE`. Repeatable.
    #[arg(short = 'p', long = "property", value_name = "NAME=VALUE", value_parser = parse_property)]
    pub properties: Vec<(String, String)>,

    /// Target framework to evaluate and run.
    #[arg(short = 'f', long, value_name = "FRAMEWORK")]
    pub framework: Option<String>,

    /// List the files that would be watched and exit.
    #[arg(long)]
    pub list: bool,

    /// Ignore the launch settings file.
    #[arg(long, conflicts_with = "launch_profile")]
    pub no_launch_profile: bool,

    /// Launch profile to use from the launch settings file.
    #[arg(long, value_name = "NAME")]
    pub launch_profile: Option<String>,

    /// Show verbose output.
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress all output except warnings and errors.
    #[arg(short, long)]
    pub quiet: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `DEVWATCH_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Arguments passed through to the application.
    #[arg(last = true, value_name = "APP_ARGS")]
    pub application_args: Vec<String>,
}

impl CliArgs {
    /// Effective log level after folding `--verbose` / `--quiet` in.
    pub fn effective_log_level(&self) -> Option<LogLevel> {
        if self.log_level.is_some() {
            self.log_level
        } else if self.verbose {
            Some(LogLevel::Debug)
        } else if self.quiet {
            Some(LogLevel::Warn)
        } else {
            None
        }
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

fn parse_property(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{s}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("property name is empty in '{s}'"));
    }
    Ok((name.to_string(), value.to_string()))
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_properties_and_trailing_args() {
        let args = CliArgs::try_parse_from([
            "devwatch",
            "-p",
            "Configuration=Release",
            "--property",
            "Empty=",
            "--",
            "--urls",
            "http://localhost:5000",
        ])
        .unwrap();

        assert_eq!(
            args.properties,
            vec![
                ("Configuration".to_string(), "Release".to_string()),
                ("Empty".to_string(), String::new()),
            ]
        );
        assert_eq!(args.application_args, vec!["--urls", "http://localhost:5000"]);
    }

    #[test]
    fn rejects_malformed_property() {
        assert!(CliArgs::try_parse_from(["devwatch", "-p", "NoEquals"]).is_err());
    }

    #[test]
    fn verbose_and_quiet_conflict() {
        assert!(CliArgs::try_parse_from(["devwatch", "-v", "-q"]).is_err());
    }
}
