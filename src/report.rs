// src/report.rs

//! User-facing progress messages.
//!
//! The watch loop talks to a [`Reporter`] with a [`MessageDescriptor`] plus
//! positional arguments. Formatting and routing are the reporter's business;
//! [`TracingReporter`] routes everything into `tracing`.

use std::fmt;

/// How loud a message is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageSeverity {
    None,
    Verbose,
    Output,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emoji {
    Default,
    Warning,
    Error,
    HotReload,
    Watch,
    Stop,
    Launch,
    Wait,
    Browser,
    Build,
    Refresh,
}

impl Emoji {
    pub fn as_str(self) -> &'static str {
        match self {
            Emoji::Default => ":",
            Emoji::Warning => "⚠",
            Emoji::Error => "❌",
            Emoji::HotReload => "🔥",
            Emoji::Watch => "⌚",
            Emoji::Stop => "🛑",
            Emoji::Launch => "🚀",
            Emoji::Wait => "⏳",
            Emoji::Browser => "🌐",
            Emoji::Build => "🔨",
            Emoji::Refresh => "🔃",
        }
    }
}

/// A message template with positional `{0}`, `{1}`, ... placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageDescriptor {
    pub id: &'static str,
    pub format: &'static str,
    pub emoji: Emoji,
    pub severity: MessageSeverity,
}

impl MessageDescriptor {
    pub const fn new(
        id: &'static str,
        format: &'static str,
        emoji: Emoji,
        severity: MessageSeverity,
    ) -> Self {
        Self {
            id,
            format,
            emoji,
            severity,
        }
    }

    pub const fn with_severity(self, severity: MessageSeverity) -> Self {
        Self { severity, ..self }
    }

    /// Substitute positional arguments. Placeholders without a matching
    /// argument are left untouched.
    pub fn message(&self, args: &[&dyn fmt::Display]) -> String {
        let mut out = String::with_capacity(self.format.len());
        let mut rest = self.format;

        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let substituted = after.find('}').and_then(|end| {
                let index: usize = after[..end].parse().ok()?;
                let arg = args.get(index)?;
                Some((arg.to_string(), end))
            });
            match substituted {
                Some((value, end)) => {
                    out.push_str(&value);
                    rest = &after[end + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

macro_rules! descriptors {
    ($($name:ident = ($format:expr, $emoji:ident, $severity:ident);)*) => {
        $(
            pub const $name: MessageDescriptor = MessageDescriptor::new(
                stringify!($name),
                $format,
                Emoji::$emoji,
                MessageSeverity::$severity,
            );
        )*
    };
}

/// Every message the watch loop emits.
pub mod messages {
    use super::{Emoji, MessageDescriptor, MessageSeverity};

    descriptors! {
        VERBOSE = ("{0}", Default, Verbose);
        OUTPUT = ("{0}", Default, Output);
        WARNING = ("{0}", Warning, Warning);
        ERROR = ("{0}", Error, Error);

        FIX_BUILD_ERROR = ("Fix the error to continue or press Ctrl+C to exit.", Watch, Warning);
        WAITING_FOR_CHANGES = ("Waiting for changes", Watch, Verbose);
        WAITING_FOR_FILE_CHANGE_BEFORE_RESTARTING = ("Waiting for a file to change before restarting ...", Wait, Warning);
        SHUTDOWN_REQUESTED = ("Shutdown requested.", Stop, Output);
        LAUNCHED_PROCESS = ("Launched '{0}' with arguments '{1}': process id {2}", Launch, Verbose);
        FAILED_TO_LAUNCH_PROCESS = ("Failed to launch '{0}' with arguments '{1}': {2}", Error, Error);
        EXITED = ("Exited", Watch, Output);
        EXITED_WITH_ERROR_CODE = ("Exited with error code {0}", Error, Error);
        EXITED_WITH_UNKNOWN_ERROR_CODE = ("Exited with unknown error code", Error, Error);

        IGNORING_CHANGE_IN_HIDDEN_DIRECTORY = ("Ignoring change in hidden directory '{0}': {1} '{2}'", Watch, Verbose);
        IGNORING_CHANGE_IN_OUTPUT_DIRECTORY = ("Ignoring change in output directory: {0} '{1}'", Watch, Verbose);
        IGNORING_CHANGE_IN_EXCLUDED_FILE = ("Ignoring change in excluded file '{0}': {1}. Path matches {2} glob '{3}' set in '{4}'.", Watch, Verbose);
        FILE_ADDITION_TRIGGERED_RE_EVALUATION = ("File addition triggered re-evaluation.", Watch, Verbose);
        FILE_REMOVAL_TRIGGERED_RE_EVALUATION = ("File removal triggered re-evaluation.", Watch, Verbose);
        PROJECT_CHANGE_TRIGGERED_RE_EVALUATION = ("Project change triggered re-evaluation.", Watch, Verbose);
        RE_EVALUATION_COMPLETED = ("Re-evaluation completed.", Watch, Verbose);
        WATCHING_FILES_FOR_CHANGES = ("Watching {0} file(s) for changes", Watch, Verbose);
        WATCHING_FILES_FOR_CHANGES_FILE_PATH = ("> {0}", Watch, Verbose);
        FILE_CHANGES = ("{0}", Watch, Output);

        BUILDING = ("Building {0} ...", Build, Output);
        BUILD_SUCCEEDED = ("Build succeeded: {0}", Build, Output);
        BUILD_FAILED = ("Build failed: {0}", Error, Output);

        HOT_RELOAD_OF_STATIC_ASSETS_SUCCEEDED = ("Hot reload of static assets succeeded.", HotReload, Output);
        SENDING_STATIC_ASSET_UPDATE_REQUEST = ("Sending static asset update request to connected browsers: '{0}'.", Refresh, Verbose);
        FAILED_TO_RECEIVE_RESPONSE_FROM_CONNECTED_BROWSER = ("Failed to receive response from a connected browser.", Refresh, Verbose);
        CONFIGURED_TO_USE_BROWSER_REFRESH = ("Configuring the app to use browser-refresh middleware", Watch, Verbose);
        CONFIGURED_TO_LAUNCH_BROWSER = ("devwatch is configured to launch a browser on application startup.", Watch, Verbose);
        SKIPPING_BROWSER_REFRESH_SUPPRESSED = ("Skipping configuring browser-refresh middleware since its refresh server suppressed via environment variable {0}.", Watch, Verbose);
        SKIPPING_BROWSER_REFRESH_NOT_WEB_APP = ("Skipping configuring browser-refresh middleware since this is not a webapp.", Watch, Verbose);
        REFRESH_SERVER_FAILED_TO_START = ("Failed to start the browser refresh server: {0}. Live reload is disabled.", Warning, Warning);
        LAUNCHING_BROWSER = ("Launching browser: {0}", Browser, Verbose);
        UNABLE_TO_LAUNCH_BROWSER = ("Unable to launch the browser. Navigate to {0}", Browser, Output);
        REFRESHING_BROWSER = ("Refreshing browser.", Refresh, Verbose);
        USING_POLLING_FILE_WATCHER = ("Native file watching failed ({0}); falling back to polling every {1}ms.", Warning, Warning);
    }
}

/// Sink for user-facing messages.
pub trait Reporter: Send + Sync {
    fn report(&self, descriptor: &MessageDescriptor, args: &[&dyn fmt::Display]);

    fn verbose(&self, message: &str) {
        self.report(&messages::VERBOSE, &[&message]);
    }

    fn output(&self, message: &str) {
        self.report(&messages::OUTPUT, &[&message]);
    }

    fn warn(&self, message: &str) {
        self.report(&messages::WARNING, &[&message]);
    }

    fn error(&self, message: &str) {
        self.report(&messages::ERROR, &[&message]);
    }
}

/// Reporter that forwards to `tracing`, prefixing messages the way the
/// console shows them (`devwatch ⌚ Waiting for changes`).
#[derive(Debug, Clone, Default)]
pub struct TracingReporter {
    prefix: Option<String>,
}

impl TracingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix used to distinguish messages of a child project.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }
}

impl Reporter for TracingReporter {
    fn report(&self, descriptor: &MessageDescriptor, args: &[&dyn fmt::Display]) {
        let message = descriptor.message(args);
        let emoji = descriptor.emoji.as_str();
        let prefix = self.prefix.as_deref().unwrap_or("");
        match descriptor.severity {
            MessageSeverity::None => {}
            MessageSeverity::Verbose => {
                tracing::debug!(id = descriptor.id, "devwatch {emoji} {prefix}{message}")
            }
            MessageSeverity::Output => {
                tracing::info!(id = descriptor.id, "devwatch {emoji} {prefix}{message}")
            }
            MessageSeverity::Warning => {
                tracing::warn!(id = descriptor.id, "devwatch {emoji} {prefix}{message}")
            }
            MessageSeverity::Error => {
                tracing::error!(id = descriptor.id, "devwatch {emoji} {prefix}{message}")
            }
        }
    }
}
