// src/exec/process.rs

//! Handles for processes started by a [`ProcessLauncher`](super::ProcessLauncher).

use std::fmt;
use std::path::PathBuf;

use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;

/// Lines buffered per output subscriber before it starts lagging.
pub const OUTPUT_CAPACITY: usize = 1024;

/// What to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSpec {
    pub executable: PathBuf,
    pub arguments: Vec<String>,
    pub working_directory: Option<PathBuf>,
    pub environment: Vec<(String, String)>,
}

impl ProcessSpec {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.arguments.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.push((name.into(), value.into()));
        self
    }

    /// Value of `name` in this environment, last assignment wins.
    pub fn env_value(&self, name: &str) -> Option<&str> {
        self.environment
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn arguments_display(&self) -> String {
        self.arguments.join(" ")
    }
}

impl fmt::Display for ProcessSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.executable.display())?;
        for arg in &self.arguments {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// One line the process wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub text: String,
    pub is_error: bool,
}

impl OutputLine {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}

/// A started process.
///
/// Exit code `None` means the process was killed or its status is unknown.
#[derive(Debug)]
pub struct RunningProcess {
    id: Option<u32>,
    output: broadcast::Sender<OutputLine>,
    first_subscriber: Option<broadcast::Receiver<OutputLine>>,
    exit: Option<oneshot::Receiver<Option<i32>>>,
    exit_code: Option<Option<i32>>,
    terminate: CancellationToken,
}

impl RunningProcess {
    /// `first_subscriber` must be subscribed to `output` before the first
    /// line is sent; it is handed out by the first [`subscribe_output`] call.
    ///
    /// [`subscribe_output`]: RunningProcess::subscribe_output
    pub fn new(
        id: Option<u32>,
        output: broadcast::Sender<OutputLine>,
        first_subscriber: broadcast::Receiver<OutputLine>,
        exit: oneshot::Receiver<Option<i32>>,
        terminate: CancellationToken,
    ) -> Self {
        Self {
            id,
            output,
            first_subscriber: Some(first_subscriber),
            exit: Some(exit),
            exit_code: None,
            terminate,
        }
    }

    pub fn id(&self) -> Option<u32> {
        self.id
    }

    /// The first call sees every line since launch; later calls only see
    /// lines written after they subscribe.
    pub fn subscribe_output(&mut self) -> broadcast::Receiver<OutputLine> {
        self.first_subscriber
            .take()
            .unwrap_or_else(|| self.output.subscribe())
    }

    /// Wait for the process to exit. Cancel safe.
    pub async fn wait(&mut self) -> Option<i32> {
        if let Some(code) = self.exit_code {
            return code;
        }
        let code = match self.exit.as_mut() {
            Some(exit) => exit.await.unwrap_or(None),
            None => None,
        };
        self.exit = None;
        self.exit_code = Some(code);
        code
    }

    pub fn has_exited(&self) -> bool {
        self.exit_code.is_some()
    }

    /// Kill the process and wait for it to go away.
    pub async fn terminate(&mut self) -> Option<i32> {
        self.terminate.cancel();
        self.wait().await
    }
}
