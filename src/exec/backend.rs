// src/exec/backend.rs

//! Pluggable process launching.
//!
//! The watch loop talks to a [`ProcessLauncher`] instead of spawning
//! processes itself, so tests can swap in a fake that never touches the OS.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{DevWatchError, Result};
use crate::exec::process::{OUTPUT_CAPACITY, OutputLine, ProcessSpec, RunningProcess};

pub type LaunchFuture<'a> = Pin<Box<dyn Future<Output = Result<RunningProcess>> + Send + 'a>>;

pub trait ProcessLauncher: Send + Sync {
    /// Start `spec`. Output is available through the returned handle.
    fn launch(&self, spec: ProcessSpec) -> LaunchFuture<'_>;
}

/// Spawns real OS processes with `tokio::process`.
///
/// Output lines are echoed to our own stdout/stderr and broadcast to
/// subscribers.
#[derive(Debug, Clone, Default)]
pub struct RealProcessLauncher {
    echo_output: bool,
}

impl RealProcessLauncher {
    pub fn new() -> Self {
        Self { echo_output: true }
    }

    /// Do not echo child output; subscribers still see it.
    pub fn quiet() -> Self {
        Self { echo_output: false }
    }
}

impl ProcessLauncher for RealProcessLauncher {
    fn launch(&self, spec: ProcessSpec) -> LaunchFuture<'_> {
        let echo = self.echo_output;
        Box::pin(async move { spawn_process(spec, echo) })
    }
}

fn spawn_process(spec: ProcessSpec, echo: bool) -> Result<RunningProcess> {
    let mut cmd = Command::new(&spec.executable);
    cmd.args(&spec.arguments)
        .envs(spec.environment.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.working_directory {
        cmd.current_dir(dir);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| DevWatchError::Process(format!("failed to start '{spec}': {e}")))?;
    let id = child.id();
    info!(pid = ?id, command = %spec, "process started");

    let (output_tx, first_subscriber) = broadcast::channel(OUTPUT_CAPACITY);
    if let Some(stdout) = child.stdout.take() {
        forward_lines(stdout, false, echo, output_tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        forward_lines(stderr, true, echo, output_tx.clone());
    }

    let (exit_tx, exit_rx) = oneshot::channel();
    let terminate = CancellationToken::new();
    let kill = terminate.clone();
    tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => status,
            _ = kill.cancelled() => {
                if let Err(err) = child.kill().await {
                    debug!(pid = ?id, error = %err, "kill failed");
                }
                child.wait().await
            }
        };
        let code = match status {
            Ok(status) => {
                debug!(pid = ?id, %status, "process exited");
                status.code()
            }
            Err(err) => {
                warn!(pid = ?id, error = %err, "failed to wait for process");
                None
            }
        };
        let _ = exit_tx.send(code);
    });

    Ok(RunningProcess::new(
        id,
        output_tx,
        first_subscriber,
        exit_rx,
        terminate,
    ))
}

fn forward_lines<R>(reader: R, is_error: bool, echo: bool, tx: broadcast::Sender<OutputLine>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if echo {
                if is_error {
                    eprintln!("{line}");
                } else {
                    println!("{line}");
                }
            }
            // No subscribers is fine.
            let _ = tx.send(OutputLine { text: line, is_error });
        }
    });
}
