use std::sync::{Arc, Mutex};

use devwatch::errors::DevWatchError;
use devwatch::exec::{LaunchFuture, OutputLine, ProcessLauncher, ProcessSpec, RunningProcess};
use devwatch::exec::process::OUTPUT_CAPACITY;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;

/// Test-side handle on one launched fake process.
#[derive(Clone)]
pub struct FakeProcess {
    pub spec: ProcessSpec,
    output: broadcast::Sender<OutputLine>,
    exit: Arc<Mutex<Option<oneshot::Sender<Option<i32>>>>>,
    terminate: CancellationToken,
}

impl FakeProcess {
    /// Write a stdout line as the process.
    pub fn write_line(&self, text: &str) {
        let _ = self.output.send(OutputLine::stdout(text));
    }

    /// Exit with `code`. No-op if the process already exited.
    pub fn exit(&self, code: Option<i32>) {
        if let Some(tx) = self.exit.lock().unwrap().take() {
            let _ = tx.send(code);
        }
    }

    pub fn was_terminated(&self) -> bool {
        self.terminate.is_cancelled()
    }

    pub fn is_build(&self) -> bool {
        self.spec.arguments.first().map(String::as_str) == Some("build")
    }
}

#[derive(Default)]
struct State {
    processes: Vec<FakeProcess>,
    build_exit_code: Option<i32>,
    fail_launch: bool,
}

/// A process launcher that never touches the OS.
///
/// Builds (first argument `build`) exit right away with the configured
/// code (0 by default). Every other process keeps running until the test
/// calls [`FakeProcess::exit`] or the watcher terminates it.
#[derive(Default, Clone)]
pub struct FakeProcessLauncher {
    state: Arc<Mutex<State>>,
}

impl FakeProcessLauncher {
    pub fn new() -> Self {
        let launcher = Self::default();
        launcher.set_build_exit_code(Some(0));
        launcher
    }

    pub fn set_build_exit_code(&self, code: Option<i32>) {
        self.state.lock().unwrap().build_exit_code = code;
    }

    pub fn fail_launches(&self, fail: bool) {
        self.state.lock().unwrap().fail_launch = fail;
    }

    pub fn processes(&self) -> Vec<FakeProcess> {
        self.state.lock().unwrap().processes.clone()
    }

    pub fn builds(&self) -> Vec<FakeProcess> {
        self.processes().into_iter().filter(FakeProcess::is_build).collect()
    }

    /// Launched applications, oldest first.
    pub fn applications(&self) -> Vec<FakeProcess> {
        self.processes().into_iter().filter(|p| !p.is_build()).collect()
    }
}

impl ProcessLauncher for FakeProcessLauncher {
    fn launch(&self, spec: ProcessSpec) -> LaunchFuture<'_> {
        Box::pin(async move {
            let (build_exit_code, fail_launch, pid) = {
                let state = self.state.lock().unwrap();
                (
                    state.build_exit_code,
                    state.fail_launch,
                    state.processes.len() as u32 + 100,
                )
            };
            if fail_launch {
                return Err(DevWatchError::Process(format!(
                    "cannot start {}",
                    spec.executable.display()
                )));
            }

            let (output, first_subscriber) = broadcast::channel(OUTPUT_CAPACITY);
            let (exit_tx, exit_rx) = oneshot::channel();
            let terminate = CancellationToken::new();
            let fake = FakeProcess {
                spec,
                output: output.clone(),
                exit: Arc::new(Mutex::new(Some(exit_tx))),
                terminate: terminate.clone(),
            };

            if fake.is_build() {
                fake.exit(build_exit_code);
            } else {
                let on_terminate = fake.clone();
                tokio::spawn(async move {
                    on_terminate.terminate.cancelled().await;
                    on_terminate.exit(None);
                });
            }

            self.state.lock().unwrap().processes.push(fake);
            Ok(RunningProcess::new(
                Some(pid),
                output,
                first_subscriber,
                exit_rx,
                terminate,
            ))
        })
    }
}
