// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`process`] describes what to run ([`ProcessSpec`]) and hands back a
//!   [`RunningProcess`] with its output stream and exit code.
//! - [`backend`] provides the [`ProcessLauncher`] trait and the
//!   `tokio::process` based [`RealProcessLauncher`]; tests substitute a fake.

pub mod backend;
pub mod process;

pub use backend::{LaunchFuture, ProcessLauncher, RealProcessLauncher};
pub use process::{OutputLine, ProcessSpec, RunningProcess};
