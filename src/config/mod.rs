// src/config/mod.rs

//! Configuration for devwatch.
//!
//! - Launch profiles from `devwatch.toml` (`model.rs`, `loader.rs`, `validate.rs`).
//! - Process environment switches (`environment.rs`).

pub mod environment;
pub mod loader;
pub mod model;
pub mod validate;

pub use environment::EnvironmentOptions;
pub use loader::{load_and_validate, load_for_project, load_from_path};
pub use model::{LaunchProfile, LaunchSettings, RawLaunchProfile, RawLaunchSettings};
