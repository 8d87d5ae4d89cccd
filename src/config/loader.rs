// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{LaunchSettings, RawLaunchSettings};
use crate::errors::Result;

/// File name of the launch settings, looked up next to the project.
pub const LAUNCH_SETTINGS_FILE: &str = "devwatch.toml";

/// Read and deserialize launch settings without semantic checks.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawLaunchSettings> {
    let contents = fs::read_to_string(path.as_ref())?;
    let raw: RawLaunchSettings = toml::from_str(&contents)?;
    Ok(raw)
}

/// Read, deserialize and validate launch settings.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<LaunchSettings> {
    let raw = load_from_path(&path)?;
    let settings = LaunchSettings::try_from(raw)?;
    Ok(settings)
}

pub fn launch_settings_path(project_directory: &Path) -> PathBuf {
    project_directory.join(LAUNCH_SETTINGS_FILE)
}

/// Launch settings of the project in `project_directory`, if it has any.
pub fn load_for_project(project_directory: &Path) -> Result<Option<LaunchSettings>> {
    let path = launch_settings_path(project_directory);
    if !path.is_file() {
        return Ok(None);
    }
    load_and_validate(&path).map(Some)
}
