// src/config/validate.rs

use std::collections::BTreeMap;

use url::Url;

use crate::config::model::{LaunchProfile, LaunchSettings, RawLaunchProfile, RawLaunchSettings};
use crate::errors::{DevWatchError, Result};

impl TryFrom<RawLaunchSettings> for LaunchSettings {
    type Error = DevWatchError;

    fn try_from(raw: RawLaunchSettings) -> std::result::Result<Self, Self::Error> {
        validate_default_profile(&raw)?;

        let mut profiles = BTreeMap::new();
        for (name, profile) in raw.profiles {
            let profile = validate_profile(&name, profile)?;
            profiles.insert(name, profile);
        }
        Ok(LaunchSettings::new_unchecked(raw.default_profile, profiles))
    }
}

fn validate_default_profile(raw: &RawLaunchSettings) -> Result<()> {
    if let Some(default) = &raw.default_profile {
        if !raw.profiles.contains_key(default) {
            return Err(DevWatchError::ConfigError(format!(
                "default_profile '{default}' does not name a [profiles.<name>] section"
            )));
        }
    }
    Ok(())
}

fn validate_profile(name: &str, raw: RawLaunchProfile) -> Result<LaunchProfile> {
    if name.trim().is_empty() {
        return Err(DevWatchError::ConfigError(
            "profile names must not be empty".to_string(),
        ));
    }

    let application_urls: Vec<String> = raw
        .application_url
        .as_deref()
        .unwrap_or("")
        .split(';')
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(str::to_string)
        .collect();
    for url in &application_urls {
        Url::parse(url).map_err(|e| {
            DevWatchError::ConfigError(format!(
                "profile '{name}': application_url '{url}' is not an absolute URL: {e}"
            ))
        })?;
    }

    let launch_url = raw
        .launch_url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty());
    if let Some(url) = &launch_url {
        if url.contains("://") {
            Url::parse(url).map_err(|e| {
                DevWatchError::ConfigError(format!(
                    "profile '{name}': launch_url '{url}' is invalid: {e}"
                ))
            })?;
        }
    }

    Ok(LaunchProfile {
        name: name.to_string(),
        application_urls,
        launch_url,
        launch_browser: raw.launch_browser,
        environment: raw.environment,
    })
}
