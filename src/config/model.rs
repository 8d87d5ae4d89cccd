// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

/// `devwatch.toml` as read from disk.
///
/// ```toml
/// default_profile = "web"
///
/// [profiles.web]
/// application_url = "https://localhost:5001;http://localhost:5000"
/// launch_url = "swagger"
/// launch_browser = true
/// environment = { ASPNETCORE_ENVIRONMENT = "Development" }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawLaunchSettings {
    #[serde(default)]
    pub default_profile: Option<String>,

    #[serde(default)]
    pub profiles: BTreeMap<String, RawLaunchProfile>,
}

/// `[profiles.<name>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawLaunchProfile {
    /// `;`-separated URLs the app listens on.
    #[serde(default)]
    pub application_url: Option<String>,

    /// Absolute URL, or a path resolved against the URL the app reports.
    #[serde(default)]
    pub launch_url: Option<String>,

    #[serde(default = "default_launch_browser")]
    pub launch_browser: bool,

    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

fn default_launch_browser() -> bool {
    true
}

/// Validated launch profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchProfile {
    pub name: String,
    pub application_urls: Vec<String>,
    pub launch_url: Option<String>,
    pub launch_browser: bool,
    pub environment: BTreeMap<String, String>,
}

impl Default for LaunchProfile {
    fn default() -> Self {
        Self {
            name: String::new(),
            application_urls: Vec::new(),
            launch_url: None,
            launch_browser: true,
            environment: BTreeMap::new(),
        }
    }
}

impl LaunchProfile {
    /// Variables the profile contributes to the launched app.
    pub fn environment_variables(&self) -> Vec<(String, String)> {
        let mut vars: Vec<(String, String)> = self
            .environment
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if !self.application_urls.is_empty() {
            vars.push(("ASPNETCORE_URLS".to_string(), self.application_urls.join(";")));
        }
        vars
    }
}

/// Validated `devwatch.toml`. Construct via `TryFrom<RawLaunchSettings>`.
#[derive(Debug, Clone, Default)]
pub struct LaunchSettings {
    default_profile: Option<String>,
    profiles: BTreeMap<String, LaunchProfile>,
}

impl LaunchSettings {
    pub(crate) fn new_unchecked(
        default_profile: Option<String>,
        profiles: BTreeMap<String, LaunchProfile>,
    ) -> Self {
        Self {
            default_profile,
            profiles,
        }
    }

    pub fn profiles(&self) -> impl Iterator<Item = &LaunchProfile> {
        self.profiles.values()
    }

    pub fn profile(&self, name: &str) -> Option<&LaunchProfile> {
        self.profiles.get(name)
    }

    /// The named profile; without a name, `default_profile`, then the first
    /// profile by name.
    pub fn select(&self, name: Option<&str>) -> Option<&LaunchProfile> {
        match name {
            Some(name) => self.profile(name),
            None => match &self.default_profile {
                Some(default) => self.profile(default),
                None => self.profiles.values().next(),
            },
        }
    }
}
