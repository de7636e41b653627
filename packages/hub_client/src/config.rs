use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::channels::DEFAULT_HUB_PATH;

// =============================================================================
// Client config (figment-deserialized from defaults / hub.toml / env / CLI)
// =============================================================================
//
//   hub.toml:   base_url = "https://example.com"
//               token = "..."
//               hub_path = "/signalRHub"
//
//   env vars:   HUB_BASE_URL, HUB_TOKEN, HUB_HUB_PATH
//
// The server timeout is fixed and intentionally absent here.

/// Tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HubFileConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    /// Bearer token. Empty means unauthenticated.
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_hub_path")]
    pub hub_path: String,
}

impl Default for HubFileConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token: String::new(),
            hub_path: default_hub_path(),
        }
    }
}

fn default_hub_path() -> String {
    DEFAULT_HUB_PATH.to_string()
}

/// Values given on the command line. Unset fields leave lower layers alone.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConfigOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub_path: Option<String>,
}

/// `~/.config/hub/hub.toml` (platform equivalent).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("hub").join("hub.toml"))
}

/// Build a figment that layers: defaults → hub.toml → HUB_* env vars → CLI.
pub fn load_config(config_path: Option<&Path>, overrides: &ConfigOverrides) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let mut figment = Figment::from(Serialized::defaults(HubFileConfig::default()));
    if let Some(path) = config_path {
        figment = figment.merge(Toml::file(path));
    }
    figment
        .merge(Env::prefixed("HUB_"))
        .merge(Serialized::defaults(overrides.clone()))
}

/// Resolved configuration used to build a [`HubClient`](crate::HubClient).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HubClientConfig {
    pub base_url: String,
    pub token: String,
    pub hub_path: String,
}

impl HubClientConfig {
    pub fn from_file(fc: &HubFileConfig) -> Result<Self> {
        let base_url = fc
            .base_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .context("no hub base url configured (set base_url, HUB_BASE_URL or --base-url)")?;

        let hub_path = if fc.hub_path.starts_with('/') {
            fc.hub_path.clone()
        } else {
            format!("/{}", fc.hub_path)
        };

        Ok(Self {
            base_url,
            token: fc.token.clone(),
            hub_path,
        })
    }
}
