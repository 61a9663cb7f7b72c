//! Engine configuration loading
//!
//! One TOML file configures the engine and seeds the global layer of the
//! per-plugin configuration merge. Resolution of the file itself follows
//! the priority chain in `waymark_common::config::resolve_config_path`:
//! CLI argument, then `WAYMARK_CONFIG`, then the platform config dir.
//!
//! Layout:
//!
//! ```toml
//! worker_limit = 4
//! timeout_secs = 30
//! plugin_config_dir = "/etc/waymark/plugins.d"
//!
//! [plugin_defaults]
//! skip_hidden = true
//!
//! [plugins.social_archive]
//! enabled = true
//! priority = 10
//! data_dir = "/exports/social"
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;
use waymark_common::config::{resolve_config_path, ConfigMap};
use waymark_common::{Error, Result};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "WAYMARK_CONFIG";

/// Top-level engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Maximum concurrently executing plugins (default: 4, minimum 1)
    #[serde(default = "default_worker_limit")]
    pub worker_limit: usize,

    /// Per-invocation time budget in seconds (default: 30)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Directory holding per-plugin override files (`<name>.toml`)
    #[serde(default)]
    pub plugin_config_dir: Option<PathBuf>,

    /// Keys applied to every plugin (global defaults layer)
    #[serde(default)]
    pub plugin_defaults: ConfigMap,

    /// Per-plugin tables (global defaults layer, keyed by plugin name)
    #[serde(default)]
    pub plugins: BTreeMap<String, PluginEntry>,
}

/// One `[plugins.<name>]` table
///
/// `enabled` and `priority` steer the registry; every other key is plugin
/// configuration and joins the merge.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginEntry {
    /// Whether the plugin takes part in runs (default: true)
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Priority override; lower runs earlier in reports
    #[serde(default)]
    pub priority: Option<i32>,

    /// Plugin-specific keys, merged over the plugin's built-in defaults
    #[serde(flatten)]
    pub config: ConfigMap,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_limit: default_worker_limit(),
            timeout_secs: default_timeout_secs(),
            plugin_config_dir: None,
            plugin_defaults: ConfigMap::new(),
            plugins: BTreeMap::new(),
        }
    }
}

impl Default for PluginEntry {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            priority: None,
            config: ConfigMap::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from an explicit path
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: EngineConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Resolve the config file (CLI arg, then env, then platform default)
    /// and load it; built-in defaults when no file exists anywhere.
    pub fn load_or_default(cli_arg: Option<&str>) -> Result<Self> {
        match resolve_config_path(cli_arg, CONFIG_ENV_VAR) {
            Some(path) => {
                let config = Self::load(&path)?;
                info!(path = %path.display(), "Configuration loaded");
                Ok(config)
            }
            None => {
                info!("No configuration file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Per-invocation time budget as a `Duration`
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

fn default_worker_limit() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_enabled() -> bool {
    true
}
