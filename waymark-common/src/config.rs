//! Configuration primitives and config file resolution
//!
//! Plugin configuration flows through [`ConfigMap`] values (string-keyed
//! TOML values with deterministic iteration order). The registry builds a
//! plugin's effective configuration by layering maps with [`merge_into`]:
//! built-in defaults first, then global defaults, then per-plugin
//! overrides, later layers winning per key.

use std::collections::BTreeMap;
use std::path::PathBuf;

/// String-keyed TOML values, the unit of plugin configuration
pub type ConfigMap = BTreeMap<String, toml::Value>;

/// Overlay `overlay` onto `base`, per-key, overlay winning
pub fn merge_into(base: &mut ConfigMap, overlay: &ConfigMap) {
    for (key, value) in overlay {
        base.insert(key.clone(), value.clone());
    }
}

/// Convert a parsed TOML table into a [`ConfigMap`]
pub fn table_to_map(table: &toml::Table) -> ConfigMap {
    table
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Typed string read
pub fn get_str<'a>(map: &'a ConfigMap, key: &str) -> Option<&'a str> {
    map.get(key).and_then(|v| v.as_str())
}

/// Typed integer read
pub fn get_i64(map: &ConfigMap, key: &str) -> Option<i64> {
    map.get(key).and_then(|v| v.as_integer())
}

/// Typed boolean read
pub fn get_bool(map: &ConfigMap, key: &str) -> Option<bool> {
    map.get(key).and_then(|v| v.as_bool())
}

/// Config file resolution, in priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. Platform user-config location, when the file exists
///
/// `None` means no config file anywhere; callers fall back to built-in
/// defaults.
pub fn resolve_config_path(cli_arg: Option<&str>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(PathBuf::from(path));
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: platform default, only when present
    let default = default_config_path()?;
    if default.exists() {
        Some(default)
    } else {
        None
    }
}

/// Platform user-config location for the main config file
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("waymark").join("config.toml"))
}
