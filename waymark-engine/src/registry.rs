//! Plugin registry
//!
//! Owns the collector lifecycle up to execution: validated registration,
//! per-plugin configuration resolution, dependency checks, deterministic
//! ordering, and the cumulative error ledger.
//!
//! # Configuration resolution
//! A plugin's effective configuration is a three-layer merge, later layers
//! winning per key:
//! 1. the collector's built-in defaults (`Collector::default_config`)
//! 2. the global layer from the main config file (`[plugin_defaults]`,
//!    then `[plugins.<name>]`)
//! 3. the per-plugin override file `<plugin_config_dir>/<name>.toml`
//!
//! Any failure along the way (missing required key, unmet dependency,
//! rejected value, unreadable override file) disables that plugin for the
//! run and is recorded; other plugins are unaffected.
//!
//! # Generations
//! `load` produces one immutable generation of descriptors. Reloading
//! builds the next generation from fresh candidates; descriptors already
//! handed out are never touched. The error ledger survives reloads.

use crate::config::EngineConfig;
use crate::types::{Collector, PluginDescriptor, Registration};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};
use waymark_common::config::{merge_into, table_to_map, ConfigMap};

/// Capabilities this host offers to collectors
pub const HOST_CAPABILITIES: &[&str] = &["filesystem"];

/// Configuration-time failure attributed to a single plugin
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// The plugin's resolved configuration is unusable; the plugin sits
    /// out this run, the run continues
    #[error("configuration error for plugin '{plugin}': {detail}")]
    Configuration { plugin: String, detail: String },
}

// ============================================================================
// Error ledger
// ============================================================================

/// Cumulative per-plugin failure counters
///
/// Shared between registry and supervisor; counts survive configuration
/// reloads and live for the process lifetime (never persisted to disk).
#[derive(Clone, Default)]
pub struct ErrorLedger {
    counts: Arc<Mutex<BTreeMap<String, u64>>>,
}

impl ErrorLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one failure; returns the new cumulative count
    pub fn record(&self, plugin: &str) -> u64 {
        // a poisoned lock still holds a usable counter map
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        let entry = counts.entry(plugin.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Current cumulative count for one plugin
    pub fn count(&self, plugin: &str) -> u64 {
        let counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        counts.get(plugin).copied().unwrap_or(0)
    }
}

// ============================================================================
// Registry
// ============================================================================

/// One registered, resolved plugin: its descriptor snapshot plus the
/// configured collector ready for execution
#[derive(Clone)]
pub struct ActivePlugin {
    pub descriptor: PluginDescriptor,
    pub collector: Arc<dyn Collector>,
}

/// Result of resolving one plugin's configuration layers
struct ResolvedConfig {
    map: ConfigMap,
    priority: i32,
    enabled: bool,
}

/// Collector registry for one process
pub struct PluginRegistry {
    host_capabilities: BTreeSet<String>,
    generation: u64,
    registrations: Vec<Registration>,
    plugins: Vec<ActivePlugin>,
    config_errors: Vec<RegistryError>,
    ledger: ErrorLedger,
}

impl PluginRegistry {
    /// Registry with the standard host capability set
    pub fn new() -> Self {
        Self::with_capabilities(HOST_CAPABILITIES)
    }

    /// Registry with an explicit capability set
    pub fn with_capabilities(capabilities: &[&str]) -> Self {
        Self {
            host_capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            generation: 0,
            registrations: Vec::new(),
            plugins: Vec::new(),
            config_errors: Vec::new(),
            ledger: ErrorLedger::new(),
        }
    }

    /// Discover, validate, and configure a candidate set
    ///
    /// Builds the next registry generation. Invalid candidates are recorded
    /// and excluded without stopping discovery; configuration failures
    /// disable the affected plugin only. Calling `load` again with fresh
    /// candidates is the reload path: new generation, same error ledger.
    pub fn load(&mut self, candidates: Vec<Box<dyn Collector>>, config: &EngineConfig) {
        self.generation += 1;
        self.registrations.clear();
        self.plugins.clear();
        self.config_errors.clear();

        let mut seen = BTreeSet::new();
        for mut candidate in candidates {
            let name = candidate.name().to_string();
            let version = candidate.version().to_string();

            if let Some(reason) = Self::candidate_defect(&name, &version, &seen) {
                warn!(plugin = %name, %reason, "Collector candidate rejected");
                self.registrations.push(Registration::Invalid { name, reason });
                continue;
            }
            seen.insert(name.clone());

            let mut resolved = match self.resolve_config(&name, candidate.as_ref(), config) {
                Ok(resolved) => resolved,
                Err(detail) => {
                    // Unusable configuration still registers the plugin; it
                    // just cannot run this generation
                    self.disable_with_error(&name, &version, candidate, detail, config);
                    continue;
                }
            };

            if let Err(detail) = Self::check_contract(candidate.as_ref(), &resolved.map, &self.host_capabilities) {
                self.disable_with_error(&name, &version, candidate, detail, config);
                continue;
            }

            if let Err(e) = candidate.configure(&resolved.map) {
                self.disable_with_error(&name, &version, candidate, format!("rejected configuration: {}", e), config);
                continue;
            }

            if !resolved.enabled {
                debug!(plugin = %name, "Plugin disabled by configuration");
            }
            info!(
                plugin = %name,
                version = %version,
                priority = resolved.priority,
                enabled = resolved.enabled,
                "Collector registered"
            );
            self.registrations.push(Registration::Valid {
                name: name.clone(),
                version: version.clone(),
            });
            self.plugins.push(ActivePlugin {
                descriptor: PluginDescriptor {
                    name,
                    version,
                    enabled: resolved.enabled,
                    priority: resolved.priority,
                    dependencies: candidate.dependencies().iter().map(|d| d.to_string()).collect(),
                    config: std::mem::take(&mut resolved.map),
                    generation: self.generation,
                },
                collector: Arc::from(candidate),
            });
        }

        self.plugins.sort_by(|a, b| {
            a.descriptor
                .priority
                .cmp(&b.descriptor.priority)
                .then_with(|| a.descriptor.name.cmp(&b.descriptor.name))
        });

        let rejected = self.registrations.iter().filter(|r| !r.is_valid()).count();
        info!(
            generation = self.generation,
            registered = self.plugins.len(),
            rejected,
            disabled = self.config_errors.len(),
            "Registry loaded"
        );
    }

    /// Structural defects that reject a candidate outright
    fn candidate_defect(name: &str, version: &str, seen: &BTreeSet<String>) -> Option<String> {
        if name.trim().is_empty() {
            return Some("empty plugin name".to_string());
        }
        if version.trim().is_empty() {
            return Some("empty version string".to_string());
        }
        if seen.contains(name) {
            return Some(format!("duplicate plugin name '{}'", name));
        }
        None
    }

    /// Required keys and host capabilities, checked against the merge result
    fn check_contract(
        collector: &dyn Collector,
        merged: &ConfigMap,
        capabilities: &BTreeSet<String>,
    ) -> Result<(), String> {
        for key in collector.required_keys() {
            if !merged.contains_key(*key) {
                return Err(format!("missing required configuration key '{}'", key));
            }
        }
        for dep in collector.dependencies() {
            if !capabilities.contains(*dep) {
                return Err(format!("unmet host dependency '{}'", dep));
            }
        }
        Ok(())
    }

    /// Register a plugin in the disabled state with a recorded error
    fn disable_with_error(
        &mut self,
        name: &str,
        version: &str,
        candidate: Box<dyn Collector>,
        detail: String,
        config: &EngineConfig,
    ) {
        warn!(plugin = %name, %detail, "Plugin disabled for this run");
        self.config_errors.push(RegistryError::Configuration {
            plugin: name.to_string(),
            detail,
        });
        self.registrations.push(Registration::Valid {
            name: name.to_string(),
            version: version.to_string(),
        });
        let priority = config
            .plugins
            .get(name)
            .and_then(|e| e.priority)
            .unwrap_or_else(|| candidate.priority());
        self.plugins.push(ActivePlugin {
            descriptor: PluginDescriptor {
                name: name.to_string(),
                version: version.to_string(),
                enabled: false,
                priority,
                dependencies: candidate.dependencies().iter().map(|d| d.to_string()).collect(),
                config: ConfigMap::new(),
                generation: self.generation,
            },
            collector: Arc::from(candidate),
        });
    }

    /// Three-layer merge for one plugin
    fn resolve_config(
        &self,
        name: &str,
        collector: &dyn Collector,
        config: &EngineConfig,
    ) -> Result<ResolvedConfig, String> {
        let mut resolved = ResolvedConfig {
            map: collector.default_config(),
            priority: collector.priority(),
            enabled: true,
        };

        // Global layer: defaults for every plugin, then this plugin's table
        merge_into(&mut resolved.map, &config.plugin_defaults);
        if let Some(entry) = config.plugins.get(name) {
            merge_into(&mut resolved.map, &entry.config);
            if let Some(priority) = entry.priority {
                resolved.priority = priority;
            }
            resolved.enabled = entry.enabled;
        }

        // Override layer: the plugin's own file wins over everything
        if let Some(dir) = &config.plugin_config_dir {
            let path = dir.join(format!("{}.toml", name));
            if path.exists() {
                let content = std::fs::read_to_string(&path)
                    .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
                let table: toml::Table = content
                    .parse()
                    .map_err(|e| format!("cannot parse {}: {}", path.display(), e))?;
                debug!(plugin = name, path = %path.display(), "Per-plugin override file applied");
                let mut map = table_to_map(&table);
                if let Some(enabled) = map.remove("enabled").and_then(|v| v.as_bool()) {
                    resolved.enabled = enabled;
                }
                if let Some(priority) = map.remove("priority").and_then(|v| v.as_integer()) {
                    resolved.priority = priority as i32;
                }
                merge_into(&mut resolved.map, &map);
            }
        }

        Ok(resolved)
    }

    /// Registration report for the current generation
    pub fn registrations(&self) -> &[Registration] {
        &self.registrations
    }

    /// Configuration errors recorded while loading the current generation
    pub fn config_errors(&self) -> &[RegistryError] {
        &self.config_errors
    }

    /// All registered plugins in (priority, name) order, disabled included
    pub fn plugins(&self) -> &[ActivePlugin] {
        &self.plugins
    }

    /// Enabled plugins in (priority, name) order
    pub fn enabled_ordered(&self) -> Vec<ActivePlugin> {
        self.plugins
            .iter()
            .filter(|p| p.descriptor.enabled)
            .cloned()
            .collect()
    }

    /// Handle to the shared error ledger
    pub fn ledger(&self) -> ErrorLedger {
        self.ledger.clone()
    }

    /// Cumulative failure count for one plugin
    pub fn error_count(&self, plugin: &str) -> u64 {
        self.ledger.count(plugin)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::mock::MockCollector;
    use std::io::Write;

    fn load_with(
        registry: &mut PluginRegistry,
        candidates: Vec<Box<dyn Collector>>,
        toml_config: &str,
    ) {
        let config: EngineConfig = toml::from_str(toml_config).unwrap();
        registry.load(candidates, &config);
    }

    #[test]
    fn test_empty_name_candidate_is_rejected() {
        let mut registry = PluginRegistry::new();
        load_with(
            &mut registry,
            vec![
                Box::new(MockCollector::new("")),
                Box::new(MockCollector::new("good")),
            ],
            "",
        );
        assert_eq!(registry.plugins().len(), 1);
        assert_eq!(registry.plugins()[0].descriptor.name, "good");
        let invalid: Vec<_> = registry
            .registrations()
            .iter()
            .filter(|r| !r.is_valid())
            .collect();
        assert_eq!(invalid.len(), 1);
    }

    #[test]
    fn test_empty_version_candidate_is_rejected() {
        let mut registry = PluginRegistry::new();
        load_with(
            &mut registry,
            vec![Box::new(MockCollector::new("nameless").with_version(""))],
            "",
        );
        assert!(registry.plugins().is_empty());
        assert!(!registry.registrations()[0].is_valid());
    }

    #[test]
    fn test_duplicate_name_keeps_first_candidate() {
        let mut registry = PluginRegistry::new();
        load_with(
            &mut registry,
            vec![
                Box::new(MockCollector::new("twin").with_priority(1)),
                Box::new(MockCollector::new("twin").with_priority(2)),
            ],
            "",
        );
        assert_eq!(registry.plugins().len(), 1);
        assert_eq!(registry.plugins()[0].descriptor.priority, 1);
        assert_eq!(
            registry
                .registrations()
                .iter()
                .filter(|r| !r.is_valid())
                .count(),
            1
        );
    }

    #[test]
    fn test_enabled_ordered_sorts_by_priority_then_name() {
        let mut registry = PluginRegistry::new();
        load_with(
            &mut registry,
            vec![
                Box::new(MockCollector::new("zeta").with_priority(10)),
                Box::new(MockCollector::new("alpha").with_priority(20)),
                Box::new(MockCollector::new("mid").with_priority(10)),
            ],
            "",
        );
        let names: Vec<_> = registry
            .enabled_ordered()
            .iter()
            .map(|p| p.descriptor.name.clone())
            .collect();
        assert_eq!(names, vec!["mid", "zeta", "alpha"]);
    }

    #[test]
    fn test_config_layers_merge_with_later_layers_winning() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("layered.toml")).unwrap();
        writeln!(file, "data_dir = \"/from/override\"").unwrap();

        let mut defaults = ConfigMap::new();
        defaults.insert(
            "data_dir".to_string(),
            toml::Value::String("/from/builtin".to_string()),
        );
        defaults.insert(
            "source".to_string(),
            toml::Value::String("Builtin Source".to_string()),
        );

        let toml_config = format!(
            r#"
            plugin_config_dir = "{}"

            [plugin_defaults]
            skip_hidden = true

            [plugins.layered]
            data_dir = "/from/global"
            max_records = 100
            "#,
            dir.path().display()
        );

        let mut registry = PluginRegistry::new();
        load_with(
            &mut registry,
            vec![Box::new(MockCollector::new("layered").with_defaults(defaults))],
            &toml_config,
        );

        let config = &registry.plugins()[0].descriptor.config;
        // override file beats global table beats builtin
        assert_eq!(
            waymark_common::config::get_str(config, "data_dir"),
            Some("/from/override")
        );
        // untouched builtin key survives
        assert_eq!(
            waymark_common::config::get_str(config, "source"),
            Some("Builtin Source")
        );
        // plugin_defaults and per-plugin table keys both present
        assert_eq!(
            waymark_common::config::get_bool(config, "skip_hidden"),
            Some(true)
        );
        assert_eq!(
            waymark_common::config::get_i64(config, "max_records"),
            Some(100)
        );
    }

    #[test]
    fn test_override_file_can_disable_and_reprioritize() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("steered.toml")).unwrap();
        writeln!(file, "enabled = false\npriority = 3").unwrap();

        let toml_config = format!("plugin_config_dir = \"{}\"", dir.path().display());
        let mut registry = PluginRegistry::new();
        load_with(
            &mut registry,
            vec![Box::new(MockCollector::new("steered"))],
            &toml_config,
        );

        let descriptor = &registry.plugins()[0].descriptor;
        assert!(!descriptor.enabled);
        assert_eq!(descriptor.priority, 3);
        // steering keys never leak into plugin configuration
        assert!(descriptor.config.get("enabled").is_none());
        assert!(registry.enabled_ordered().is_empty());
    }

    #[test]
    fn test_malformed_override_file_disables_plugin() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("broken.toml")).unwrap();
        writeln!(file, "not valid toml [[[").unwrap();

        let toml_config = format!("plugin_config_dir = \"{}\"", dir.path().display());
        let mut registry = PluginRegistry::new();
        load_with(
            &mut registry,
            vec![
                Box::new(MockCollector::new("broken")),
                Box::new(MockCollector::new("healthy")),
            ],
            &toml_config,
        );

        assert_eq!(registry.config_errors().len(), 1);
        assert!(registry.plugins().iter().any(|p| !p.descriptor.enabled));
        // the healthy plugin still runs
        let enabled = registry.enabled_ordered();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].descriptor.name, "healthy");
    }

    #[test]
    fn test_missing_required_key_disables_plugin() {
        let mut registry = PluginRegistry::new();
        load_with(
            &mut registry,
            vec![Box::new(
                MockCollector::new("needy").with_required(&["data_dir"]),
            )],
            "",
        );
        assert!(registry.enabled_ordered().is_empty());
        assert_eq!(registry.config_errors().len(), 1);
        let RegistryError::Configuration { plugin, detail } = &registry.config_errors()[0];
        assert_eq!(plugin, "needy");
        assert!(detail.contains("data_dir"));
    }

    #[test]
    fn test_required_key_satisfied_by_any_layer() {
        let mut registry = PluginRegistry::new();
        load_with(
            &mut registry,
            vec![Box::new(
                MockCollector::new("needy").with_required(&["data_dir"]),
            )],
            r#"
            [plugins.needy]
            data_dir = "/exports"
            "#,
        );
        assert_eq!(registry.enabled_ordered().len(), 1);
        assert!(registry.config_errors().is_empty());
    }

    #[test]
    fn test_unmet_host_dependency_disables_plugin() {
        let mut registry = PluginRegistry::with_capabilities(&["filesystem"]);
        load_with(
            &mut registry,
            vec![Box::new(
                MockCollector::new("networked").with_dependencies(&["network"]),
            )],
            "",
        );
        assert!(registry.enabled_ordered().is_empty());
        assert!(registry.config_errors()[0].to_string().contains("network"));
    }

    #[test]
    fn test_rejected_configuration_disables_plugin() {
        let mut registry = PluginRegistry::new();
        load_with(
            &mut registry,
            vec![Box::new(MockCollector::new("picky").rejecting_config())],
            "",
        );
        assert!(registry.enabled_ordered().is_empty());
        assert_eq!(registry.config_errors().len(), 1);
    }

    #[test]
    fn test_reload_bumps_generation_and_keeps_error_counts() {
        let mut registry = PluginRegistry::new();
        load_with(&mut registry, vec![Box::new(MockCollector::new("a"))], "");
        assert_eq!(registry.generation(), 1);
        assert_eq!(registry.plugins()[0].descriptor.generation, 1);

        registry.ledger().record("a");
        registry.ledger().record("a");

        load_with(&mut registry, vec![Box::new(MockCollector::new("a"))], "");
        assert_eq!(registry.generation(), 2);
        assert_eq!(registry.plugins()[0].descriptor.generation, 2);
        assert_eq!(registry.error_count("a"), 2, "ledger survives reload");
    }

    #[test]
    fn test_ledger_counts_per_plugin() {
        let ledger = ErrorLedger::new();
        assert_eq!(ledger.count("x"), 0);
        assert_eq!(ledger.record("x"), 1);
        assert_eq!(ledger.record("x"), 2);
        assert_eq!(ledger.record("y"), 1);
        assert_eq!(ledger.count("x"), 2);
    }
}
