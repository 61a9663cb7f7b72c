//! Offline IP trace collector
//!
//! Joins an access log's IP addresses against a local geo lookup table
//! and emits one point per resolvable log entry. Everything is offline:
//! the "lookup" is a JSON file the operator exported beforehand, never a
//! live service. Private, loopback, and otherwise non-routable addresses
//! carry no location signal and are skipped by default.

use crate::collectors::read_json_file;
use crate::types::{CollectError, CollectQuery, Collector, ConfigStatus};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{debug, warn};
use waymark_common::config::{get_bool, get_str, ConfigMap};
use waymark_common::normalize::{extract_timestamp, parse_timestamp_value};
use waymark_common::{Address, LocationPoint};

/// One row of the geo lookup table
#[derive(Debug, Clone, Deserialize)]
struct GeoEntry {
    ip: String,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    country: Option<String>,
}

/// One parsed log entry before the table join
struct LogEntry {
    ip: String,
    timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

/// IP trace collector
///
/// Configuration keys:
/// - `geo_table` (required): JSON array of `{ip, latitude, longitude,
///   city?, country?}` rows
/// - `log_path` (required): the IP log; a `.json` array of objects, or
///   text lines of `ip [timestamp]`
/// - `source` (default `"IP Trace"`): source label
/// - `skip_private` (default `true`): drop non-routable addresses
pub struct IpTraceCollector {
    geo_table: Option<PathBuf>,
    log_path: Option<PathBuf>,
    source_label: String,
    skip_private: bool,
}

impl IpTraceCollector {
    pub fn new() -> Self {
        Self {
            geo_table: None,
            log_path: None,
            source_label: "IP Trace".to_string(),
            skip_private: true,
        }
    }

    /// Load and index the lookup table; this is the collector's core
    /// input, so failure here fails the invocation
    fn load_table(&self, path: &PathBuf) -> Result<BTreeMap<String, GeoEntry>, CollectError> {
        let document = read_json_file(path)?;
        let entries: Vec<GeoEntry> = serde_json::from_value(document)?;
        Ok(entries
            .into_iter()
            .map(|entry| (entry.ip.clone(), entry))
            .collect())
    }

    /// Parse the log into entries; unparseable lines are skipped
    fn load_log(&self, path: &PathBuf) -> Result<Vec<LogEntry>, CollectError> {
        if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json")) {
            let document = read_json_file(path)?;
            let Some(array) = document.as_array() else {
                return Err(CollectError::Malformed(
                    "JSON log must be a top-level array".to_string(),
                ));
            };
            return Ok(array
                .iter()
                .filter_map(|element| {
                    let ip = element.get("ip").and_then(Value::as_str)?.to_string();
                    Some(LogEntry {
                        ip,
                        timestamp: extract_timestamp(element),
                    })
                })
                .collect());
        }

        let content = std::fs::read_to_string(path)?;
        let mut entries = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let Some(ip) = parts.next() else { continue };
            let rest: Vec<&str> = parts.collect();
            let timestamp = if rest.is_empty() {
                None
            } else {
                parse_timestamp_value(&Value::String(rest.join(" ")))
            };
            entries.push(LogEntry {
                ip: ip.to_string(),
                timestamp,
            });
        }
        Ok(entries)
    }
}

/// True for addresses that cannot correspond to a public location
fn is_non_routable(ip: &str) -> Option<bool> {
    match ip.parse::<IpAddr>().ok()? {
        IpAddr::V4(v4) => Some(
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified(),
        ),
        IpAddr::V6(v6) => Some(v6.is_loopback() || v6.is_unspecified()),
    }
}

impl Default for IpTraceCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for IpTraceCollector {
    fn name(&self) -> &'static str {
        "ip_trace"
    }

    fn version(&self) -> &'static str {
        "0.9.1"
    }

    fn default_config(&self) -> ConfigMap {
        let mut map = ConfigMap::new();
        map.insert(
            "source".to_string(),
            toml::Value::String("IP Trace".to_string()),
        );
        map.insert("skip_private".to_string(), toml::Value::Boolean(true));
        map
    }

    fn required_keys(&self) -> &'static [&'static str] {
        &["geo_table", "log_path"]
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["filesystem"]
    }

    fn priority(&self) -> i32 {
        40
    }

    fn configure(&mut self, config: &ConfigMap) -> waymark_common::Result<()> {
        match get_str(config, "geo_table") {
            Some(path) if !path.trim().is_empty() => self.geo_table = Some(PathBuf::from(path)),
            _ => {
                return Err(waymark_common::Error::Config(
                    "geo_table must be a non-empty string".to_string(),
                ))
            }
        }
        match get_str(config, "log_path") {
            Some(path) if !path.trim().is_empty() => self.log_path = Some(PathBuf::from(path)),
            _ => {
                return Err(waymark_common::Error::Config(
                    "log_path must be a non-empty string".to_string(),
                ))
            }
        }
        if let Some(label) = get_str(config, "source") {
            self.source_label = label.to_string();
        }
        if let Some(skip) = get_bool(config, "skip_private") {
            self.skip_private = skip;
        }
        Ok(())
    }

    fn ready(&self) -> ConfigStatus {
        let Some(table) = &self.geo_table else {
            return ConfigStatus::not_configured("geo_table not configured");
        };
        let Some(log) = &self.log_path else {
            return ConfigStatus::not_configured("log_path not configured");
        };
        if !table.is_file() {
            return ConfigStatus::not_configured(format!("geo_table {} not found", table.display()));
        }
        if !log.is_file() {
            return ConfigStatus::not_configured(format!("log_path {} not found", log.display()));
        }
        ConfigStatus::Ready
    }

    async fn collect(&self, query: &CollectQuery) -> Result<Vec<LocationPoint>, CollectError> {
        let (table_path, log_path) = match (&self.geo_table, &self.log_path) {
            (Some(table), Some(log)) => (table, log),
            _ => return Err(CollectError::Internal("collector not configured".to_string())),
        };

        let table = self.load_table(table_path)?;
        let entries = self.load_log(log_path)?;

        let mut points = Vec::new();
        let mut skipped_private = 0usize;
        let mut unknown = 0usize;
        for entry in entries {
            match is_non_routable(&entry.ip) {
                None => {
                    unknown += 1;
                    continue;
                }
                Some(true) if self.skip_private => {
                    skipped_private += 1;
                    continue;
                }
                _ => {}
            }
            let Some(geo) = table.get(&entry.ip) else {
                unknown += 1;
                continue;
            };

            let mut point = LocationPoint::new(geo.latitude, geo.longitude, &self.source_label)
                .with_context(entry.ip.clone())
                .with_metadata("ip", Value::String(entry.ip.clone()))
                .with_address(Address {
                    city: geo.city.clone(),
                    country: geo.country.clone(),
                    ..Default::default()
                });
            if let Some(ts) = entry.timestamp {
                point = point.with_timestamp(ts);
            }
            if query.accepts(point.timestamp) {
                points.push(point);
            }
        }

        debug!(
            points = points.len(),
            skipped_private,
            unknown,
            "IP trace join complete"
        );
        Ok(points)
    }
}
