//! Location history dump collector
//!
//! Reads Takeout-style location history exports: flat `locations` arrays
//! with E7 fixed-point coordinates and `timestampMs` fields, plus the
//! newer semantic-history layout with `timelineObjects` holding
//! `placeVisit` entries. Activity segments have no stable coordinate
//! semantics and are skipped.

use crate::collectors::{json_files_under, read_json_file};
use crate::types::{CollectError, CollectQuery, Collector, ConfigStatus};
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, warn};
use waymark_common::config::{get_i64, get_str, ConfigMap};
use waymark_common::normalize::{extract_coordinates, extract_text, extract_timestamp, parse_timestamp_value};
use waymark_common::{Address, LocationPoint};

const DEFAULT_MAX_RECORDS: usize = 100_000;

/// Location history collector
///
/// Configuration keys:
/// - `data_dir` (required): directory holding the history JSON files
/// - `source` (default `"Location History"`): source label
/// - `max_records` (default 100000): hard cap on emitted points
pub struct LocationHistoryCollector {
    data_dir: Option<PathBuf>,
    source_label: String,
    max_records: usize,
}

impl LocationHistoryCollector {
    pub fn new() -> Self {
        Self {
            data_dir: None,
            source_label: "Location History".to_string(),
            max_records: DEFAULT_MAX_RECORDS,
        }
    }

    /// One entry of a flat `locations` array
    fn point_from_location(&self, record: &Value) -> Option<LocationPoint> {
        let (lat, lon) = extract_coordinates(record)?;
        let mut point = LocationPoint::new(lat, lon, &self.source_label);
        if let Some(ts) = extract_timestamp(record) {
            point = point.with_timestamp(ts);
        }
        if let Some(accuracy) = record.get("accuracy").and_then(Value::as_f64) {
            point = point.with_accuracy(accuracy);
        }
        if let Some(altitude) = record.get("altitude").and_then(Value::as_f64) {
            point = point.with_altitude(altitude);
        }
        Some(point)
    }

    /// One `timelineObjects` entry; only place visits carry a usable fix
    fn point_from_timeline_object(&self, object: &Value) -> Option<LocationPoint> {
        let visit = object.get("placeVisit")?;
        let location = visit.get("location")?;
        let (lat, lon) = extract_coordinates(location)?;

        let mut point = LocationPoint::new(lat, lon, &self.source_label);
        let start = visit
            .get("duration")
            .and_then(|d| d.get("startTimestampMs").or_else(|| d.get("startTimestamp")));
        if let Some(ts) = start.and_then(parse_timestamp_value) {
            point = point.with_timestamp(ts);
        }
        if let Some(name) = extract_text(location, &["name"]) {
            point = point.with_context(name);
        }
        if let Some(formatted) = extract_text(location, &["address"]) {
            point = point.with_address(Address {
                formatted: Some(formatted),
                ..Default::default()
            });
        }
        Some(point)
    }
}

impl Default for LocationHistoryCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for LocationHistoryCollector {
    fn name(&self) -> &'static str {
        "location_history"
    }

    fn version(&self) -> &'static str {
        "1.0.2"
    }

    fn default_config(&self) -> ConfigMap {
        let mut map = ConfigMap::new();
        map.insert(
            "source".to_string(),
            toml::Value::String("Location History".to_string()),
        );
        map.insert(
            "max_records".to_string(),
            toml::Value::Integer(DEFAULT_MAX_RECORDS as i64),
        );
        map
    }

    fn required_keys(&self) -> &'static [&'static str] {
        &["data_dir"]
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["filesystem"]
    }

    fn priority(&self) -> i32 {
        10
    }

    fn configure(&mut self, config: &ConfigMap) -> waymark_common::Result<()> {
        match get_str(config, "data_dir") {
            Some(dir) if !dir.trim().is_empty() => self.data_dir = Some(PathBuf::from(dir)),
            _ => {
                return Err(waymark_common::Error::Config(
                    "data_dir must be a non-empty string".to_string(),
                ))
            }
        }
        if let Some(label) = get_str(config, "source") {
            self.source_label = label.to_string();
        }
        if let Some(max) = get_i64(config, "max_records") {
            if max <= 0 {
                return Err(waymark_common::Error::Config(
                    "max_records must be positive".to_string(),
                ));
            }
            self.max_records = max as usize;
        }
        Ok(())
    }

    fn ready(&self) -> ConfigStatus {
        match &self.data_dir {
            Some(dir) if dir.is_dir() => ConfigStatus::Ready,
            Some(dir) => ConfigStatus::not_configured(format!(
                "data_dir {} is not a directory",
                dir.display()
            )),
            None => ConfigStatus::not_configured("data_dir not configured"),
        }
    }

    async fn collect(&self, query: &CollectQuery) -> Result<Vec<LocationPoint>, CollectError> {
        let dir = self
            .data_dir
            .as_ref()
            .ok_or_else(|| CollectError::Internal("collector not configured".to_string()))?;

        let mut points = Vec::new();
        let mut capped = false;
        'files: for file in json_files_under(dir, true) {
            let document = match read_json_file(&file) {
                Ok(document) => document,
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "Skipping unreadable history file");
                    continue;
                }
            };

            let mut candidates: Vec<Option<LocationPoint>> = Vec::new();
            if let Some(locations) = document.get("locations").and_then(Value::as_array) {
                candidates.extend(locations.iter().map(|r| self.point_from_location(r)));
            }
            if let Some(objects) = document.get("timelineObjects").and_then(Value::as_array) {
                candidates.extend(objects.iter().map(|o| self.point_from_timeline_object(o)));
            }

            for point in candidates.into_iter().flatten() {
                if !query.accepts(point.timestamp) {
                    continue;
                }
                if points.len() >= self.max_records {
                    capped = true;
                    break 'files;
                }
                points.push(point);
            }
        }

        if capped {
            warn!(
                max_records = self.max_records,
                "Record cap reached, remaining history ignored"
            );
        }
        debug!(points = points.len(), dir = %dir.display(), "Location history scan complete");
        Ok(points)
    }
}
