//! Social media archive collector
//!
//! Walks the JSON files of a downloaded social-media archive (posts,
//! check-ins, tagged media) and emits one point per record that yields a
//! coordinate pair. The collector is deliberately format-agnostic: the
//! site-specific shape differences are absorbed by the ordered extraction
//! strategies in `waymark_common::normalize`, not by per-site code here.

use crate::collectors::{json_files_under, read_json_file};
use crate::types::{CollectError, CollectQuery, Collector, ConfigStatus};
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, warn};
use waymark_common::config::{get_bool, get_str, ConfigMap};
use waymark_common::normalize::{extract_coordinates, extract_text, extract_timestamp};
use waymark_common::LocationPoint;

/// Object keys that may hold the record array of an archive file
const RECORD_ARRAY_KEYS: &[&str] = &[
    "posts",
    "items",
    "locations",
    "location_history",
    "check_ins",
    "media",
    "videos",
    "places_visited",
];

/// Caption candidates, most specific first
const CONTEXT_KEYS: &[&str] = &["caption.text", "caption", "text", "title", "name", "description"];

/// Generic social-media archive collector
///
/// Configuration keys:
/// - `data_dir` (required): root of the unpacked archive
/// - `source` (default `"Social Archive"`): source label on emitted points
/// - `skip_hidden` (default `true`): ignore dot-files during traversal
pub struct SocialArchiveCollector {
    data_dir: Option<PathBuf>,
    source_label: String,
    skip_hidden: bool,
}

impl SocialArchiveCollector {
    pub fn new() -> Self {
        Self {
            data_dir: None,
            source_label: "Social Archive".to_string(),
            skip_hidden: true,
        }
    }

    /// Candidate records of one archive document: a top-level array, the
    /// first known record array inside an object, or the object itself
    fn records(document: &Value) -> Vec<&Value> {
        if let Some(array) = document.as_array() {
            return array.iter().collect();
        }
        if let Some(object) = document.as_object() {
            for key in RECORD_ARRAY_KEYS {
                if let Some(array) = object.get(*key).and_then(Value::as_array) {
                    return array.iter().collect();
                }
            }
            return vec![document];
        }
        Vec::new()
    }

    /// Normalize one record; `None` when it has no usable coordinates or
    /// falls outside the query bounds
    fn point_from_record(&self, record: &Value, query: &CollectQuery) -> Option<LocationPoint> {
        let (lat, lon) = extract_coordinates(record)?;
        let mut point = LocationPoint::new(lat, lon, &self.source_label);
        if let Some(ts) = extract_timestamp(record) {
            point = point.with_timestamp(ts);
        }
        if let Some(text) = extract_text(record, CONTEXT_KEYS) {
            point = point.with_context(text);
        }
        if !query.accepts(point.timestamp) {
            return None;
        }
        Some(point)
    }
}

impl Default for SocialArchiveCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for SocialArchiveCollector {
    fn name(&self) -> &'static str {
        "social_archive"
    }

    fn version(&self) -> &'static str {
        "1.1.0"
    }

    fn default_config(&self) -> ConfigMap {
        let mut map = ConfigMap::new();
        map.insert(
            "source".to_string(),
            toml::Value::String("Social Archive".to_string()),
        );
        map.insert("skip_hidden".to_string(), toml::Value::Boolean(true));
        map
    }

    fn required_keys(&self) -> &'static [&'static str] {
        &["data_dir"]
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["filesystem"]
    }

    fn priority(&self) -> i32 {
        20
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
        if let Some(skip) = get_bool(config, "skip_hidden") {
            self.skip_hidden = skip;
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
        let mut skipped_files = 0usize;
        for file in json_files_under(dir, self.skip_hidden) {
            let document = match read_json_file(&file) {
                Ok(document) => document,
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "Skipping unreadable archive file");
                    skipped_files += 1;
                    continue;
                }
            };
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            for record in Self::records(&document) {
                if let Some(point) = self.point_from_record(record, query) {
                    points.push(point.with_metadata("source_file", Value::String(file_name.clone())));
                }
            }
        }
        debug!(
            points = points.len(),
            skipped_files,
            dir = %dir.display(),
            "Social archive scan complete"
        );
        Ok(points)
    }
}
