//! Photo metadata sidecar collector
//!
//! Photo library exports place one small JSON sidecar next to each media
//! file, carrying capture time (`photoTakenTime`) and a GPS fix
//! (`geoData`, with `geoDataExif` as the camera-reported fallback). One
//! sidecar yields at most one point; sidecars with a zeroed fix are
//! skipped.

use crate::collectors::{json_files_under, read_json_file};
use crate::types::{CollectError, CollectQuery, Collector, ConfigStatus};
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, warn};
use waymark_common::config::{get_bool, get_str, ConfigMap};
use waymark_common::normalize::{extract_coordinates, extract_text, extract_timestamp, parse_timestamp_value};
use waymark_common::LocationPoint;

/// Photo sidecar collector
///
/// Configuration keys:
/// - `data_dir` (required): root of the exported photo library
/// - `source` (default `"Photo Library"`): source label
/// - `skip_hidden` (default `true`): ignore dot-files during traversal
pub struct PhotoSidecarCollector {
    data_dir: Option<PathBuf>,
    source_label: String,
    skip_hidden: bool,
}

impl PhotoSidecarCollector {
    pub fn new() -> Self {
        Self {
            data_dir: None,
            source_label: "Photo Library".to_string(),
            skip_hidden: true,
        }
    }

    /// True when a document looks like a media sidecar at all
    fn is_sidecar(document: &Value) -> bool {
        document.get("photoTakenTime").is_some()
            || document.get("geoData").is_some()
            || document.get("geoDataExif").is_some()
    }

    fn point_from_sidecar(&self, document: &Value) -> Option<LocationPoint> {
        // device fix first, camera EXIF fix as fallback
        let (lat, lon) = extract_coordinates(document)
            .or_else(|| document.get("geoDataExif").and_then(extract_coordinates))?;

        let mut point = LocationPoint::new(lat, lon, &self.source_label);

        let taken = extract_timestamp(document).or_else(|| {
            document
                .get("creationTime")
                .and_then(|node| node.get("timestamp"))
                .and_then(parse_timestamp_value)
        });
        if let Some(ts) = taken {
            point = point.with_timestamp(ts);
        }

        if let Some(text) = extract_text(document, &["title", "description"]) {
            point = point.with_context(text);
        }

        let altitude = document
            .get("geoData")
            .or_else(|| document.get("geoDataExif"))
            .and_then(|geo| geo.get("altitude"))
            .and_then(Value::as_f64);
        if let Some(altitude) = altitude {
            point = point.with_altitude(altitude);
        }

        Some(point)
    }
}

impl Default for PhotoSidecarCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for PhotoSidecarCollector {
    fn name(&self) -> &'static str {
        "photo_sidecar"
    }

    fn version(&self) -> &'static str {
        "1.0.0"
    }

    fn default_config(&self) -> ConfigMap {
        let mut map = ConfigMap::new();
        map.insert(
            "source".to_string(),
            toml::Value::String("Photo Library".to_string()),
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
        30
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
        let mut without_fix = 0usize;
        for file in json_files_under(dir, self.skip_hidden) {
            let document = match read_json_file(&file) {
                Ok(document) => document,
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "Skipping unreadable sidecar");
                    continue;
                }
            };
            if !Self::is_sidecar(&document) {
                continue;
            }
            match self.point_from_sidecar(&document) {
                Some(point) if query.accepts(point.timestamp) => points.push(point),
                Some(_) => {}
                None => without_fix += 1,
            }
        }
        debug!(
            points = points.len(),
            without_fix,
            dir = %dir.display(),
            "Photo sidecar scan complete"
        );
        Ok(points)
    }
}
