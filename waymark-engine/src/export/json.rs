//! JSON Exporter
//!
//! Pretty-printed document carrying the dataset plus a small metadata
//! header so a consumer can tell what produced the file and when.

use super::{ExportError, Exporter};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use waymark_common::{time, LocationPoint};

/// Top-level document shape written by [`JsonExporter`]
#[derive(Serialize)]
struct Document<'a> {
    generator: &'static str,
    version: &'static str,
    exported_at: DateTime<Utc>,
    count: usize,
    locations: &'a [LocationPoint],
}

/// Writes the dataset as a pretty-printed JSON document
pub struct JsonExporter;

impl Exporter for JsonExporter {
    fn format(&self) -> &'static str {
        "json"
    }

    fn export(&self, points: &[LocationPoint], out: &mut dyn Write) -> Result<(), ExportError> {
        let document = Document {
            generator: "waymark",
            version: env!("CARGO_PKG_VERSION"),
            exported_at: time::now(),
            count: points.len(),
            locations: points,
        };
        serde_json::to_writer_pretty(&mut *out, &document)?;
        writeln!(out)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn render(points: &[LocationPoint]) -> String {
        let mut buffer = Vec::new();
        JsonExporter.export(points, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn document_carries_metadata_and_every_point() {
        let points = vec![
            LocationPoint::new(48.8566, 2.3522, "A")
                .with_timestamp(ts("2024-01-01T10:00:00Z"))
                .with_context("First"),
            LocationPoint::new(51.5074, -0.1278, "B").with_timestamp(ts("2024-01-02T11:00:00Z")),
        ];

        let parsed: serde_json::Value = serde_json::from_str(&render(&points)).unwrap();

        assert_eq!(parsed["generator"], "waymark");
        assert_eq!(parsed["count"], 2);
        assert!(parsed["exported_at"].is_string());
        assert_eq!(parsed["locations"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn exported_points_deserialize_back_unchanged() {
        let points = vec![LocationPoint::new(-33.86, 151.2, "Sydney")
            .with_timestamp(ts("2024-05-01T08:15:00Z"))
            .with_context("Harbour")
            .with_accuracy(5.0)];

        let parsed: serde_json::Value = serde_json::from_str(&render(&points)).unwrap();
        let restored: Vec<LocationPoint> =
            serde_json::from_value(parsed["locations"].clone()).unwrap();

        assert_eq!(restored, points);
    }

    #[test]
    fn empty_dataset_is_a_valid_document() {
        let parsed: serde_json::Value = serde_json::from_str(&render(&[])).unwrap();
        assert_eq!(parsed["count"], 0);
        assert_eq!(parsed["locations"].as_array().unwrap().len(), 0);
    }
}
