//! CSV Exporter
//!
//! One row per location point with a fixed header. Fields are quoted per
//! RFC 4180 when they contain commas, quotes, or line breaks; quotes are
//! doubled inside quoted fields.

use super::{ExportError, Exporter};
use chrono::SecondsFormat;
use std::io::Write;
use waymark_common::LocationPoint;

const HEADER: &str = "timestamp,latitude,longitude,source,context,timestamp_estimated,accuracy_m,altitude_m";

/// Writes the dataset as comma-separated rows
pub struct CsvExporter;

impl Exporter for CsvExporter {
    fn format(&self) -> &'static str {
        "csv"
    }

    fn export(&self, points: &[LocationPoint], out: &mut dyn Write) -> Result<(), ExportError> {
        writeln!(out, "{}", HEADER)?;
        for point in points {
            writeln!(
                out,
                "{},{},{},{},{},{},{},{}",
                point.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
                point.latitude,
                point.longitude,
                field(&point.source),
                field(&point.context),
                point.timestamp_is_estimated,
                point.accuracy_m.map(|v| v.to_string()).unwrap_or_default(),
                point.altitude_m.map(|v| v.to_string()).unwrap_or_default(),
            )?;
        }
        Ok(())
    }
}

/// Quote a text field when RFC 4180 requires it
fn field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
