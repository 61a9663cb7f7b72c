//! Export Formats
//!
//! Serializes the final location dataset to interchange formats. Exporters
//! receive the canonical dataset exactly as the aggregation pass produced
//! it and never mutate or reorder it.
//!
//! # Formats
//! - `csv` — spreadsheet-friendly rows ([`csv::CsvExporter`])
//! - `json` — pretty-printed document with run metadata ([`json::JsonExporter`])
//! - `kml` — placemarks for Google Earth and friends ([`kml::KmlExporter`])
//! - `html` — self-contained table report ([`html::HtmlExporter`])

pub mod csv;
pub mod html;
pub mod json;
pub mod kml;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;
use tracing::info;
use waymark_common::LocationPoint;

/// Format names accepted by [`exporter_for`]
pub const SUPPORTED_FORMATS: &[&str] = &["csv", "html", "json", "kml"];

/// Errors raised while writing an export
#[derive(Error, Debug)]
pub enum ExportError {
    /// Failed to write to the output
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to serialize the dataset
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A serializer for one output format.
///
/// Implementations write the complete dataset to the given sink and must
/// not mutate, filter, or reorder the points they are handed.
pub trait Exporter {
    /// Short format name as accepted on the command line (e.g. `"csv"`)
    fn format(&self) -> &'static str;

    /// Write the dataset to `out`
    fn export(&self, points: &[LocationPoint], out: &mut dyn Write) -> Result<(), ExportError>;
}

/// Look up the exporter for a format name (case-insensitive).
///
/// Returns `None` for formats outside [`SUPPORTED_FORMATS`].
pub fn exporter_for(format: &str) -> Option<Box<dyn Exporter>> {
    match format.to_ascii_lowercase().as_str() {
        "csv" => Some(Box::new(csv::CsvExporter)),
        "html" => Some(Box::new(html::HtmlExporter)),
        "json" => Some(Box::new(json::JsonExporter)),
        "kml" => Some(Box::new(kml::KmlExporter)),
        _ => None,
    }
}

/// Export the dataset to a file, creating or truncating it.
pub fn export_to_path(
    exporter: &dyn Exporter,
    points: &[LocationPoint],
    path: &Path,
) -> Result<(), ExportError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    exporter.export(points, &mut writer)?;
    writer.flush()?;

    info!(
        format = exporter.format(),
        path = %path.display(),
        points = points.len(),
        "Export written"
    );
    Ok(())
}

/// Escape the XML/HTML special characters in `text`
pub(crate) fn escape_markup(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
