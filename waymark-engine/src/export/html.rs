//! HTML Exporter
//!
//! Self-contained table report: no external assets, no scripts, one row
//! per point. Intended for quickly eyeballing a run's output in a browser.

use super::{escape_markup, ExportError, Exporter};
use chrono::SecondsFormat;
use std::io::Write;
use waymark_common::LocationPoint;

const STYLE: &str = "body{font-family:sans-serif;margin:2em}\
table{border-collapse:collapse;width:100%}\
th,td{border:1px solid #ccc;padding:0.4em 0.6em;text-align:left}\
th{background:#f0f0f0}\
tr:nth-child(even){background:#fafafa}";

/// Writes the dataset as a single-file HTML report
pub struct HtmlExporter;

impl Exporter for HtmlExporter {
    fn format(&self) -> &'static str {
        "html"
    }

    fn export(&self, points: &[LocationPoint], out: &mut dyn Write) -> Result<(), ExportError> {
        writeln!(out, "<!DOCTYPE html>")?;
        writeln!(out, r#"<html lang="en">"#)?;
        writeln!(out, "<head>")?;
        writeln!(out, r#"<meta charset="utf-8">"#)?;
        writeln!(out, "<title>Waymark location report</title>")?;
        writeln!(out, "<style>{}</style>", STYLE)?;
        writeln!(out, "</head>")?;
        writeln!(out, "<body>")?;
        writeln!(out, "<h1>Waymark location report</h1>")?;
        writeln!(out, "<p>{} location(s). Timestamps marked ~ are estimated from collection time.</p>", points.len())?;
        writeln!(out, "<table>")?;
        writeln!(
            out,
            "<tr><th>Timestamp</th><th>Latitude</th><th>Longitude</th><th>Source</th><th>Context</th><th>Accuracy (m)</th></tr>"
        )?;

        for point in points {
            let marker = if point.timestamp_is_estimated { "~" } else { "" };
            writeln!(
                out,
                "<tr><td>{}{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                marker,
                point.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
                point.latitude,
                point.longitude,
                escape_markup(&point.source),
                escape_markup(&point.context),
                point.accuracy_m.map(|v| v.to_string()).unwrap_or_default(),
            )?;
        }

        writeln!(out, "</table>")?;
        writeln!(out, "</body>")?;
        writeln!(out, "</html>")?;
        Ok(())
    }
}
