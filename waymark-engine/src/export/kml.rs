//! KML Exporter
//!
//! One Placemark per point, built by hand rather than through an XML
//! library. Coordinates follow the KML axis order (longitude, latitude,
//! altitude); free-text fields are escaped before insertion.

use super::{escape_markup, ExportError, Exporter};
use chrono::SecondsFormat;
use std::io::Write;
use waymark_common::LocationPoint;

/// Writes the dataset as KML placemarks
pub struct KmlExporter;

impl Exporter for KmlExporter {
    fn format(&self) -> &'static str {
        "kml"
    }

    fn export(&self, points: &[LocationPoint], out: &mut dyn Write) -> Result<(), ExportError> {
        writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
        writeln!(out, r#"<kml xmlns="http://www.opengis.net/kml/2.2">"#)?;
        writeln!(out, "<Document>")?;
        writeln!(out, "  <name>Waymark locations</name>")?;

        for point in points {
            writeln!(out, "  <Placemark>")?;
            writeln!(out, "    <name>{}</name>", escape_markup(&point.source))?;
            if !point.context.is_empty() {
                writeln!(
                    out,
                    "    <description>{}</description>",
                    escape_markup(&point.context)
                )?;
            }
            writeln!(
                out,
                "    <TimeStamp><when>{}</when></TimeStamp>",
                point.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
            )?;
            writeln!(out, "    <ExtendedData>")?;
            write_data(out, "source", &point.source)?;
            write_data(
                out,
                "timestamp_estimated",
                &point.timestamp_is_estimated.to_string(),
            )?;
            if let Some(accuracy) = point.accuracy_m {
                write_data(out, "accuracy_m", &accuracy.to_string())?;
            }
            writeln!(out, "    </ExtendedData>")?;
            writeln!(out, "    <Point>")?;
            writeln!(
                out,
                "      <coordinates>{},{},{}</coordinates>",
                point.longitude,
                point.latitude,
                point.altitude_m.unwrap_or(0.0)
            )?;
            writeln!(out, "    </Point>")?;
            writeln!(out, "  </Placemark>")?;
        }

        writeln!(out, "</Document>")?;
        writeln!(out, "</kml>")?;
        Ok(())
    }
}

fn write_data(out: &mut dyn Write, name: &str, value: &str) -> Result<(), ExportError> {
    writeln!(
        out,
        r#"      <Data name="{}"><value>{}</value></Data>"#,
        name,
        escape_markup(value)
    )?;
    Ok(())
}
