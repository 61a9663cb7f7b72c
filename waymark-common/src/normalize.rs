//! Normalization helpers for heterogeneous export formats
//!
//! Personal-data exports disagree wildly about where coordinates,
//! timestamps, and captions live in a record. These helpers probe a fixed,
//! ordered list of strategies against a `serde_json::Value` node and return
//! the first hit. Collectors call them instead of hand-rolling per-format
//! traversal.
//!
//! All functions here are pure and total: malformed or unexpected input
//! yields `None`, never a panic and never an error value.

use crate::model::truncate_context;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

// ============================================================================
// Coordinates
// ============================================================================

/// Direct key pairs probed on a node, in priority order
const COORD_KEY_PAIRS: &[(&str, &str)] = &[
    ("latitude", "longitude"),
    ("lat", "lon"),
    ("lat", "lng"),
];

/// Fixed-point E7 pair (Takeout-style exports store degrees * 1e7)
const COORD_E7_PAIR: (&str, &str) = ("latitudeE7", "longitudeE7");

/// Container keys probed one level down
const COORD_CONTAINER_KEYS: &[&str] = &["coordinate", "coordinates", "location", "geo_data", "geoData"];

/// Container keys probed under a `place` object
const PLACE_CONTAINER_KEYS: &[&str] = &["location", "coordinate"];

/// Keys that may hold a delimited `"lat,lon"` string
const LATLON_STRING_KEYS: &[&str] = &["coordinates", "coords", "position", "latlng"];

/// Extract a coordinate pair from a record node.
///
/// Strategies, first in-range hit wins:
/// 1. direct keys on the node (`latitude`/`longitude` and the `lat`/`lon`,
///    `lat`/`lng` aliases, plus `latitudeE7`/`longitudeE7` scaled by 1e-7)
/// 2. the same probe one level down under a container key (`coordinate`,
///    `coordinates`, `location`, `geo_data`, `geoData`)
/// 3. two levels down under `place.location` or `place.coordinate`
/// 4. a delimited `"lat,lon"` string under `coordinates`, `coords`,
///    `position`, or `latlng`
///
/// Values may be JSON numbers or numeric strings. `(0.0, 0.0)` is rejected:
/// real exports use it as a null-island placeholder for "no fix".
pub fn extract_coordinates(node: &Value) -> Option<(f64, f64)> {
    let obj = node.as_object()?;

    if let Some(pair) = direct_pair(node) {
        return Some(pair);
    }

    for key in COORD_CONTAINER_KEYS {
        if let Some(container) = obj.get(*key) {
            if let Some(pair) = direct_pair(container) {
                return Some(pair);
            }
        }
    }

    if let Some(place) = obj.get("place") {
        for key in PLACE_CONTAINER_KEYS {
            if let Some(container) = place.get(key) {
                if let Some(pair) = direct_pair(container) {
                    return Some(pair);
                }
            }
        }
    }

    for key in LATLON_STRING_KEYS {
        if let Some(text) = obj.get(*key).and_then(Value::as_str) {
            if let Some(pair) = parse_latlon_string(text) {
                return Some(pair);
            }
        }
    }

    None
}

/// Probe one object for a direct coordinate pair
fn direct_pair(node: &Value) -> Option<(f64, f64)> {
    let obj = node.as_object()?;

    for (lat_key, lon_key) in COORD_KEY_PAIRS {
        if let (Some(lat), Some(lon)) = (
            obj.get(*lat_key).and_then(number_value),
            obj.get(*lon_key).and_then(number_value),
        ) {
            if let Some(pair) = accept_pair(lat, lon) {
                return Some(pair);
            }
        }
    }

    let (lat_key, lon_key) = COORD_E7_PAIR;
    if let (Some(lat), Some(lon)) = (
        obj.get(lat_key).and_then(number_value),
        obj.get(lon_key).and_then(number_value),
    ) {
        if let Some(pair) = accept_pair(lat * 1e-7, lon * 1e-7) {
            return Some(pair);
        }
    }

    None
}

/// Parse a `"lat,lon"` or `"lat, lon"` string
fn parse_latlon_string(text: &str) -> Option<(f64, f64)> {
    let (lat_part, lon_part) = text.split_once(',')?;
    let lat = lat_part.trim().parse::<f64>().ok()?;
    let lon = lon_part.trim().parse::<f64>().ok()?;
    accept_pair(lat, lon)
}

/// Range-check a candidate pair and reject the null-island placeholder
fn accept_pair(lat: f64, lon: f64) -> Option<(f64, f64)> {
    if !lat.is_finite() || !lon.is_finite() {
        return None;
    }
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return None;
    }
    if lat == 0.0 && lon == 0.0 {
        return None;
    }
    Some((lat, lon))
}

/// Coerce a JSON number or numeric string to f64
fn number_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

// ============================================================================
// Timestamps
// ============================================================================

/// Keys probed for a timestamp, in priority order (dotted = nested path)
const TIMESTAMP_KEYS: &[&str] = &[
    "timestamp",
    "timestamp_ms",
    "timestampMs",
    "time",
    "taken_at",
    "created_at",
    "creation_timestamp",
    "date",
    "photoTakenTime.timestamp",
];

/// Plausible epoch-seconds window: 1900-01-01 to 2100-01-01
const EPOCH_SECS_MIN: i64 = -2_208_988_800;
const EPOCH_SECS_MAX: i64 = 4_102_444_800;

/// Date/time layouts tried for non-ISO strings, in order
const DATETIME_PATTERNS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y:%m:%d %H:%M:%S", // EXIF DateTimeOriginal
];

/// Extract a timestamp from a record node.
///
/// Probes [`TIMESTAMP_KEYS`] in order and parses the first present value
/// with [`parse_timestamp_value`]. Keys holding unparseable values do not
/// block later keys.
pub fn extract_timestamp(node: &Value) -> Option<DateTime<Utc>> {
    for key in TIMESTAMP_KEYS {
        if let Some(value) = lookup_path(node, key) {
            if let Some(ts) = parse_timestamp_value(value) {
                return Some(ts);
            }
        }
    }
    None
}

/// Parse one JSON value as a UTC timestamp.
///
/// Accepted forms, in order:
/// - integer (or all-digit string) epoch value: read as seconds when the
///   result lands in 1900..2100, otherwise retried as milliseconds against
///   the same window, otherwise rejected
/// - RFC 3339 / ISO-8601 with an offset or trailing `Z`
/// - a small fixed set of naive layouts, taken as UTC: `%Y-%m-%dT%H:%M:%S`
///   (with optional fraction), `%Y-%m-%d %H:%M:%S`, the EXIF form
///   `%Y:%m:%d %H:%M:%S`, and bare `%Y-%m-%d` (midnight)
///
/// No fuzzy parsing: anything else is `None`.
pub fn parse_timestamp_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                parse_epoch_int(i)
            } else {
                let f = n.as_f64()?;
                if !f.is_finite() {
                    return None;
                }
                parse_epoch_int(f.trunc() as i64)
            }
        }
        Value::String(s) => parse_timestamp_str(s.trim()),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }

    if s.chars().all(|c| c.is_ascii_digit())
        || (s.starts_with('-') && s.len() > 1 && s[1..].chars().all(|c| c.is_ascii_digit()))
    {
        return s.parse::<i64>().ok().and_then(parse_epoch_int);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for pattern in DATETIME_PATTERNS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, pattern) {
            return Some(naive.and_utc());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }

    None
}

/// Interpret an integer as epoch seconds, falling back to milliseconds
/// when the seconds reading is implausible
fn parse_epoch_int(value: i64) -> Option<DateTime<Utc>> {
    if (EPOCH_SECS_MIN..=EPOCH_SECS_MAX).contains(&value) {
        return DateTime::from_timestamp(value, 0);
    }
    let as_secs = value / 1000;
    if (EPOCH_SECS_MIN..=EPOCH_SECS_MAX).contains(&as_secs) {
        return DateTime::from_timestamp_millis(value);
    }
    None
}

// ============================================================================
// Text
// ============================================================================

/// Extract the first non-empty text field among `keys` (dotted = nested
/// path), trimmed and truncated to the context limit.
pub fn extract_text(node: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(text) = lookup_path(node, key).and_then(Value::as_str) {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                return Some(truncate_context(trimmed));
            }
        }
    }
    None
}

/// Walk a dotted path (`"photoTakenTime.timestamp"`) through nested objects
fn lookup_path<'a>(node: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = node;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}
