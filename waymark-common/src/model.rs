//! Canonical location record
//!
//! Every collector, regardless of its source format, produces
//! [`LocationPoint`] values. The aggregation engine and the exporters only
//! ever see this one shape.
//!
//! # Invariants
//! - Coordinates are decimal degrees: latitude in [-90, 90], longitude in
//!   [-180, 180], both finite. [`LocationPoint::validate`] enforces this.
//! - `source` is never empty.
//! - `context` is capped at [`MAX_CONTEXT_CHARS`] characters; longer input
//!   is truncated on a character boundary, not rejected.
//! - A point built without a source-provided timestamp carries the
//!   collection time and is tagged `timestamp_is_estimated`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Maximum number of characters retained in `context`
pub const MAX_CONTEXT_CHARS: usize = 200;

/// Validation failure for a single location record
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PointInvalid {
    /// Latitude outside [-90, 90] or not finite
    #[error("latitude out of range: {0}")]
    Latitude(f64),

    /// Longitude outside [-180, 180] or not finite
    #[error("longitude out of range: {0}")]
    Longitude(f64),

    /// Source attribution is empty
    #[error("source must not be empty")]
    EmptySource,
}

/// Structured postal address, all parts optional
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
}

impl Address {
    /// True when no part of the address is present
    pub fn is_empty(&self) -> bool {
        self.formatted.is_none()
            && self.street.is_none()
            && self.city.is_none()
            && self.state.is_none()
            && self.country.is_none()
            && self.postal_code.is_none()
    }
}

/// One observed location, normalized from any collector source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationPoint {
    /// Latitude in decimal degrees, [-90, 90]
    pub latitude: f64,
    /// Longitude in decimal degrees, [-180, 180]
    pub longitude: f64,
    /// Observation time (UTC); collection time when the source had none
    pub timestamp: DateTime<Utc>,
    /// True when `timestamp` was filled in at collection time
    #[serde(default)]
    pub timestamp_is_estimated: bool,
    /// Originating collector or data source, never empty
    pub source: String,
    /// Caption or annotation, at most [`MAX_CONTEXT_CHARS`] characters
    #[serde(default)]
    pub context: String,
    /// Reported horizontal accuracy in meters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_m: Option<f64>,
    /// Reported altitude in meters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude_m: Option<f64>,
    /// Structured address, when the source carried one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    /// Source-specific extras, preserved as-is for exporters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl LocationPoint {
    /// Create a point with an estimated (collection-time) timestamp
    pub fn new(latitude: f64, longitude: f64, source: impl Into<String>) -> Self {
        Self {
            latitude,
            longitude,
            timestamp: crate::time::now(),
            timestamp_is_estimated: true,
            source: source.into(),
            context: String::new(),
            accuracy_m: None,
            altitude_m: None,
            address: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Set a source-provided timestamp, clearing the estimated tag
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self.timestamp_is_estimated = false;
        self
    }

    /// Set the context, truncated to [`MAX_CONTEXT_CHARS`] characters
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = truncate_context(&context.into());
        self
    }

    /// Set the reported horizontal accuracy in meters
    pub fn with_accuracy(mut self, meters: f64) -> Self {
        self.accuracy_m = Some(meters);
        self
    }

    /// Set the reported altitude in meters
    pub fn with_altitude(mut self, meters: f64) -> Self {
        self.altitude_m = Some(meters);
        self
    }

    /// Attach a structured address; empty addresses are dropped
    pub fn with_address(mut self, address: Address) -> Self {
        self.address = if address.is_empty() {
            None
        } else {
            Some(address)
        };
        self
    }

    /// Attach one metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Check the record-level invariants
    ///
    /// Coordinates must be finite and in range; the source attribution must
    /// not be blank. Context length is not checked here: the constructors
    /// and extraction helpers truncate on intake.
    pub fn validate(&self) -> Result<(), PointInvalid> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(PointInvalid::Latitude(self.latitude));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(PointInvalid::Longitude(self.longitude));
        }
        if self.source.trim().is_empty() {
            return Err(PointInvalid::EmptySource);
        }
        Ok(())
    }
}

/// Truncate a caption to [`MAX_CONTEXT_CHARS`] characters, boundary-safe
pub fn truncate_context(text: &str) -> String {
    match text.char_indices().nth(MAX_CONTEXT_CHARS) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_new_point_has_estimated_timestamp() {
        let before = Utc::now();
        let point = LocationPoint::new(48.8566, 2.3522, "Test Source");
        let after = Utc::now();
        assert!(point.timestamp_is_estimated);
        assert!(point.timestamp >= before && point.timestamp <= after);
    }

    #[test]
    fn test_with_timestamp_clears_estimated_tag() {
        let point = LocationPoint::new(48.8566, 2.3522, "Test Source")
            .with_timestamp(ts(2024, 3, 1, 12, 0, 0));
        assert!(!point.timestamp_is_estimated);
        assert_eq!(point.timestamp, ts(2024, 3, 1, 12, 0, 0));
    }

    #[test]
    fn test_context_truncated_to_limit() {
        let long = "x".repeat(500);
        let point = LocationPoint::new(0.0, 0.0, "src").with_context(&long);
        assert_eq!(point.context.chars().count(), MAX_CONTEXT_CHARS);
    }

    #[test]
    fn test_context_truncation_respects_char_boundaries() {
        // Multi-byte characters must not be split mid-encoding
        let long: String = "日本語テキスト".chars().cycle().take(400).collect();
        let point = LocationPoint::new(0.0, 0.0, "src").with_context(&long);
        assert_eq!(point.context.chars().count(), MAX_CONTEXT_CHARS);
        assert!(long.starts_with(&point.context));
    }

    #[test]
    fn test_short_context_kept_verbatim() {
        let point = LocationPoint::new(0.0, 0.0, "src").with_context("lunch at the pier");
        assert_eq!(point.context, "lunch at the pier");
    }

    #[test]
    fn test_validate_accepts_boundary_coordinates() {
        for (lat, lon) in [(90.0, 180.0), (-90.0, -180.0), (0.0, 0.0)] {
            let point = LocationPoint::new(lat, lon, "src");
            assert!(point.validate().is_ok(), "rejected ({}, {})", lat, lon);
        }
    }

    #[test]
    fn test_validate_rejects_out_of_range_latitude() {
        let point = LocationPoint::new(90.0001, 0.0, "src");
        assert_eq!(point.validate(), Err(PointInvalid::Latitude(90.0001)));
    }

    #[test]
    fn test_validate_rejects_out_of_range_longitude() {
        let point = LocationPoint::new(0.0, -180.0001, "src");
        assert_eq!(point.validate(), Err(PointInvalid::Longitude(-180.0001)));
    }

    #[test]
    fn test_validate_rejects_non_finite_coordinates() {
        assert!(LocationPoint::new(f64::NAN, 0.0, "src").validate().is_err());
        assert!(LocationPoint::new(0.0, f64::INFINITY, "src")
            .validate()
            .is_err());
    }

    #[test]
    fn test_validate_rejects_blank_source() {
        assert_eq!(
            LocationPoint::new(1.0, 1.0, "").validate(),
            Err(PointInvalid::EmptySource)
        );
        assert_eq!(
            LocationPoint::new(1.0, 1.0, "   ").validate(),
            Err(PointInvalid::EmptySource)
        );
    }

    #[test]
    fn test_empty_address_is_dropped() {
        let point = LocationPoint::new(1.0, 1.0, "src").with_address(Address::default());
        assert!(point.address.is_none());

        let point = LocationPoint::new(1.0, 1.0, "src").with_address(Address {
            city: Some("Berlin".to_string()),
            ..Default::default()
        });
        assert!(point.address.is_some());
    }

    #[test]
    fn test_serde_round_trip_preserves_fields() {
        let point = LocationPoint::new(52.52, 13.405, "Social Archive")
            .with_timestamp(ts(2023, 7, 14, 9, 30, 0))
            .with_context("checked in")
            .with_accuracy(12.5)
            .with_metadata("post_id", serde_json::json!("abc123"));
        let json = serde_json::to_string(&point).unwrap();
        let back: LocationPoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, point);
    }

    #[test]
    fn test_estimated_tag_defaults_false_on_deserialize() {
        // Records serialized by older tools may omit the tag entirely
        let json = r#"{
            "latitude": 10.0,
            "longitude": 20.0,
            "timestamp": "2024-01-01T00:00:00Z",
            "source": "legacy"
        }"#;
        let point: LocationPoint = serde_json::from_str(json).unwrap();
        assert!(!point.timestamp_is_estimated);
        assert_eq!(point.context, "");
    }
}
