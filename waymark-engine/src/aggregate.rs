//! Aggregation Engine
//!
//! Merges per-plugin collection results into one coherent, deduplicated,
//! filtered, ordered location dataset.
//!
//! # Merge Pipeline
//! 1. Concatenate locations from all results (failed plugins contribute none)
//! 2. Drop records that fail coordinate/source validation
//! 3. Authoritative date-range filter (inclusive bounds)
//! 4. Authoritative radius filter (great-circle distance from a center)
//! 5. Deduplicate near-identical observations across sources
//! 6. Order by timestamp, then source, then arrival order
//!
//! Collectors already pre-filter by date as a best effort; steps 3 and 4
//! re-apply the caller's bounds authoritatively so the final dataset does
//! not depend on how thorough any one collector was.
//!
//! # Deduplication
//! Two points are duplicates when their timestamps fall within a small
//! tolerance window AND their coordinates lie within a small spatial
//! tolerance, regardless of which collector reported them. Of two
//! duplicates, the one with a source-claimed (non-estimated) timestamp is
//! retained; on a tie, the one with the longer context; on a further tie,
//! the one that arrived first.
//!
//! The pass is deterministic and idempotent: merging its own output again
//! with the same filters removes nothing and changes no ordering.

use crate::types::ExecutionResult;
use chrono::{DateTime, Duration, Utc};
use std::cmp::Ordering;
use tracing::{info, warn};
use waymark_common::geo::{haversine_km, haversine_m};
use waymark_common::time::within;
use waymark_common::LocationPoint;

/// Default deduplication time window in seconds
pub const DEFAULT_TIME_TOLERANCE_SECS: i64 = 60;

/// Default deduplication spatial window in meters
pub const DEFAULT_SPATIAL_TOLERANCE_M: f64 = 10.0;

// ============================================================================
// Merge Filter
// ============================================================================

/// Caller-supplied bounds applied authoritatively during aggregation.
///
/// The radius filter applies only when both `center` and `radius_km` are
/// present. An all-`None` filter retains every valid point.
#[derive(Debug, Clone, Default)]
pub struct MergeFilter {
    /// Earliest timestamp to retain (inclusive)
    pub date_from: Option<DateTime<Utc>>,
    /// Latest timestamp to retain (inclusive)
    pub date_to: Option<DateTime<Utc>>,
    /// Center of the geographic filter as (latitude, longitude)
    pub center: Option<(f64, f64)>,
    /// Maximum great-circle distance from `center` in kilometers
    pub radius_km: Option<f64>,
}

impl MergeFilter {
    /// Filter that retains everything
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// True when `timestamp` falls inside the inclusive date bounds.
    ///
    /// Estimated timestamps hold the collection time, so they are bounded
    /// by when the record was collected rather than by any source claim.
    fn accepts_time(&self, timestamp: DateTime<Utc>) -> bool {
        if let Some(from) = self.date_from {
            if timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.date_to {
            if timestamp > to {
                return false;
            }
        }
        true
    }

    /// True when the coordinates lie within `radius_km` of `center`.
    fn accepts_place(&self, latitude: f64, longitude: f64) -> bool {
        match (self.center, self.radius_km) {
            (Some((center_lat, center_lon)), Some(radius_km)) => {
                haversine_km(center_lat, center_lon, latitude, longitude) <= radius_km
            }
            _ => true,
        }
    }
}

// ============================================================================
// Aggregation Engine
// ============================================================================

/// A candidate point tagged with its position in the concatenated input,
/// used to keep tie-breaking stable across runs.
#[derive(Debug, Clone)]
struct Survivor {
    point: LocationPoint,
    seq: usize,
}

/// Merges, filters, deduplicates, and orders collected location points.
///
/// Runs single-threaded over the complete set of execution results after
/// all plugins have returned or timed out. Performs no I/O and holds no
/// locks; failed plugins contribute empty location sets and are reported
/// separately through their `ExecutionResult` errors.
///
/// # Example
/// ```rust,ignore
/// use waymark_engine::aggregate::{AggregationEngine, MergeFilter};
///
/// let engine = AggregationEngine::new();
/// let dataset = engine.merge(&results, &MergeFilter::unbounded());
/// ```
pub struct AggregationEngine {
    /// Maximum timestamp gap for two points to count as duplicates
    time_tolerance: Duration,
    /// Maximum great-circle distance in meters for two points to count
    /// as duplicates
    spatial_tolerance_m: f64,
}

impl AggregationEngine {
    /// Create an engine with the default deduplication tolerances
    pub fn new() -> Self {
        Self::with_tolerances(DEFAULT_TIME_TOLERANCE_SECS, DEFAULT_SPATIAL_TOLERANCE_M)
    }

    /// Create an engine with custom deduplication tolerances.
    ///
    /// Negative values are clamped to zero, which makes deduplication
    /// require exact timestamp and coordinate matches.
    pub fn with_tolerances(time_tolerance_secs: i64, spatial_tolerance_m: f64) -> Self {
        Self {
            time_tolerance: Duration::seconds(time_tolerance_secs.max(0)),
            spatial_tolerance_m: spatial_tolerance_m.max(0.0),
        }
    }

    /// Merge execution results into the final ordered dataset.
    ///
    /// Invalid records are dropped and logged, never propagated as errors.
    /// Given identical results and filters, repeated calls produce
    /// byte-identical output.
    pub fn merge(&self, results: &[ExecutionResult], filter: &MergeFilter) -> Vec<LocationPoint> {
        let mut invalid = 0usize;
        let mut filtered = 0usize;
        let mut candidates: Vec<Survivor> = Vec::new();

        for result in results {
            for point in &result.locations {
                if let Err(defect) = point.validate() {
                    invalid += 1;
                    warn!(
                        source = %point.source,
                        error = %defect,
                        "Dropping invalid location record"
                    );
                    continue;
                }
                if !filter.accepts_time(point.timestamp)
                    || !filter.accepts_place(point.latitude, point.longitude)
                {
                    filtered += 1;
                    continue;
                }
                candidates.push(Survivor {
                    point: point.clone(),
                    seq: candidates.len(),
                });
            }
        }

        // Sweep in timestamp order so the duplicate scan can stay inside
        // the time window.
        candidates.sort_by(|a, b| {
            a.point
                .timestamp
                .cmp(&b.point.timestamp)
                .then_with(|| a.seq.cmp(&b.seq))
        });

        let considered = candidates.len();
        let mut survivors: Vec<Survivor> = Vec::with_capacity(considered);
        for candidate in candidates {
            self.absorb(&mut survivors, candidate);
        }
        let duplicates = considered - survivors.len();

        survivors.sort_by(|a, b| {
            a.point
                .timestamp
                .cmp(&b.point.timestamp)
                .then_with(|| a.point.source.cmp(&b.point.source))
                .then_with(|| a.seq.cmp(&b.seq))
        });

        info!(
            kept = survivors.len(),
            invalid, filtered, duplicates, "Aggregation complete"
        );

        survivors.into_iter().map(|s| s.point).collect()
    }

    /// Fold one candidate into the survivor set.
    ///
    /// The candidate absorbs every survivor it duplicates, keeping the
    /// preferred point at each step, so the set never holds two points
    /// that duplicate each other. Survivors stay sorted by (timestamp,
    /// arrival) for the windowed duplicate scan.
    fn absorb(&self, survivors: &mut Vec<Survivor>, candidate: Survivor) {
        let mut winner = candidate;
        loop {
            match self.find_duplicate(survivors, &winner.point) {
                Some(index) => {
                    let rival = survivors.remove(index);
                    winner = prefer(rival, winner);
                }
                None => {
                    let at = survivors.partition_point(|s| {
                        (s.point.timestamp, s.seq) <= (winner.point.timestamp, winner.seq)
                    });
                    survivors.insert(at, winner);
                    return;
                }
            }
        }
    }

    /// Index of the first survivor that duplicates `point`, if any.
    fn find_duplicate(&self, survivors: &[Survivor], point: &LocationPoint) -> Option<usize> {
        // Survivors older than the time window can be skipped outright.
        let window_start = survivors
            .partition_point(|s| point.timestamp - s.point.timestamp > self.time_tolerance);
        survivors[window_start..]
            .iter()
            .position(|s| self.is_duplicate(&s.point, point))
            .map(|offset| window_start + offset)
    }

    /// True when two points describe the same observation: timestamps
    /// within the time tolerance and coordinates within the spatial
    /// tolerance, regardless of source.
    fn is_duplicate(&self, a: &LocationPoint, b: &LocationPoint) -> bool {
        if !within(a.timestamp, b.timestamp, self.time_tolerance) {
            return false;
        }
        haversine_m(a.latitude, a.longitude, b.latitude, b.longitude) <= self.spatial_tolerance_m
    }
}

impl Default for AggregationEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Pick the point to retain out of two duplicates: source-claimed
/// timestamp beats estimated, then longer context, then earlier arrival.
fn prefer(a: Survivor, b: Survivor) -> Survivor {
    match (a.point.timestamp_is_estimated, b.point.timestamp_is_estimated) {
        (false, true) => return a,
        (true, false) => return b,
        _ => {}
    }
    match a.point.context.len().cmp(&b.point.context.len()) {
        Ordering::Greater => a,
        Ordering::Less => b,
        Ordering::Equal => {
            if a.seq <= b.seq {
                a
            } else {
                b
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
