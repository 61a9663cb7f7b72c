//! Clock access and temporal comparison
//!
//! `now()` is the single source of collection-time timestamps: a point
//! built without a source-claimed observation time carries this value,
//! tagged as estimated. `within()` is the temporal half of the duplicate
//! test the aggregation engine applies across collectors.

use chrono::{DateTime, Duration, Utc};

/// Collection-time timestamp for records whose source carries none
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// True when two observation times lie within `tolerance` of each other,
/// inclusive at the boundary
pub fn within(a: DateTime<Utc>, b: DateTime<Utc>, tolerance: Duration) -> bool {
    (a - b).abs() <= tolerance
}
