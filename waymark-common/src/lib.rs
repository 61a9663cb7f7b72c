//! # Waymark Common Library
//!
//! Shared code for the Waymark engine and its collectors including:
//! - The canonical location record (`LocationPoint`) and its validation
//! - Normalization helpers for heterogeneous export formats
//! - Geodesic distance math
//! - Configuration map primitives and path resolution
//! - Common error types

pub mod config;
pub mod error;
pub mod geo;
pub mod model;
pub mod normalize;
pub mod time;

pub use error::{Error, Result};
pub use model::{Address, LocationPoint, PointInvalid};
