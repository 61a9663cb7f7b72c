//! Waymark collection engine
//!
//! Plugin-based ingestion of offline personal-data exports into a single
//! canonical location dataset.
//!
//! # Architecture
//! - [`registry`] discovers collector plugins and resolves their layered
//!   TOML configuration into immutable descriptors
//! - [`supervisor`] executes enabled plugins under fault isolation
//!   (bounded concurrency, per-invocation timeouts, panic containment)
//! - [`aggregate`] merges per-plugin results into one deduplicated,
//!   filtered, ordered dataset
//! - [`collectors`] are the built-in plugins for common export formats
//! - [`export`] serializes the final dataset to CSV, JSON, KML, or HTML
//! - [`engine`] wires the above into one collection run
//!
//! Shared primitives (the `LocationPoint` model, extraction helpers,
//! distance math) live in the `waymark-common` crate.

pub mod aggregate;
pub mod collectors;
pub mod config;
pub mod engine;
pub mod export;
pub mod registry;
pub mod supervisor;
pub mod types;

pub use crate::aggregate::{AggregationEngine, MergeFilter};
pub use crate::config::EngineConfig;
pub use crate::engine::{Engine, RunOutcome, RunParams};
pub use crate::registry::PluginRegistry;
pub use crate::supervisor::ExecutionSupervisor;
pub use crate::types::{
    CollectError, CollectQuery, Collector, ConfigStatus, ExecutionErrorKind, ExecutionResult,
    PluginDescriptor, Registration,
};
