//! Core types and trait definitions for the Waymark engine
//!
//! Defines the contract every collector plugin implements and the value
//! types that flow between the engine tiers:
//! - **Registry:** discovers collectors, resolves configuration, produces
//!   [`PluginDescriptor`] snapshots
//! - **Supervisor:** executes collectors under fault isolation, produces
//!   [`ExecutionResult`] values
//! - **Aggregation:** merges result batches into one ordered dataset

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use waymark_common::config::ConfigMap;
use waymark_common::LocationPoint;

// ============================================================================
// Collection query
// ============================================================================

/// One collection request, handed unchanged to every plugin
///
/// The date bounds are a best-effort pre-filter: collectors that can skip
/// out-of-range records cheaply should do so, but the aggregation engine
/// re-applies the bounds authoritatively either way.
#[derive(Debug, Clone)]
pub struct CollectQuery {
    /// Subject of the collection (profile name, archive owner, case label)
    pub target: String,
    /// Inclusive lower bound on observation time
    pub date_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on observation time
    pub date_to: Option<DateTime<Utc>>,
}

impl CollectQuery {
    /// Query for a target with no date bounds
    pub fn for_target(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            date_from: None,
            date_to: None,
        }
    }

    /// Inclusive bounds check, the collectors' best-effort pre-filter
    pub fn accepts(&self, timestamp: DateTime<Utc>) -> bool {
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
}

// ============================================================================
// Collector contract
// ============================================================================

/// Readiness state reported by a collector before execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigStatus {
    /// Collector can run with its current configuration
    Ready,
    /// Collector cannot run; `reason` is surfaced to the caller
    NotConfigured { reason: String },
}

impl ConfigStatus {
    /// Convenience constructor for the unready state
    pub fn not_configured(reason: impl Into<String>) -> Self {
        Self::NotConfigured {
            reason: reason.into(),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Failure inside a collector's own work
#[derive(Error, Debug)]
pub enum CollectError {
    /// I/O failure reading source data
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Source file is not parseable at all
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Source data readable but structurally unusable
    #[error("malformed source data: {0}")]
    Malformed(String),

    /// Collector-internal failure
    #[error("collector error: {0}")]
    Internal(String),
}

/// Contract implemented by every collector plugin
///
/// Collectors are format adapters: they read one kind of offline export
/// and emit canonical [`LocationPoint`] records. The engine guarantees
/// fault isolation around `collect`, so implementations are free to fail;
/// they must however keep `ready` total (no panic, no I/O beyond cheap
/// existence checks).
///
/// # Example
/// ```rust,ignore
/// use waymark_engine::types::{Collector, CollectQuery, CollectError, ConfigStatus};
///
/// pub struct CheckinCollector { data_dir: Option<PathBuf> }
///
/// #[async_trait::async_trait]
/// impl Collector for CheckinCollector {
///     fn name(&self) -> &'static str { "checkins" }
///     fn version(&self) -> &'static str { "1.0.0" }
///
///     fn ready(&self) -> ConfigStatus {
///         match &self.data_dir {
///             Some(dir) if dir.is_dir() => ConfigStatus::Ready,
///             _ => ConfigStatus::not_configured("data_dir not set"),
///         }
///     }
///
///     async fn collect(&self, query: &CollectQuery) -> Result<Vec<LocationPoint>, CollectError> {
///         // read export files, normalize records
///         Ok(vec![])
///     }
/// }
/// ```
#[async_trait]
pub trait Collector: Send + Sync {
    /// Unique registry key for this collector
    fn name(&self) -> &'static str;

    /// Collector version string (informational, surfaced in reports)
    fn version(&self) -> &'static str;

    /// Built-in configuration fallbacks, the lowest merge layer
    fn default_config(&self) -> ConfigMap {
        ConfigMap::new()
    }

    /// Keys that must be present in the merged configuration
    fn required_keys(&self) -> &'static [&'static str] {
        &[]
    }

    /// Host capabilities this collector needs (checked at resolution time)
    fn dependencies(&self) -> &'static [&'static str] {
        &[]
    }

    /// Execution priority; lower runs earlier in reports and merges
    fn priority(&self) -> i32 {
        100
    }

    /// Apply the merged configuration for this generation
    ///
    /// Called once per registry generation, before the collector is shared
    /// with the supervisor. Rejecting a value here disables the plugin for
    /// the run without affecting others.
    fn configure(&mut self, _config: &ConfigMap) -> waymark_common::Result<()> {
        Ok(())
    }

    /// Report readiness; must not panic and must not do real work
    fn ready(&self) -> ConfigStatus;

    /// Perform the collection. The only method allowed to do real work.
    async fn collect(&self, query: &CollectQuery) -> Result<Vec<LocationPoint>, CollectError>;
}

// ============================================================================
// Registry records
// ============================================================================

/// Outcome of one registration attempt during discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Registration {
    /// Candidate accepted into the registry
    Valid { name: String, version: String },
    /// Candidate rejected; never executed, never consulted again
    Invalid { name: String, reason: String },
}

impl Registration {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }

    /// Candidate name, whichever way registration went
    pub fn name(&self) -> &str {
        match self {
            Self::Valid { name, .. } => name,
            Self::Invalid { name, .. } => name,
        }
    }
}

/// Immutable snapshot of one plugin's registration for one generation
///
/// Reloading configuration produces new descriptors under a bumped
/// `generation`; descriptors already handed out are never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct PluginDescriptor {
    /// Unique plugin name (registry key)
    pub name: String,
    /// Plugin-reported version
    pub version: String,
    /// Whether the plugin takes part in runs
    pub enabled: bool,
    /// Execution priority; lower sorts earlier, ties break by name
    pub priority: i32,
    /// Host capabilities the plugin requires
    pub dependencies: Vec<String>,
    /// Effective configuration after the three-layer merge
    pub config: ConfigMap,
    /// Registry generation this snapshot belongs to
    pub generation: u64,
}

// ============================================================================
// Execution records
// ============================================================================

/// Why a plugin invocation produced no usable batch
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionErrorKind {
    /// Plugin reported it cannot run; skipped, not counted as a failure
    #[error("not configured: {reason}")]
    NotConfigured { reason: String },

    /// Invocation exceeded its time budget and was abandoned
    #[error("timed out after {budget_secs}s")]
    Timeout { budget_secs: u64 },

    /// Plugin returned an error or panicked
    #[error("runtime failure: {message}")]
    RuntimeFailure { message: String },

    /// Plugin returned data violating the record contract
    #[error("contract violation: {detail}")]
    ContractViolation { detail: String },
}

impl ExecutionErrorKind {
    /// True for outcomes that increment the plugin's error counter
    ///
    /// `NotConfigured` is a state, not a failure.
    pub fn counts_as_failure(&self) -> bool {
        !matches!(self, Self::NotConfigured { .. })
    }
}

/// Outcome of one plugin invocation; immutable once constructed
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Plugin that produced this result
    pub plugin_name: String,
    /// Collected records; empty when `error` is set
    pub locations: Vec<LocationPoint>,
    /// Why the batch is unusable, when it is
    pub error: Option<ExecutionErrorKind>,
    /// Wall-clock duration of the invocation
    pub duration: Duration,
    /// Plugin's cumulative failures in this process, after this invocation
    pub error_count: u64,
}

impl ExecutionResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}
