//! Run Orchestration
//!
//! Wires the plugin registry, execution supervisor, and aggregation engine
//! into one collection run: resolve enabled plugins, execute them under
//! fault isolation, then merge everything into the final ordered dataset.
//!
//! # Architecture
//! The engine owns one registry generation at a time. A run never mutates
//! registry state; reloading configuration between runs produces the next
//! generation while per-plugin error counters carry over.
//!
//! # Example
//! ```rust,ignore
//! use tokio_util::sync::CancellationToken;
//! use waymark_engine::config::EngineConfig;
//! use waymark_engine::engine::{Engine, RunParams};
//!
//! let engine = Engine::new(&EngineConfig::default());
//! let params = RunParams::for_target("subject");
//! let outcome = engine.run(&params, &CancellationToken::new()).await;
//! println!("{} locations", outcome.locations.len());
//! ```

use crate::aggregate::{AggregationEngine, MergeFilter};
use crate::collectors;
use crate::config::EngineConfig;
use crate::registry::PluginRegistry;
use crate::supervisor::ExecutionSupervisor;
use crate::types::{CollectQuery, Collector, ExecutionResult};
use chrono::{DateTime, Utc};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;
use waymark_common::LocationPoint;

/// Caller-supplied parameters for one collection run
#[derive(Debug, Clone, Default)]
pub struct RunParams {
    /// Investigation subject identifier passed to every plugin
    pub target: String,
    /// Earliest timestamp of interest (inclusive)
    pub date_from: Option<DateTime<Utc>>,
    /// Latest timestamp of interest (inclusive)
    pub date_to: Option<DateTime<Utc>>,
    /// Center of the geographic filter as (latitude, longitude)
    pub center: Option<(f64, f64)>,
    /// Maximum distance from `center` in kilometers
    pub radius_km: Option<f64>,
}

impl RunParams {
    /// Parameters with only a target, no date or radius bounds
    pub fn for_target(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Default::default()
        }
    }
}

/// Everything one collection run produced
#[derive(Debug)]
pub struct RunOutcome {
    /// Unique identifier for this run
    pub run_id: Uuid,
    /// Registry generation the run executed against
    pub generation: u64,
    /// The final merged, deduplicated, ordered dataset
    pub locations: Vec<LocationPoint>,
    /// Per-plugin outcomes in descriptor order, including failures
    pub results: Vec<ExecutionResult>,
}

impl RunOutcome {
    /// Number of plugins whose invocation counted as a failure
    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.error.as_ref().is_some_and(|e| e.counts_as_failure()))
            .count()
    }

    /// Number of plugins skipped because they were not configured
    pub fn skipped(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.error.as_ref().is_some_and(|e| !e.counts_as_failure()))
            .count()
    }

    /// One line per plugin that did not succeed, for display to the caller
    pub fn failure_report(&self) -> Vec<String> {
        self.results
            .iter()
            .filter_map(|r| {
                r.error
                    .as_ref()
                    .map(|e| format!("{}: {}", r.plugin_name, e))
            })
            .collect()
    }
}

/// Top-level collection engine.
///
/// Holds the loaded plugin registry and the execution machinery. The final
/// dataset is always the best-effort union of whatever plugins succeeded;
/// a run where every plugin fails yields an empty dataset plus a full
/// failure report, never an error.
pub struct Engine {
    registry: PluginRegistry,
    supervisor: ExecutionSupervisor,
    aggregator: AggregationEngine,
}

impl Engine {
    /// Build an engine from configuration, registering the built-in
    /// collectors
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_collectors(collectors::builtin_collectors(), config)
    }

    /// Build an engine from an explicit candidate list.
    ///
    /// Used by embedders and tests that bring their own collectors.
    pub fn with_collectors(candidates: Vec<Box<dyn Collector>>, config: &EngineConfig) -> Self {
        let mut registry = PluginRegistry::new();
        registry.load(candidates, config);
        let supervisor =
            ExecutionSupervisor::with_limits(registry.ledger(), config.worker_limit, config.timeout());
        Self {
            registry,
            supervisor,
            aggregator: AggregationEngine::new(),
        }
    }

    /// The current registry generation and its descriptors
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Re-resolve plugin configuration, producing the next registry
    /// generation. Error counters survive the reload.
    pub fn reload(&mut self, candidates: Vec<Box<dyn Collector>>, config: &EngineConfig) {
        self.registry.load(candidates, config);
        self.supervisor =
            ExecutionSupervisor::with_limits(self.registry.ledger(), config.worker_limit, config.timeout());
    }

    /// Execute one complete collection run.
    ///
    /// Phases: execute every enabled plugin under isolation, then merge
    /// the results into the final dataset. Cancellation stops further
    /// plugin invocations; whatever completed before the cancellation is
    /// still aggregated so the caller can use the partial result.
    pub async fn run(&self, params: &RunParams, cancel: &CancellationToken) -> RunOutcome {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let plugins = self.registry.enabled_ordered();

        info!(
            run_id = %run_id,
            target = %params.target,
            plugins = plugins.len(),
            generation = self.registry.generation(),
            "Starting collection run"
        );

        let query = CollectQuery {
            target: params.target.clone(),
            date_from: params.date_from,
            date_to: params.date_to,
        };
        let results = self.supervisor.run(&plugins, &query, cancel).await;

        if cancel.is_cancelled() {
            warn!(run_id = %run_id, "Run cancelled; aggregating partial results");
        }

        let filter = MergeFilter {
            date_from: params.date_from,
            date_to: params.date_to,
            center: params.center,
            radius_km: params.radius_km,
        };
        let locations = self.aggregator.merge(&results, &filter);

        let outcome = RunOutcome {
            run_id,
            generation: self.registry.generation(),
            locations,
            results,
        };

        info!(
            run_id = %run_id,
            duration_ms = started.elapsed().as_millis() as u64,
            locations = outcome.locations.len(),
            failed = outcome.failed(),
            skipped = outcome.skipped(),
            "Collection run finished"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::mock::MockCollector;
    use crate::types::ConfigStatus;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn point(lat: f64, lon: f64, when: &str, source: &str) -> LocationPoint {
        LocationPoint::new(lat, lon, source).with_timestamp(ts(when))
    }

    #[tokio::test]
    async fn run_merges_points_from_all_enabled_plugins() {
        let candidates: Vec<Box<dyn Collector>> = vec![
            Box::new(
                MockCollector::new("alpha")
                    .with_points(vec![point(10.0, 10.0, "2024-01-01T10:00:00Z", "alpha")]),
            ),
            Box::new(
                MockCollector::new("beta")
                    .with_points(vec![point(20.0, 20.0, "2024-01-02T10:00:00Z", "beta")]),
            ),
        ];
        let engine = Engine::with_collectors(candidates, &EngineConfig::default());

        let outcome = engine
            .run(&RunParams::for_target("subject"), &CancellationToken::new())
            .await;

        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.locations.len(), 2);
        assert_eq!(outcome.failed(), 0);
        assert!(outcome.failure_report().is_empty());
    }

    #[tokio::test]
    async fn failing_plugin_does_not_block_others() {
        let candidates: Vec<Box<dyn Collector>> = vec![
            Box::new(MockCollector::new("broken").failing("disk on fire")),
            Box::new(
                MockCollector::new("working")
                    .with_points(vec![point(10.0, 10.0, "2024-01-01T10:00:00Z", "working")]),
            ),
        ];
        let engine = Engine::with_collectors(candidates, &EngineConfig::default());

        let outcome = engine
            .run(&RunParams::for_target("subject"), &CancellationToken::new())
            .await;

        assert_eq!(outcome.locations.len(), 1);
        assert_eq!(outcome.locations[0].source, "working");
        assert_eq!(outcome.failed(), 1);
        let report = outcome.failure_report();
        assert_eq!(report.len(), 1);
        assert!(report[0].starts_with("broken:"), "report was {:?}", report);
    }

    #[tokio::test]
    async fn unconfigured_plugins_are_reported_as_skipped() {
        let candidates: Vec<Box<dyn Collector>> = vec![Box::new(
            MockCollector::new("dormant")
                .with_ready(ConfigStatus::not_configured("data_dir not set")),
        )];
        let engine = Engine::with_collectors(candidates, &EngineConfig::default());

        let outcome = engine
            .run(&RunParams::for_target("subject"), &CancellationToken::new())
            .await;

        assert_eq!(outcome.failed(), 0);
        assert_eq!(outcome.skipped(), 1);
        assert!(outcome.locations.is_empty());
    }

    #[tokio::test]
    async fn date_bounds_are_reapplied_after_collection() {
        // The mock ignores the query's date bounds entirely, so the point
        // outside the window must be removed by the authoritative filter.
        let candidates: Vec<Box<dyn Collector>> = vec![Box::new(
            MockCollector::new("sloppy").with_points(vec![
                point(10.0, 10.0, "2024-01-15T10:00:00Z", "sloppy"),
                point(20.0, 20.0, "2024-06-15T10:00:00Z", "sloppy"),
            ]),
        )];
        let engine = Engine::with_collectors(candidates, &EngineConfig::default());

        let params = RunParams {
            target: "subject".to_string(),
            date_from: Some(ts("2024-01-01T00:00:00Z")),
            date_to: Some(ts("2024-01-31T23:59:59Z")),
            ..Default::default()
        };
        let outcome = engine.run(&params, &CancellationToken::new()).await;

        assert_eq!(outcome.locations.len(), 1);
        assert_eq!(outcome.locations[0].timestamp, ts("2024-01-15T10:00:00Z"));
    }

    #[tokio::test]
    async fn cancelled_run_yields_empty_partial_outcome() {
        let candidates: Vec<Box<dyn Collector>> = vec![Box::new(
            MockCollector::new("never_runs")
                .with_points(vec![point(10.0, 10.0, "2024-01-01T10:00:00Z", "never_runs")]),
        )];
        let engine = Engine::with_collectors(candidates, &EngineConfig::default());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = engine.run(&RunParams::for_target("subject"), &cancel).await;

        assert!(outcome.results.is_empty());
        assert!(outcome.locations.is_empty());
    }

    #[tokio::test]
    async fn reload_produces_next_generation() {
        let config = EngineConfig::default();
        let mut engine = Engine::with_collectors(
            vec![Box::new(MockCollector::new("alpha"))],
            &config,
        );
        assert_eq!(engine.registry().generation(), 1);

        engine.reload(vec![Box::new(MockCollector::new("alpha"))], &config);

        assert_eq!(engine.registry().generation(), 2);
        assert_eq!(engine.registry().plugins().len(), 1);
    }
}
