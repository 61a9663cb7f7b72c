//! Fault-isolated plugin execution
//!
//! Runs every enabled plugin against one query and reports one
//! [`ExecutionResult`] per issued invocation. Isolation guarantees:
//! - a plugin error, panic, or hang never aborts the run or affects
//!   another plugin's invocation
//! - each invocation gets its own time budget; an expired invocation is
//!   abandoned, not awaited
//! - concurrency is bounded by a semaphore; a limit of 1 degrades to
//!   sequential execution with identical results
//! - result order equals descriptor order regardless of completion order
//!
//! Returned batches are contract-checked before they count as success:
//! one invalid record rejects the whole batch as a contract violation.
//!
//! Cancellation stops further invocations: tasks that have not called the
//! plugin yet when the token fires are omitted from the result set, while
//! completed results are preserved.

use crate::registry::{ActivePlugin, ErrorLedger};
use crate::types::{CollectQuery, ExecutionErrorKind, ExecutionResult};
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use waymark_common::LocationPoint;

/// Default per-invocation time budget
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on concurrently executing plugins
pub const DEFAULT_WORKER_LIMIT: usize = 4;

/// Outcome of one spawned invocation, before ledger accounting
struct TaskOutcome {
    plugin_name: String,
    locations: Vec<LocationPoint>,
    error: Option<ExecutionErrorKind>,
    duration: Duration,
}

/// Bounded, fault-isolated plugin executor
pub struct ExecutionSupervisor {
    worker_limit: usize,
    timeout: Duration,
    ledger: ErrorLedger,
}

impl ExecutionSupervisor {
    /// Supervisor with default limits
    pub fn new(ledger: ErrorLedger) -> Self {
        Self::with_limits(ledger, DEFAULT_WORKER_LIMIT, DEFAULT_TIMEOUT)
    }

    /// Supervisor with explicit limits; a worker limit of 0 is clamped to 1
    pub fn with_limits(ledger: ErrorLedger, worker_limit: usize, timeout: Duration) -> Self {
        Self {
            worker_limit: worker_limit.max(1),
            timeout,
            ledger,
        }
    }

    /// Execute all given plugins against one query
    ///
    /// Callers pass enabled plugins in descriptor order; the result vector
    /// preserves that order. Plugins whose invocation was never issued
    /// because the token fired first do not appear in the results.
    pub async fn run(
        &self,
        plugins: &[ActivePlugin],
        query: &CollectQuery,
        cancel: &CancellationToken,
    ) -> Vec<ExecutionResult> {
        let semaphore = Arc::new(Semaphore::new(self.worker_limit));
        let budget = self.timeout;

        let mut names = Vec::with_capacity(plugins.len());
        let mut handles = Vec::with_capacity(plugins.len());
        for plugin in plugins {
            names.push(plugin.descriptor.name.clone());
            handles.push(tokio::spawn(Self::invoke(
                plugin.clone(),
                query.clone(),
                Arc::clone(&semaphore),
                cancel.clone(),
                budget,
            )));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (name, joined) in names.into_iter().zip(join_all(handles).await) {
            let outcome = match joined {
                Ok(Some(outcome)) => outcome,
                Ok(None) => {
                    debug!(plugin = %name, "Invocation not issued (run cancelled)");
                    continue;
                }
                // the task boundary contains plugin panics
                Err(join_error) => TaskOutcome {
                    plugin_name: name,
                    locations: Vec::new(),
                    error: Some(ExecutionErrorKind::RuntimeFailure {
                        message: panic_message(join_error),
                    }),
                    duration: Duration::default(),
                },
            };
            results.push(self.account(outcome));
        }
        results
    }

    /// One spawned invocation: permit, cancellation gate, readiness check,
    /// budgeted collect, batch contract check
    async fn invoke(
        plugin: ActivePlugin,
        query: CollectQuery,
        semaphore: Arc<Semaphore>,
        cancel: CancellationToken,
        budget: Duration,
    ) -> Option<TaskOutcome> {
        // the semaphore is never closed while handles are alive
        let _permit = semaphore.acquire_owned().await.ok()?;
        if cancel.is_cancelled() {
            return None;
        }

        let name = plugin.descriptor.name.clone();
        match plugin.collector.ready() {
            crate::types::ConfigStatus::Ready => {}
            crate::types::ConfigStatus::NotConfigured { reason } => {
                return Some(TaskOutcome {
                    plugin_name: name,
                    locations: Vec::new(),
                    error: Some(ExecutionErrorKind::NotConfigured { reason }),
                    duration: Duration::default(),
                });
            }
        }

        let started = Instant::now();
        let outcome = match tokio::time::timeout(budget, plugin.collector.collect(&query)).await {
            Err(_elapsed) => TaskOutcome {
                plugin_name: name,
                locations: Vec::new(),
                error: Some(ExecutionErrorKind::Timeout {
                    budget_secs: budget.as_secs(),
                }),
                duration: started.elapsed(),
            },
            Ok(Err(e)) => TaskOutcome {
                plugin_name: name,
                locations: Vec::new(),
                error: Some(ExecutionErrorKind::RuntimeFailure {
                    message: e.to_string(),
                }),
                duration: started.elapsed(),
            },
            Ok(Ok(batch)) => match check_batch(&batch) {
                Ok(()) => TaskOutcome {
                    plugin_name: name,
                    locations: batch,
                    error: None,
                    duration: started.elapsed(),
                },
                Err(detail) => TaskOutcome {
                    plugin_name: name,
                    locations: Vec::new(),
                    error: Some(ExecutionErrorKind::ContractViolation { detail }),
                    duration: started.elapsed(),
                },
            },
        };
        Some(outcome)
    }

    /// Ledger accounting plus the one structured log line per invocation
    fn account(&self, outcome: TaskOutcome) -> ExecutionResult {
        let error_count = match &outcome.error {
            Some(kind) if kind.counts_as_failure() => self.ledger.record(&outcome.plugin_name),
            _ => self.ledger.count(&outcome.plugin_name),
        };
        match &outcome.error {
            None => info!(
                plugin = %outcome.plugin_name,
                points = outcome.locations.len(),
                duration_ms = outcome.duration.as_millis() as u64,
                "Collection succeeded"
            ),
            Some(kind @ ExecutionErrorKind::NotConfigured { .. }) => debug!(
                plugin = %outcome.plugin_name,
                detail = %kind,
                "Plugin skipped"
            ),
            Some(kind) => warn!(
                plugin = %outcome.plugin_name,
                error = %kind,
                duration_ms = outcome.duration.as_millis() as u64,
                error_count,
                "Collection failed (isolated)"
            ),
        }
        ExecutionResult {
            plugin_name: outcome.plugin_name,
            locations: outcome.locations,
            error: outcome.error,
            duration: outcome.duration,
            error_count,
        }
    }
}

/// Reject a batch when any record breaks the point contract
fn check_batch(batch: &[LocationPoint]) -> Result<(), String> {
    for (index, point) in batch.iter().enumerate() {
        if let Err(defect) = point.validate() {
            return Err(format!("record {}: {}", index, defect));
        }
    }
    Ok(())
}

/// Human-readable message for a panicked plugin task
fn panic_message(join_error: tokio::task::JoinError) -> String {
    match join_error.try_into_panic() {
        Ok(payload) => {
            if let Some(s) = payload.downcast_ref::<&str>() {
                format!("plugin panicked: {}", s)
            } else if let Some(s) = payload.downcast_ref::<String>() {
                format!("plugin panicked: {}", s)
            } else {
                "plugin panicked".to_string()
            }
        }
        Err(e) => format!("plugin task failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::mock::{ConcurrencyGauge, MockCollector};
    use crate::types::{ConfigStatus, PluginDescriptor};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use waymark_common::config::ConfigMap;

    fn active(mock: MockCollector) -> ActivePlugin {
        ActivePlugin {
            descriptor: PluginDescriptor {
                name: mock.name.to_string(),
                version: mock.version.to_string(),
                enabled: true,
                priority: 100,
                dependencies: Vec::new(),
                config: ConfigMap::new(),
                generation: 1,
            },
            collector: Arc::new(mock),
        }
    }

    fn point(lat: f64, lon: f64, source: &str) -> LocationPoint {
        LocationPoint::new(lat, lon, source)
    }

    fn supervisor() -> ExecutionSupervisor {
        ExecutionSupervisor::new(ErrorLedger::new())
    }

    #[tokio::test]
    async fn test_results_preserve_descriptor_order() {
        // slowest first: completion order is the reverse of issue order
        let plugins = vec![
            active(MockCollector::new("slow").delayed_ms(60, vec![point(1.0, 1.0, "slow")])),
            active(MockCollector::new("medium").delayed_ms(20, vec![point(2.0, 2.0, "medium")])),
            active(MockCollector::new("fast").with_points(vec![point(3.0, 3.0, "fast")])),
        ];
        let results = supervisor()
            .run(&plugins, &CollectQuery::for_target("t"), &CancellationToken::new())
            .await;

        let names: Vec<_> = results.iter().map(|r| r.plugin_name.as_str()).collect();
        assert_eq!(names, vec!["slow", "medium", "fast"]);
        assert!(results.iter().all(|r| r.succeeded()));
    }

    #[tokio::test]
    async fn test_failing_plugin_is_isolated() {
        let plugins = vec![
            active(MockCollector::new("ok1").with_points(vec![point(1.0, 1.0, "ok1")])),
            active(MockCollector::new("bad").failing("disk on fire")),
            active(MockCollector::new("ok2").with_points(vec![point(2.0, 2.0, "ok2")])),
        ];
        let results = supervisor()
            .run(&plugins, &CollectQuery::for_target("t"), &CancellationToken::new())
            .await;

        assert_eq!(results.len(), 3, "failure must not shrink the result set");
        assert!(results[0].succeeded());
        assert!(results[2].succeeded());

        let failed = &results[1];
        assert!(failed.locations.is_empty());
        assert_eq!(failed.error_count, 1);
        assert!(matches!(
            failed.error,
            Some(ExecutionErrorKind::RuntimeFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_panicking_plugin_is_contained() {
        let plugins = vec![
            active(MockCollector::new("boom").panicking()),
            active(MockCollector::new("ok").with_points(vec![point(1.0, 1.0, "ok")])),
        ];
        let results = supervisor()
            .run(&plugins, &CollectQuery::for_target("t"), &CancellationToken::new())
            .await;

        assert_eq!(results.len(), 2);
        match &results[0].error {
            Some(ExecutionErrorKind::RuntimeFailure { message }) => {
                assert!(message.contains("panic"), "message: {}", message);
            }
            other => panic!("expected runtime failure, got {:?}", other),
        }
        assert!(results[1].succeeded(), "sibling plugin must be unaffected");
    }

    #[tokio::test]
    async fn test_hanging_plugin_times_out() {
        let ledger = ErrorLedger::new();
        let supervisor =
            ExecutionSupervisor::with_limits(ledger, 4, Duration::from_millis(50));
        let plugins = vec![
            active(MockCollector::new("stuck").hanging()),
            active(MockCollector::new("ok").with_points(vec![point(1.0, 1.0, "ok")])),
        ];
        let started = Instant::now();
        let results = supervisor
            .run(&plugins, &CollectQuery::for_target("t"), &CancellationToken::new())
            .await;

        assert!(
            started.elapsed() < Duration::from_secs(5),
            "hung invocation must be abandoned, not awaited"
        );
        assert!(matches!(
            results[0].error,
            Some(ExecutionErrorKind::Timeout { .. })
        ));
        assert_eq!(results[0].error_count, 1);
        assert!(results[1].succeeded());
    }

    #[tokio::test]
    async fn test_invalid_record_rejects_whole_batch() {
        let batch = vec![
            point(10.0, 10.0, "mixed"),
            point(95.0, 10.0, "mixed"), // latitude out of range
            point(11.0, 11.0, "mixed"),
        ];
        let plugins = vec![active(MockCollector::new("mixed").with_points(batch))];
        let results = supervisor()
            .run(&plugins, &CollectQuery::for_target("t"), &CancellationToken::new())
            .await;

        let result = &results[0];
        assert!(result.locations.is_empty(), "no partial batch may survive");
        match &result.error {
            Some(ExecutionErrorKind::ContractViolation { detail }) => {
                assert!(detail.contains("record 1"), "detail: {}", detail);
            }
            other => panic!("expected contract violation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unconfigured_plugin_is_skipped_without_invocation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mock = MockCollector::new("unready")
            .with_ready(ConfigStatus::not_configured("data_dir not set"))
            .counting_calls(Arc::clone(&calls));
        let results = supervisor()
            .run(&[active(mock)], &CollectQuery::for_target("t"), &CancellationToken::new())
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 0, "collect must not be called");
        let result = &results[0];
        assert!(matches!(
            result.error,
            Some(ExecutionErrorKind::NotConfigured { .. })
        ));
        assert_eq!(result.error_count, 0, "skip is a state, not a failure");
    }

    #[tokio::test]
    async fn test_error_counts_accumulate_across_runs() {
        let ledger = ErrorLedger::new();
        let supervisor = ExecutionSupervisor::new(ledger.clone());
        let query = CollectQuery::for_target("t");

        for expected in 1..=3u64 {
            let plugins = vec![active(MockCollector::new("flaky").failing("still broken"))];
            let results = supervisor.run(&plugins, &query, &CancellationToken::new()).await;
            assert_eq!(results[0].error_count, expected);
        }
        assert_eq!(ledger.count("flaky"), 3);
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_further_invocations() {
        let cancel = CancellationToken::new();
        let ledger = ErrorLedger::new();
        // sequential execution: the first plugin cancels, the second must
        // never be invoked
        let supervisor = ExecutionSupervisor::with_limits(ledger, 1, Duration::from_secs(5));
        let calls = Arc::new(AtomicUsize::new(0));
        let plugins = vec![
            active(
                MockCollector::new("first")
                    .cancelling(cancel.clone())
                    .with_points(vec![point(1.0, 1.0, "first")]),
            ),
            active(MockCollector::new("second").counting_calls(Arc::clone(&calls))),
        ];

        let results = supervisor.run(&plugins, &CollectQuery::for_target("t"), &cancel).await;

        assert_eq!(results.len(), 1, "unissued invocations are omitted");
        assert_eq!(results[0].plugin_name, "first");
        assert!(results[0].succeeded(), "completed results are preserved");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_precancelled_token_issues_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let plugins = vec![active(MockCollector::new("never").with_points(vec![]))];
        let results = supervisor()
            .run(&plugins, &CollectQuery::for_target("t"), &cancel)
            .await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_worker_limit_bounds_concurrency() {
        let gauge = ConcurrencyGauge::default();
        let plugins: Vec<ActivePlugin> = ["g1", "g2", "g3", "g4", "g5"]
            .into_iter()
            .map(|name| active(MockCollector::new(name).gauged(gauge.clone())))
            .collect();
        let ledger = ErrorLedger::new();
        let supervisor = ExecutionSupervisor::with_limits(ledger, 2, Duration::from_secs(5));

        let results = supervisor
            .run(&plugins, &CollectQuery::for_target("t"), &CancellationToken::new())
            .await;

        assert_eq!(results.len(), 5);
        let peak = gauge.peak();
        assert!(peak <= 2, "semaphore must bound concurrency, saw {}", peak);
        assert!(peak >= 1);
    }
}
