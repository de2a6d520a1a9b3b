//! Metrics sink boundary.
//!
//! Pipeline logic never touches `obs::metrics` directly. All
//! instrumentation flows through [`MetricsEvent`] and [`MetricsSink`];
//! this module is the only bridge into the global counter state.

use crate::{db::pipeline::Operation, obs::metrics};
use std::cell::RefCell;

thread_local! {
    static SINK_OVERRIDE: RefCell<Option<*const dyn MetricsSink>> = const { RefCell::new(None) };
}

///
/// MetricsEvent
///

#[derive(Clone, Debug)]
pub enum MetricsEvent {
    PipelineStart {
        table: String,
        operation: Operation,
    },
    PipelineFinish {
        table: String,
        operation: Operation,
    },
    PatchNoop {
        table: String,
    },
    UniqueViolation {
        table: String,
    },
    CascadeDelete {
        table: String,
    },
    RelationValidation {
        table: String,
        reverse_lookups: u64,
        blocked_deletes: u64,
    },
}

///
/// MetricsSink
///

pub trait MetricsSink {
    fn record(&self, event: &MetricsEvent);
}

/// GlobalMetricsSink
/// Default process-local sink that writes into global counter state.

pub(crate) struct GlobalMetricsSink;

impl MetricsSink for GlobalMetricsSink {
    fn record(&self, event: &MetricsEvent) {
        match event {
            MetricsEvent::PipelineStart { table, operation } => {
                metrics::with_state_mut(|m| {
                    match operation {
                        Operation::Insert => {
                            m.ops.insert_runs = m.ops.insert_runs.saturating_add(1);
                        }
                        Operation::Patch => m.ops.patch_runs = m.ops.patch_runs.saturating_add(1),
                        Operation::Replace => {
                            m.ops.replace_runs = m.ops.replace_runs.saturating_add(1);
                        }
                        Operation::Delete => {
                            m.ops.delete_runs = m.ops.delete_runs.saturating_add(1);
                        }
                    }

                    let entry = m.tables.entry(table.clone()).or_default();
                    match operation {
                        Operation::Insert => {
                            entry.insert_runs = entry.insert_runs.saturating_add(1);
                        }
                        Operation::Patch => entry.patch_runs = entry.patch_runs.saturating_add(1),
                        Operation::Replace => {
                            entry.replace_runs = entry.replace_runs.saturating_add(1);
                        }
                        Operation::Delete => {
                            entry.delete_runs = entry.delete_runs.saturating_add(1);
                        }
                    }
                });
            }

            // Starts are counted; finishes carry no extra state today.
            MetricsEvent::PipelineFinish { .. } => {}

            MetricsEvent::PatchNoop { table } => {
                metrics::with_state_mut(|m| {
                    m.ops.patch_noops = m.ops.patch_noops.saturating_add(1);
                    let entry = m.tables.entry(table.clone()).or_default();
                    entry.patch_noops = entry.patch_noops.saturating_add(1);
                });
            }

            MetricsEvent::UniqueViolation { table } => {
                metrics::with_state_mut(|m| {
                    m.ops.unique_violations = m.ops.unique_violations.saturating_add(1);
                    let entry = m.tables.entry(table.clone()).or_default();
                    entry.unique_violations = entry.unique_violations.saturating_add(1);
                });
            }

            MetricsEvent::CascadeDelete { table } => {
                metrics::with_state_mut(|m| {
                    m.ops.cascade_deletes = m.ops.cascade_deletes.saturating_add(1);
                    let entry = m.tables.entry(table.clone()).or_default();
                    entry.cascade_deletes = entry.cascade_deletes.saturating_add(1);
                });
            }

            MetricsEvent::RelationValidation {
                table,
                reverse_lookups,
                blocked_deletes,
            } => {
                metrics::with_state_mut(|m| {
                    m.ops.relation_reverse_lookups = m
                        .ops
                        .relation_reverse_lookups
                        .saturating_add(*reverse_lookups);
                    m.ops.relation_delete_blocks =
                        m.ops.relation_delete_blocks.saturating_add(*blocked_deletes);

                    let entry = m.tables.entry(table.clone()).or_default();
                    entry.relation_reverse_lookups = entry
                        .relation_reverse_lookups
                        .saturating_add(*reverse_lookups);
                    entry.relation_delete_blocks = entry
                        .relation_delete_blocks
                        .saturating_add(*blocked_deletes);
                });
            }
        }
    }
}

pub(crate) const GLOBAL_METRICS_SINK: GlobalMetricsSink = GlobalMetricsSink;

pub(crate) fn record(event: &MetricsEvent) {
    let override_ptr = SINK_OVERRIDE.with(|cell| *cell.borrow());
    if let Some(ptr) = override_ptr {
        // SAFETY:
        // - `ptr` was produced from a valid `&dyn MetricsSink` in
        //   `with_metrics_sink`, which always restores the previous pointer
        //   before returning, including unwind paths via `Guard::drop`.
        // - `record` is synchronous and never stores `ptr` beyond this call.
        // - Only a shared reference is materialized, matching the shared
        //   borrow used to install the override.
        unsafe { (*ptr).record(event) };
    } else {
        GLOBAL_METRICS_SINK.record(event);
    }
}

/// Snapshot the current metrics state for endpoint/test plumbing.
#[must_use]
pub fn metrics_report(since_ms: Option<i64>) -> metrics::EventReport {
    metrics::report_since(since_ms)
}

/// Reset all metrics state.
pub fn metrics_reset_all() {
    metrics::reset_all();
}

/// Run a closure with a temporary metrics sink override.
pub fn with_metrics_sink<T>(sink: &dyn MetricsSink, f: impl FnOnce() -> T) -> T {
    struct Guard(Option<*const dyn MetricsSink>);

    impl Drop for Guard {
        fn drop(&mut self) {
            SINK_OVERRIDE.with(|cell| {
                *cell.borrow_mut() = self.0;
            });
        }
    }

    // SAFETY:
    // - `sink_ptr` is installed only for this dynamic scope; `Guard`
    //   restores the previous slot on all exits, including panic.
    // - `record` only dereferences synchronously and never persists the
    //   pointer, so it cannot outlive the borrowed sink.
    let sink_ptr = unsafe { std::mem::transmute::<&dyn MetricsSink, *const dyn MetricsSink>(sink) };
    let prev = SINK_OVERRIDE.with(|cell| {
        let mut slot = cell.borrow_mut();
        slot.replace(sink_ptr)
    });
    let _guard = Guard(prev);

    f()
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        panic::{AssertUnwindSafe, catch_unwind},
        sync::atomic::{AtomicUsize, Ordering},
    };

    struct CountingSink<'a> {
        calls: &'a AtomicUsize,
    }

    impl MetricsSink for CountingSink<'_> {
        fn record(&self, _: &MetricsEvent) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn noop_event() -> MetricsEvent {
        MetricsEvent::PatchNoop {
            table: "users".to_string(),
        }
    }

    #[test]
    fn with_metrics_sink_routes_and_restores_nested_overrides() {
        SINK_OVERRIDE.with(|cell| {
            *cell.borrow_mut() = None;
        });

        let outer_calls = AtomicUsize::new(0);
        let inner_calls = AtomicUsize::new(0);
        let outer = CountingSink {
            calls: &outer_calls,
        };
        let inner = CountingSink {
            calls: &inner_calls,
        };

        with_metrics_sink(&outer, || {
            record(&noop_event());
            assert_eq!(outer_calls.load(Ordering::SeqCst), 1);

            with_metrics_sink(&inner, || {
                record(&noop_event());
            });

            // Inner override was restored to outer override.
            record(&noop_event());
        });

        assert_eq!(outer_calls.load(Ordering::SeqCst), 2);
        assert_eq!(inner_calls.load(Ordering::SeqCst), 1);

        // Outer override was restored to previous (none).
        SINK_OVERRIDE.with(|cell| {
            assert!(cell.borrow().is_none());
        });
    }

    #[test]
    fn with_metrics_sink_restores_override_on_panic() {
        SINK_OVERRIDE.with(|cell| {
            *cell.borrow_mut() = None;
        });

        let calls = AtomicUsize::new(0);
        let sink = CountingSink { calls: &calls };

        let panicked = catch_unwind(AssertUnwindSafe(|| {
            with_metrics_sink(&sink, || {
                record(&noop_event());
                panic!("intentional panic for guard test");
            });
        }))
        .is_err();
        assert!(panicked);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        SINK_OVERRIDE.with(|cell| {
            assert!(cell.borrow().is_none());
        });
    }

    #[test]
    fn global_sink_accumulates_counters() {
        metrics_reset_all();

        record(&MetricsEvent::PipelineStart {
            table: "users".to_string(),
            operation: Operation::Insert,
        });
        record(&MetricsEvent::UniqueViolation {
            table: "users".to_string(),
        });
        record(&MetricsEvent::RelationValidation {
            table: "users".to_string(),
            reverse_lookups: 5,
            blocked_deletes: 1,
        });

        let counters = metrics_report(None)
            .counters
            .expect("metrics report should include counters");
        assert_eq!(counters.ops.insert_runs, 1);
        assert_eq!(counters.ops.unique_violations, 1);
        assert_eq!(counters.ops.relation_reverse_lookups, 5);
        assert_eq!(counters.ops.relation_delete_blocks, 1);

        let table = counters
            .tables
            .get("users")
            .expect("table counters should be present");
        assert_eq!(table.insert_runs, 1);
        assert_eq!(table.unique_violations, 1);
    }

    #[test]
    fn report_since_after_window_is_empty() {
        metrics_reset_all();
        record(&noop_event());

        let window = metrics::with_state(|m| m.since_ms);
        assert!(metrics_report(Some(window + 1)).counters.is_none());
        assert!(metrics_report(Some(window - 1)).counters.is_some());
    }
}
