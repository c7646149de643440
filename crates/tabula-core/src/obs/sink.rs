//! Metrics sink boundary.
//!
//! Engine code never touches `obs::metrics` directly.
//! All instrumentation flows through `MetricsEvent` and `MetricsSink`.

use crate::obs::metrics;
use std::{cell::RefCell, rc::Rc};

thread_local! {
    static SINK_OVERRIDE: RefCell<Option<Rc<dyn MetricsSink>>> = const { RefCell::new(None) };
}

///
/// ExecKind
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExecKind {
    Load,
    Save,
    Delete,
}

///
/// MetricsEvent
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MetricsEvent {
    Exec {
        kind: ExecKind,
        entity: String,
    },
    RowsLoaded {
        entity: String,
        rows: u64,
    },
    ManualRejects {
        entity: String,
        rows: u64,
    },
    LockWait {
        key: String,
        attempts: u64,
    },
    LockBreak {
        key: String,
    },
    Ddl {
        entity: String,
        statements: u64,
    },
    BlockedDelete {
        entity: String,
    },
}

///
/// MetricsSink
///

pub trait MetricsSink {
    fn record(&self, event: &MetricsEvent);
}

///
/// GlobalMetricsSink
/// Default process-local sink that writes into the thread-local counters.
///

pub(crate) struct GlobalMetricsSink;

impl MetricsSink for GlobalMetricsSink {
    fn record(&self, event: &MetricsEvent) {
        metrics::with_state_mut(|m| match event {
            MetricsEvent::Exec { kind, entity } => {
                let entry = m.entities.entry(entity.clone()).or_default();
                match kind {
                    ExecKind::Load => {
                        m.ops.load_calls = m.ops.load_calls.saturating_add(1);
                        entry.load_calls = entry.load_calls.saturating_add(1);
                    }
                    ExecKind::Save => {
                        m.ops.save_calls = m.ops.save_calls.saturating_add(1);
                        entry.save_calls = entry.save_calls.saturating_add(1);
                    }
                    ExecKind::Delete => {
                        m.ops.delete_calls = m.ops.delete_calls.saturating_add(1);
                        entry.delete_calls = entry.delete_calls.saturating_add(1);
                    }
                }
            }
            MetricsEvent::RowsLoaded { entity, rows } => {
                m.ops.rows_loaded = m.ops.rows_loaded.saturating_add(*rows);
                let entry = m.entities.entry(entity.clone()).or_default();
                entry.rows_loaded = entry.rows_loaded.saturating_add(*rows);
            }
            MetricsEvent::ManualRejects { entity, rows } => {
                m.ops.manual_rejects = m.ops.manual_rejects.saturating_add(*rows);
                let entry = m.entities.entry(entity.clone()).or_default();
                entry.manual_rejects = entry.manual_rejects.saturating_add(*rows);
            }
            MetricsEvent::LockWait { attempts, .. } => {
                m.ops.lock_waits = m.ops.lock_waits.saturating_add(*attempts);
            }
            MetricsEvent::LockBreak { .. } => {
                m.ops.lock_breaks = m.ops.lock_breaks.saturating_add(1);
            }
            MetricsEvent::Ddl { entity, statements } => {
                m.ops.ddl_statements = m.ops.ddl_statements.saturating_add(*statements);
                let entry = m.entities.entry(entity.clone()).or_default();
                entry.ddl_statements = entry.ddl_statements.saturating_add(*statements);
            }
            MetricsEvent::BlockedDelete { entity } => {
                m.ops.blocked_deletes = m.ops.blocked_deletes.saturating_add(1);
                let entry = m.entities.entry(entity.clone()).or_default();
                entry.blocked_deletes = entry.blocked_deletes.saturating_add(1);
            }
        });
    }
}

/// Route one event to the scoped override, or the global counters.
pub(crate) fn record(event: MetricsEvent) {
    let sink = SINK_OVERRIDE.with(|cell| cell.borrow().clone());

    match sink {
        Some(sink) => sink.record(&event),
        None => GlobalMetricsSink.record(&event),
    }
}

/// Run a closure with a temporary metrics sink override on this thread.
pub fn with_metrics_sink<T>(sink: Rc<dyn MetricsSink>, f: impl FnOnce() -> T) -> T {
    struct Guard(Option<Rc<dyn MetricsSink>>);

    impl Drop for Guard {
        fn drop(&mut self) {
            let prev = self.0.take();
            SINK_OVERRIDE.with(|cell| {
                *cell.borrow_mut() = prev;
            });
        }
    }

    let prev = SINK_OVERRIDE.with(|cell| cell.borrow_mut().replace(sink));
    let _guard = Guard(prev);

    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct CaptureSink {
        events: RefCell<Vec<MetricsEvent>>,
    }

    impl MetricsSink for CaptureSink {
        fn record(&self, event: &MetricsEvent) {
            self.events.borrow_mut().push(event.clone());
        }
    }

    #[test]
    fn override_captures_and_restores() {
        metrics::reset();
        let capture = Rc::new(CaptureSink::default());

        with_metrics_sink(capture.clone(), || {
            record(MetricsEvent::BlockedDelete {
                entity: "invoice".to_string(),
            });
        });
        record(MetricsEvent::BlockedDelete {
            entity: "invoice".to_string(),
        });

        assert_eq!(capture.events.borrow().len(), 1);
        assert_eq!(metrics::snapshot().ops.blocked_deletes, 1);
    }

    #[test]
    fn global_sink_tracks_per_entity_counters() {
        metrics::reset();

        record(MetricsEvent::Exec {
            kind: ExecKind::Save,
            entity: "invoice".to_string(),
        });
        record(MetricsEvent::RowsLoaded {
            entity: "invoice".to_string(),
            rows: 3,
        });

        let state = metrics::snapshot();
        assert_eq!(state.ops.save_calls, 1);
        assert_eq!(state.ops.rows_loaded, 3);
        assert_eq!(state.entities["invoice"].rows_loaded, 3);
    }
}
