//! Service metrics.
//!
//! Lock-free counters on a process-wide registry, rendered in the
//! Prometheus text exposition format by the ops listener's `/metrics`
//! route. Gauges for live streams are incremented on registration and
//! decremented by the guard's Drop so every exit path balances.

use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::Lazy;

#[derive(Debug, Default)]
pub struct Metrics {
    /// Tasks created, by any endpoint.
    pub tasks_created: AtomicU64,
    /// Successful status transitions applied.
    pub tasks_updated: AtomicU64,
    /// Tasks deleted.
    pub tasks_deleted: AtomicU64,
    /// Transitions into SUCCEEDED.
    pub tasks_succeeded: AtomicU64,
    /// Transitions into FAILED.
    pub tasks_failed: AtomicU64,
    /// HTTP requests served (both listeners).
    pub http_requests: AtomicU64,
    /// Change events handed to the bus.
    pub events_published: AtomicU64,
    /// Live watch (SSE) streams.
    pub watch_streams: AtomicU64,
    /// Live bidirectional update streams.
    pub update_streams: AtomicU64,
}

static GLOBAL: Lazy<Metrics> = Lazy::new(Metrics::default);

/// Process-wide metrics registry.
pub fn global() -> &'static Metrics {
    &GLOBAL
}

/// RAII gauge increment; decrements on drop.
pub struct StreamGauge(&'static AtomicU64);

impl StreamGauge {
    pub fn enter(gauge: &'static AtomicU64) -> Self {
        gauge.fetch_add(1, Ordering::Relaxed);
        Self(gauge)
    }
}

impl Drop for StreamGauge {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

impl Metrics {
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Render the registry as Prometheus text. `events_dropped` comes from
    /// the bus, which owns that counter.
    pub fn render(&self, events_dropped: u64) -> String {
        let mut out = String::with_capacity(1024);
        let mut counter = |name: &str, help: &str, value: u64| {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"
            ));
        };

        counter(
            "taskflow_tasks_created_total",
            "Total tasks created",
            self.tasks_created.load(Ordering::Relaxed),
        );
        counter(
            "taskflow_tasks_updated_total",
            "Total successful status transitions",
            self.tasks_updated.load(Ordering::Relaxed),
        );
        counter(
            "taskflow_tasks_deleted_total",
            "Total tasks deleted",
            self.tasks_deleted.load(Ordering::Relaxed),
        );
        counter(
            "taskflow_tasks_succeeded_total",
            "Total tasks that reached SUCCEEDED",
            self.tasks_succeeded.load(Ordering::Relaxed),
        );
        counter(
            "taskflow_tasks_failed_total",
            "Total tasks that reached FAILED",
            self.tasks_failed.load(Ordering::Relaxed),
        );
        counter(
            "taskflow_http_requests_total",
            "Total HTTP requests served",
            self.http_requests.load(Ordering::Relaxed),
        );
        counter(
            "taskflow_events_published_total",
            "Total change events handed to the bus",
            self.events_published.load(Ordering::Relaxed),
        );
        counter(
            "taskflow_events_dropped_total",
            "Total change events dropped on full buffers",
            events_dropped,
        );

        let mut gauge = |name: &str, help: &str, value: u64| {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} gauge\n{name} {value}\n"
            ));
        };
        gauge(
            "taskflow_watch_streams",
            "Live watch streams",
            self.watch_streams.load(Ordering::Relaxed),
        );
        gauge(
            "taskflow_update_streams",
            "Live bidirectional update streams",
            self.update_streams.load(Ordering::Relaxed),
        );

        out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn render_emits_prometheus_text() {
        let m = Metrics::default();
        m.tasks_created.store(3, Ordering::Relaxed);
        let text = m.render(7);
        assert!(text.contains("# TYPE taskflow_tasks_created_total counter"));
        assert!(text.contains("taskflow_tasks_created_total 3"));
        assert!(text.contains("taskflow_events_dropped_total 7"));
        assert!(text.contains("# TYPE taskflow_watch_streams gauge"));
    }

    #[test]
    fn stream_gauge_balances() {
        static GAUGE: AtomicU64 = AtomicU64::new(0);
        {
            let _g1 = StreamGauge::enter(&GAUGE);
            let _g2 = StreamGauge::enter(&GAUGE);
            assert_eq!(GAUGE.load(Ordering::Relaxed), 2);
        }
        assert_eq!(GAUGE.load(Ordering::Relaxed), 0);
    }
}
