//! Counters and timers reported by the pipeline.
//!
//! [`Observer`] is the seam; [`TracingObserver`] forwards to `tracing` and
//! [`RecordingObserver`] keeps everything in memory for inspection.

use std::cell::RefCell;
use std::time::{Duration, Instant};

pub trait Observer {
    /// Records `value` for the counter `name`, qualified by `label`.
    fn counter(&self, name: &'static str, label: &str, value: u64);

    /// Records how long the stage `name` took.
    fn timing(&self, name: &'static str, elapsed: Duration);
}

/// Emits every metric as a `tracing` event on the `metrics` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn counter(&self, name: &'static str, label: &str, value: u64) {
        tracing::debug!(target: "metrics", metric = name, label, value, "counter");
    }

    fn timing(&self, name: &'static str, elapsed: Duration) {
        tracing::info!(
            target: "metrics",
            metric = name,
            elapsed_secs = elapsed.as_secs_f64(),
            "timing"
        );
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Metric {
    Counter {
        name: &'static str,
        label: String,
        value: u64,
    },
    Timing {
        name: &'static str,
        elapsed: Duration,
    },
}

/// Keeps every reported metric in order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    metrics: RefCell<Vec<Metric>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metrics(&self) -> Vec<Metric> {
        self.metrics.borrow().clone()
    }

    /// Values recorded for the counter `name`, as `(label, value)` pairs.
    pub fn counter_values(&self, name: &str) -> Vec<(String, u64)> {
        self.metrics
            .borrow()
            .iter()
            .filter_map(|m| match m {
                Metric::Counter {
                    name: n,
                    label,
                    value,
                } if *n == name => Some((label.clone(), *value)),
                _ => None,
            })
            .collect()
    }
}

impl Observer for RecordingObserver {
    fn counter(&self, name: &'static str, label: &str, value: u64) {
        self.metrics.borrow_mut().push(Metric::Counter {
            name,
            label: label.to_string(),
            value,
        });
    }

    fn timing(&self, name: &'static str, elapsed: Duration) {
        self.metrics
            .borrow_mut()
            .push(Metric::Timing { name, elapsed });
    }
}

/// Reports the time between creation and drop to an [`Observer`].
pub struct Timer<'a> {
    observer: &'a dyn Observer,
    name: &'static str,
    start: Instant,
}

impl<'a> Timer<'a> {
    pub fn start(observer: &'a dyn Observer, name: &'static str) -> Self {
        Self {
            observer,
            name,
            start: Instant::now(),
        }
    }
}

impl Drop for Timer<'_> {
    fn drop(&mut self) {
        self.observer.timing(self.name, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_reports_on_drop() {
        let observer = RecordingObserver::new();
        {
            let _timer = Timer::start(&observer, "stage");
        }

        let metrics = observer.metrics();
        assert_eq!(metrics.len(), 1);
        assert!(matches!(metrics[0], Metric::Timing { name: "stage", .. }));
    }

    #[test]
    fn test_counter_values_filters_by_name() {
        let observer = RecordingObserver::new();
        observer.counter("subset.size", "ro", 3);
        observer.counter("patients.total", "", 10);
        observer.counter("subset.size", "rc1", 0);

        assert_eq!(
            observer.counter_values("subset.size"),
            vec![("ro".to_string(), 3), ("rc1".to_string(), 0)]
        );
    }

    #[test]
    fn test_tracing_observer_does_not_panic() {
        TracingObserver.counter("patients.total", "", 1);
        TracingObserver.timing("load", Duration::from_millis(5));
    }
}
