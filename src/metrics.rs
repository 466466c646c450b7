//! Tracer diagnostics counters and gauges.
//!
//! The tracer emits its own health metrics (spans started, spans dropped by
//! the reporter, sampling strategy refreshes, ...) through a small capability
//! so applications can bridge them into whatever metrics backend they run.
//! All instruments live in a flat `jaeger_tracer_<name>` namespace qualified
//! by a fixed set of tags.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Monotonically increasing counter.
pub trait Counter: Send + Sync {
    /// Add `delta` to the counter.
    fn inc(&self, delta: i64);
}

/// Instantaneous value.
pub trait Gauge: Send + Sync {
    /// Replace the gauge value.
    fn update(&self, value: i64);
}

/// Duration recorder.
pub trait Timer: Send + Sync {
    /// Record one duration in microseconds.
    fn record_micros(&self, micros: i64);
}

/// Creates named instruments, each qualified by a tag mapping.
pub trait MetricsFactory: Send + Sync {
    /// Create a counter for `name` and `tags`.
    fn create_counter(&self, name: &str, tags: &[(&str, &str)]) -> Box<dyn Counter>;
    /// Create a gauge for `name` and `tags`.
    fn create_gauge(&self, name: &str, tags: &[(&str, &str)]) -> Box<dyn Gauge>;
    /// Create a timer for `name` and `tags`.
    fn create_timer(&self, name: &str, tags: &[(&str, &str)]) -> Box<dyn Timer>;
}

fn qualified(name: &str) -> String {
    format!("jaeger_tracer_{}", name.replace('-', "_"))
}

/// The full set of instruments emitted by the tracer, materialized up front
/// from an explicit registration list.
pub struct Metrics {
    /// Number of traces started by this tracer as sampled.
    pub traces_started_sampled: Box<dyn Counter>,
    /// Number of traces started by this tracer as not sampled.
    pub traces_started_not_sampled: Box<dyn Counter>,
    /// Number of externally started sampled traces this tracer joined.
    pub traces_joined_sampled: Box<dyn Counter>,
    /// Number of externally started not-sampled traces this tracer joined.
    pub traces_joined_not_sampled: Box<dyn Counter>,
    /// Number of spans started by this tracer.
    pub spans_started: Box<dyn Counter>,
    /// Number of sampled spans finished by this tracer.
    pub spans_finished: Box<dyn Counter>,
    /// Number of spans started sampled.
    pub spans_sampled: Box<dyn Counter>,
    /// Number of spans started not sampled.
    pub spans_not_sampled: Box<dyn Counter>,
    /// Number of errors decoding an inbound tracing context.
    pub decoding_errors: Box<dyn Counter>,
    /// Number of spans successfully flushed to the sender.
    pub reporter_success: Box<dyn Counter>,
    /// Number of spans lost in failed flush attempts.
    pub reporter_failure: Box<dyn Counter>,
    /// Number of spans dropped on reporter queue overflow.
    pub reporter_dropped: Box<dyn Counter>,
    /// Current depth of the reporter command queue.
    pub reporter_queue_length: Box<dyn Gauge>,
    /// Number of successful sampling strategy retrievals.
    pub sampler_retrieved: Box<dyn Counter>,
    /// Number of strategy retrievals that changed the active sampler.
    pub sampler_updated: Box<dyn Counter>,
    /// Number of failed sampling strategy queries.
    pub sampler_query_failure: Box<dyn Counter>,
    /// Number of sampling strategy responses that could not be interpreted.
    pub sampler_parsing_failure: Box<dyn Counter>,
}

impl Metrics {
    /// Materialize every instrument from `factory`.
    pub fn new(factory: &dyn MetricsFactory) -> Self {
        let counter =
            |name: &str, tags: &[(&str, &str)]| factory.create_counter(&qualified(name), tags);
        Metrics {
            traces_started_sampled: counter("traces", &[("state", "started"), ("sampled", "y")]),
            traces_started_not_sampled: counter(
                "traces",
                &[("state", "started"), ("sampled", "n")],
            ),
            traces_joined_sampled: counter("traces", &[("state", "joined"), ("sampled", "y")]),
            traces_joined_not_sampled: counter("traces", &[("state", "joined"), ("sampled", "n")]),
            spans_started: counter("spans", &[("state", "started"), ("group", "lifecycle")]),
            spans_finished: counter("spans", &[("state", "finished"), ("group", "lifecycle")]),
            spans_sampled: counter("spans", &[("group", "sampling"), ("sampled", "y")]),
            spans_not_sampled: counter("spans", &[("group", "sampling"), ("sampled", "n")]),
            decoding_errors: counter("decoding-errors", &[]),
            reporter_success: counter("reporter-spans", &[("result", "ok")]),
            reporter_failure: counter("reporter-spans", &[("result", "err")]),
            reporter_dropped: counter("reporter-spans", &[("result", "dropped")]),
            reporter_queue_length: factory.create_gauge(&qualified("reporter-queue"), &[]),
            sampler_retrieved: counter("sampler", &[("state", "retrieved")]),
            sampler_updated: counter("sampler", &[("state", "updated")]),
            sampler_query_failure: counter("sampler", &[("state", "failure"), ("phase", "query")]),
            sampler_parsing_failure: counter(
                "sampler",
                &[("state", "failure"), ("phase", "parsing")],
            ),
        }
    }

    /// Metrics that discard every observation.
    pub fn noop() -> Self {
        Metrics::new(&NullMetricsFactory::new())
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish()
    }
}

/// Factory producing instruments that discard every observation.
#[derive(Clone, Debug, Default)]
pub struct NullMetricsFactory {
    _private: (),
}

impl NullMetricsFactory {
    /// Create a new no-op factory.
    pub fn new() -> Self {
        NullMetricsFactory::default()
    }
}

struct NullInstrument;

impl Counter for NullInstrument {
    fn inc(&self, _delta: i64) {}
}

impl Gauge for NullInstrument {
    fn update(&self, _value: i64) {}
}

impl Timer for NullInstrument {
    fn record_micros(&self, _micros: i64) {}
}

impl MetricsFactory for NullMetricsFactory {
    fn create_counter(&self, _name: &str, _tags: &[(&str, &str)]) -> Box<dyn Counter> {
        Box::new(NullInstrument)
    }

    fn create_gauge(&self, _name: &str, _tags: &[(&str, &str)]) -> Box<dyn Gauge> {
        Box::new(NullInstrument)
    }

    fn create_timer(&self, _name: &str, _tags: &[(&str, &str)]) -> Box<dyn Timer> {
        Box::new(NullInstrument)
    }
}

// Instruments are keyed by `name.tag1=v1.tag2=v2` with tag keys sorted, so
// lookups in tests are deterministic.
fn keyed(name: &str, tags: &[(&str, &str)]) -> String {
    let mut sorted = tags.to_vec();
    sorted.sort();
    let mut out = String::from(name);
    for (key, value) in sorted {
        out.push('.');
        out.push_str(key);
        out.push('=');
        out.push_str(value);
    }
    out
}

/// Factory that aggregates observations in process memory; intended for
/// tests and debugging.
#[derive(Clone, Debug, Default)]
pub struct InMemoryMetricsFactory {
    counters: Arc<Mutex<HashMap<String, Arc<AtomicI64>>>>,
    gauges: Arc<Mutex<HashMap<String, Arc<AtomicI64>>>>,
    timers: Arc<Mutex<HashMap<String, Arc<AtomicI64>>>>,
}

impl InMemoryMetricsFactory {
    /// Create a new in-memory factory.
    pub fn new() -> Self {
        InMemoryMetricsFactory::default()
    }

    fn cell(map: &Mutex<HashMap<String, Arc<AtomicI64>>>, key: String) -> Arc<AtomicI64> {
        let mut map = map.lock().unwrap_or_else(PoisonError::into_inner);
        map.entry(key).or_default().clone()
    }

    fn value(map: &Mutex<HashMap<String, Arc<AtomicI64>>>, key: &str) -> i64 {
        let map = map.lock().unwrap_or_else(PoisonError::into_inner);
        map.get(key).map(|cell| cell.load(Ordering::Relaxed)).unwrap_or(0)
    }

    /// Current value of the counter registered under `name` and `tags`,
    /// or 0 when it was never created.
    pub fn counter_value(&self, name: &str, tags: &[(&str, &str)]) -> i64 {
        Self::value(&self.counters, &keyed(name, tags))
    }

    /// Current value of the gauge registered under `name` and `tags`.
    pub fn gauge_value(&self, name: &str, tags: &[(&str, &str)]) -> i64 {
        Self::value(&self.gauges, &keyed(name, tags))
    }

    /// Accumulated microseconds recorded by the timer under `name` and `tags`.
    pub fn timer_value(&self, name: &str, tags: &[(&str, &str)]) -> i64 {
        Self::value(&self.timers, &keyed(name, tags))
    }
}

struct InMemoryCounter(Arc<AtomicI64>);

impl Counter for InMemoryCounter {
    fn inc(&self, delta: i64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }
}

struct InMemoryGauge(Arc<AtomicI64>);

impl Gauge for InMemoryGauge {
    fn update(&self, value: i64) {
        self.0.store(value, Ordering::Relaxed);
    }
}

struct InMemoryTimer(Arc<AtomicI64>);

impl Timer for InMemoryTimer {
    fn record_micros(&self, micros: i64) {
        self.0.fetch_add(micros, Ordering::Relaxed);
    }
}

impl MetricsFactory for InMemoryMetricsFactory {
    fn create_counter(&self, name: &str, tags: &[(&str, &str)]) -> Box<dyn Counter> {
        Box::new(InMemoryCounter(Self::cell(&self.counters, keyed(name, tags))))
    }

    fn create_gauge(&self, name: &str, tags: &[(&str, &str)]) -> Box<dyn Gauge> {
        Box::new(InMemoryGauge(Self::cell(&self.gauges, keyed(name, tags))))
    }

    fn create_timer(&self, name: &str, tags: &[(&str, &str)]) -> Box<dyn Timer> {
        Box::new(InMemoryTimer(Self::cell(&self.timers, keyed(name, tags))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_namespaced_and_tagged() {
        let factory = InMemoryMetricsFactory::new();
        let metrics = Metrics::new(&factory);

        metrics.traces_started_sampled.inc(1);
        metrics.traces_started_sampled.inc(2);
        metrics.reporter_dropped.inc(1);

        assert_eq!(
            factory.counter_value(
                "jaeger_tracer_traces",
                &[("state", "started"), ("sampled", "y")]
            ),
            3
        );
        assert_eq!(
            factory.counter_value("jaeger_tracer_reporter_spans", &[("result", "dropped")]),
            1
        );
        assert_eq!(
            factory.counter_value(
                "jaeger_tracer_traces",
                &[("state", "started"), ("sampled", "n")]
            ),
            0
        );
    }

    #[test]
    fn tag_order_does_not_matter_for_lookup() {
        let factory = InMemoryMetricsFactory::new();
        let counter = factory.create_counter("spans", &[("b", "2"), ("a", "1")]);
        counter.inc(5);
        assert_eq!(factory.counter_value("spans", &[("a", "1"), ("b", "2")]), 5);
    }

    #[test]
    fn gauge_keeps_last_value() {
        let factory = InMemoryMetricsFactory::new();
        let gauge = factory.create_gauge("queue", &[]);
        gauge.update(7);
        gauge.update(3);
        assert_eq!(factory.gauge_value("queue", &[]), 3);
    }

    #[test]
    fn hyphenated_names_are_normalized() {
        let factory = InMemoryMetricsFactory::new();
        let metrics = Metrics::new(&factory);
        metrics.decoding_errors.inc(1);
        assert_eq!(factory.counter_value("jaeger_tracer_decoding_errors", &[]), 1);
    }
}
