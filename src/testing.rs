//! Shared fixtures for unit tests.

use crate::clock::Clock;
use crate::span::SpanData;
use crate::span_context::{SpanContext, TraceFlags, TraceId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Clock that only moves when a test advances it.
#[derive(Debug, Default)]
pub(crate) struct MockClock {
    micros: AtomicI64,
    nano_ticks: AtomicI64,
}

impl MockClock {
    pub(crate) fn new() -> Self {
        MockClock::default()
    }

    /// Advance both the wall clock and the tick counter.
    pub(crate) fn advance(&self, duration: Duration) {
        self.micros
            .fetch_add(duration.as_micros() as i64, Ordering::SeqCst);
        self.nano_ticks
            .fetch_add(duration.as_nanos() as i64, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn current_time_micros(&self) -> i64 {
        self.micros.load(Ordering::SeqCst)
    }

    fn current_nano_ticks(&self) -> i64 {
        self.nano_ticks.load(Ordering::SeqCst)
    }

    fn is_micros_accurate(&self) -> bool {
        true
    }
}

/// A minimal sampled span snapshot.
pub(crate) fn span_data(operation_name: &str) -> SpanData {
    SpanData {
        context: SpanContext::new(TraceId::from_u64(1), 2, 0, TraceFlags::SAMPLED),
        operation_name: operation_name.to_string(),
        start_time_micros: 0,
        duration_micros: 0,
        tags: HashMap::new(),
        logs: Vec::new(),
        references: Vec::new(),
    }
}
