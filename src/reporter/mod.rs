//! Reporters: sinks for finished spans.

mod remote;

pub use remote::{RemoteReporter, RemoteReporterBuilder};

use crate::span::SpanData;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

/// Sink receiving every sampled span once it finishes.
///
/// `report` is called on the application thread that finished the span and
/// must not block it.
pub trait Reporter: Send + Sync {
    /// Accept one finished span.
    fn report(&self, span: SpanData);

    /// Flush anything buffered and release resources. Reporting after close
    /// is a silent drop.
    fn close(&self) {}
}

/// Reporter that discards every span.
#[derive(Clone, Debug, Default)]
pub struct NoopReporter {
    _private: (),
}

impl NoopReporter {
    /// Create a no-op reporter.
    pub fn new() -> Self {
        NoopReporter::default()
    }
}

impl Reporter for NoopReporter {
    fn report(&self, _span: SpanData) {}
}

/// Reporter that retains finished spans in memory; test support.
#[derive(Clone, Debug, Default)]
pub struct InMemoryReporter {
    spans: Arc<Mutex<Vec<SpanData>>>,
}

impl InMemoryReporter {
    /// Create an empty in-memory reporter.
    pub fn new() -> Self {
        InMemoryReporter::default()
    }

    /// Spans reported so far, in report order.
    pub fn spans(&self) -> Vec<SpanData> {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drop all retained spans.
    pub fn clear(&self) {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Reporter for InMemoryReporter {
    fn report(&self, span: SpanData) {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(span);
    }
}

/// Reporter that writes one log line per finished span.
#[derive(Clone, Debug, Default)]
pub struct LoggingReporter {
    _private: (),
}

impl LoggingReporter {
    /// Create a logging reporter.
    pub fn new() -> Self {
        LoggingReporter::default()
    }
}

impl Reporter for LoggingReporter {
    fn report(&self, span: SpanData) {
        info!("Span reported: {span}");
    }
}

/// Reporter that fans every span out to an ordered list of reporters.
pub struct CompositeReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl CompositeReporter {
    /// Create a composite over `reporters`; they are invoked in order.
    pub fn new(reporters: Vec<Box<dyn Reporter>>) -> Self {
        CompositeReporter { reporters }
    }
}

impl Reporter for CompositeReporter {
    fn report(&self, span: SpanData) {
        for reporter in &self.reporters {
            reporter.report(span.clone());
        }
    }

    fn close(&self) {
        for reporter in &self.reporters {
            reporter.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::span_data;

    #[test]
    fn in_memory_reporter_retains_spans_in_order() {
        let reporter = InMemoryReporter::new();
        reporter.report(span_data("first"));
        reporter.report(span_data("second"));

        let spans = reporter.spans();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].operation_name, "first");
        assert_eq!(spans[1].operation_name, "second");

        reporter.clear();
        assert!(reporter.spans().is_empty());
    }

    #[test]
    fn composite_reporter_fans_out_in_order() {
        let first = InMemoryReporter::new();
        let second = InMemoryReporter::new();
        let composite = CompositeReporter::new(vec![
            Box::new(first.clone()),
            Box::new(second.clone()),
        ]);

        composite.report(span_data("op"));
        assert_eq!(first.spans().len(), 1);
        assert_eq!(second.spans().len(), 1);
        composite.close();
    }

    #[test]
    fn noop_reporter_accepts_spans() {
        let reporter = NoopReporter::new();
        reporter.report(span_data("op"));
        reporter.close();
    }
}
