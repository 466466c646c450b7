//! Spans: mutable records of a single timed operation.

use crate::span_context::SpanContext;
use crate::tracer::Tracer;
use std::collections::HashMap;
use std::fmt;
use std::mem;
use tracing::warn;

/// Value of a span tag or log field.
///
/// Inputs outside these shapes convert deterministically through their
/// `Display` form into [`TagValue::String`].
#[derive(Clone, Debug, PartialEq)]
pub enum TagValue {
    /// UTF-8 string.
    String(String),
    /// Boolean.
    Bool(bool),
    /// Signed 64-bit integer.
    I64(i64),
    /// Unsigned 64-bit integer.
    U64(u64),
    /// Double precision float.
    F64(f64),
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::String(value) => write!(f, "{}", value),
            TagValue::Bool(value) => write!(f, "{}", value),
            TagValue::I64(value) => write!(f, "{}", value),
            TagValue::U64(value) => write!(f, "{}", value),
            TagValue::F64(value) => write!(f, "{}", value),
        }
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::String(value.to_string())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        TagValue::String(value)
    }
}

impl From<bool> for TagValue {
    fn from(value: bool) -> Self {
        TagValue::Bool(value)
    }
}

impl From<i32> for TagValue {
    fn from(value: i32) -> Self {
        TagValue::I64(value.into())
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        TagValue::I64(value)
    }
}

impl From<u32> for TagValue {
    fn from(value: u32) -> Self {
        TagValue::U64(value.into())
    }
}

impl From<u64> for TagValue {
    fn from(value: u64) -> Self {
        TagValue::U64(value)
    }
}

impl From<f64> for TagValue {
    fn from(value: f64) -> Self {
        TagValue::F64(value)
    }
}

/// One timestamped entry in a span's log sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct LogEntry {
    /// Wall-clock timestamp in microseconds.
    pub timestamp_micros: i64,
    /// Log fields.
    pub fields: Vec<(String, TagValue)>,
}

/// How a span relates to a referenced context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReferenceKind {
    /// The referenced context is the direct parent of this span.
    ChildOf,
    /// The referenced context precedes this span without awaiting its result.
    FollowsFrom,
}

/// A causal reference from a span to another span's context.
#[derive(Clone, Debug, PartialEq)]
pub struct Reference {
    /// Kind of the reference.
    pub kind: ReferenceKind,
    /// The referenced context.
    pub context: SpanContext,
}

/// Immutable snapshot of a finished span, handed to the reporter exactly
/// once.
#[derive(Clone, Debug)]
pub struct SpanData {
    /// Identity and baggage at finish time.
    pub context: SpanContext,
    /// Operation name at finish time.
    pub operation_name: String,
    /// Start time in microseconds since the Unix epoch.
    pub start_time_micros: i64,
    /// Duration in microseconds.
    pub duration_micros: i64,
    /// Span tags.
    pub tags: HashMap<String, TagValue>,
    /// Log entries in append order.
    pub logs: Vec<LogEntry>,
    /// Causal references recorded at creation.
    pub references: Vec<Reference>,
}

impl fmt::Display for SpanData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.context, self.operation_name)
    }
}

/// A single operation within a trace.
///
/// A span is mutated only by the thread that owns it (the mutators take
/// `&mut self`); after [`Span::finish`] it is immutable and its snapshot is
/// owned by the reporter.
pub struct Span {
    tracer: Tracer,
    context: SpanContext,
    operation_name: String,
    start_time_micros: i64,
    start_time_nano_ticks: i64,
    compute_duration_via_nano_ticks: bool,
    tags: HashMap<String, TagValue>,
    logs: Vec<LogEntry>,
    references: Vec<Reference>,
    finished: bool,
}

impl Span {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        tracer: Tracer,
        context: SpanContext,
        operation_name: String,
        start_time_micros: i64,
        start_time_nano_ticks: i64,
        compute_duration_via_nano_ticks: bool,
        tags: HashMap<String, TagValue>,
        references: Vec<Reference>,
    ) -> Self {
        Span {
            tracer,
            context,
            operation_name,
            start_time_micros,
            start_time_nano_ticks,
            compute_duration_via_nano_ticks,
            tags,
            logs: Vec::new(),
            references,
            finished: false,
        }
    }

    /// The current context of this span.
    ///
    /// Baggage mutations publish a new snapshot, so the returned context is
    /// stable even if the span's baggage changes afterwards.
    pub fn context(&self) -> SpanContext {
        self.context.clone()
    }

    /// The operation name.
    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    /// Rename the operation.
    pub fn set_operation_name(&mut self, operation_name: impl Into<String>) {
        self.operation_name = operation_name.into();
    }

    /// The start time in microseconds since the Unix epoch.
    pub fn start_time_micros(&self) -> i64 {
        self.start_time_micros
    }

    /// The tag stored under `key`.
    pub fn tag(&self, key: &str) -> Option<&TagValue> {
        self.tags.get(key)
    }

    /// Set a tag, replacing any previous value under the same key.
    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<TagValue>) {
        if !self.finished {
            self.tags.insert(key.into(), value.into());
        }
    }

    /// Append a log entry with fields, timestamped now.
    pub fn log(&mut self, fields: Vec<(String, TagValue)>) {
        let timestamp = self.tracer.clock().current_time_micros();
        self.log_at(timestamp, fields);
    }

    /// Append a log entry with an explicit timestamp.
    pub fn log_at(&mut self, timestamp_micros: i64, fields: Vec<(String, TagValue)>) {
        if !self.finished {
            self.logs.push(LogEntry {
                timestamp_micros,
                fields,
            });
        }
    }

    /// Append a log entry holding a single `event` field.
    pub fn log_event(&mut self, event: impl Into<String>) {
        self.log(vec![("event".to_string(), TagValue::String(event.into()))]);
    }

    /// Set a baggage item, publishing a new context snapshot.
    pub fn set_baggage_item(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.context = self
            .context
            .with_baggage_item(key.into(), Some(value.into()));
    }

    /// The baggage item stored under `key`.
    pub fn baggage_item(&self, key: &str) -> Option<&str> {
        self.context.baggage_item(key)
    }

    /// Finish the span, computing its duration from the tracer clock.
    pub fn finish(&mut self) {
        let clock = self.tracer.clock();
        let duration = if self.compute_duration_via_nano_ticks {
            (clock.current_nano_ticks() - self.start_time_nano_ticks) / 1_000
        } else {
            clock.current_time_micros() - self.start_time_micros
        };
        self.finish_with_duration(duration);
    }

    /// Finish the span at an explicit wall-clock timestamp.
    pub fn finish_with_timestamp(&mut self, finish_time_micros: i64) {
        self.finish_with_duration(finish_time_micros - self.start_time_micros);
    }

    fn finish_with_duration(&mut self, duration_micros: i64) {
        if self.finished {
            warn!(span = %self.context, "Span has already been finished; will not be reported again.");
            return;
        }
        self.finished = true;
        if self.context.is_sampled() {
            let snapshot = SpanData {
                context: self.context.clone(),
                operation_name: self.operation_name.clone(),
                start_time_micros: self.start_time_micros,
                duration_micros,
                tags: mem::take(&mut self.tags),
                logs: mem::take(&mut self.logs),
                references: mem::take(&mut self.references),
            };
            self.tracer.report_span(snapshot);
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.context, self.operation_name)
    }
}
