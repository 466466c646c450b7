//! The tracer: span construction, propagation entry points, lifecycle.

use crate::clock::{Clock, SystemClock};
use crate::constants::{
    DEBUG_ID_HEADER_KEY, SPAN_KIND_SERVER, SPAN_KIND_TAG_KEY,
};
use crate::errors::PropagationError;
use crate::metrics::{Metrics, MetricsFactory};
use crate::propagation::{
    ContextExtractor, ContextInjector, Extractor, Format, Injector, PropagationRegistry,
    TextMapCodec,
};
use crate::reporter::Reporter;
use crate::sampler::Sampler;
use crate::span::{Reference, ReferenceKind, Span, SpanData, TagValue};
use crate::span_context::{SpanContext, TraceFlags, TraceId};
use rand::{rngs, Rng, SeedableRng};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

const VERSION_TAG_KEY: &str = "jaeger.version";
const HOSTNAME_TAG_KEY: &str = "jaeger.hostname";
const VERSION: &str = concat!("Rust-", env!("CARGO_PKG_VERSION"));

thread_local! {
    // Per-thread generator for span and trace ids.
    static CURRENT_RNG: RefCell<rngs::SmallRng> = RefCell::new(rngs::SmallRng::from_entropy());
}

fn random_id() -> u64 {
    CURRENT_RNG.with(|rng| {
        let mut rng = rng.borrow_mut();
        loop {
            let id = rng.gen::<u64>();
            if id != 0 {
                return id;
            }
        }
    })
}

struct TracerInner {
    service_name: String,
    reporter: Box<dyn Reporter>,
    sampler: Box<dyn Sampler>,
    registry: PropagationRegistry,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    tags: HashMap<String, TagValue>,
    zipkin_shared_rpc_span: bool,
    use_128bit_trace_id: bool,
    // high half shared by every 128-bit trace id this tracer generates
    trace_id_high: u64,
}

/// Entry point of the client: builds spans, propagates contexts, and owns
/// the reporter and sampler lifecycles.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Tracer {
    inner: Arc<TracerInner>,
}

impl Tracer {
    /// Start building a tracer.
    ///
    /// # Panics
    ///
    /// Panics when `service_name` is empty or blank.
    pub fn builder(
        service_name: impl Into<String>,
        reporter: impl Reporter + 'static,
        sampler: impl Sampler + 'static,
    ) -> TracerBuilder {
        TracerBuilder::new(service_name, reporter, sampler)
    }

    /// The service name spans are reported under.
    pub fn service_name(&self) -> &str {
        &self.inner.service_name
    }

    /// Process-level tags attached to this tracer.
    pub fn tags(&self) -> &HashMap<String, TagValue> {
        &self.inner.tags
    }

    /// Start describing a span for `operation_name`.
    pub fn span_builder(&self, operation_name: impl Into<String>) -> SpanBuilder {
        SpanBuilder {
            tracer: self.clone(),
            operation_name: operation_name.into(),
            start_time_micros: None,
            references: Vec::new(),
            tags: HashMap::new(),
            baggage: HashMap::new(),
        }
    }

    /// Write `context` into `carrier` using the codec registered for
    /// `format`.
    pub fn inject(
        &self,
        context: &SpanContext,
        format: Format,
        carrier: &mut dyn Injector,
    ) -> Result<(), PropagationError> {
        let injector = self
            .inner
            .registry
            .injector(&format)
            .ok_or(PropagationError::UnsupportedFormat(format))?;
        injector.inject(context, carrier);
        Ok(())
    }

    /// Read a context from `carrier` using the codec registered for
    /// `format`.
    ///
    /// A carrier with no context yields `Ok(None)`. A carrier whose state is
    /// present but unreadable also yields `Ok(None)`, after counting a
    /// decoding error; only an unregistered format is surfaced as an error.
    pub fn extract(
        &self,
        format: Format,
        carrier: &dyn Extractor,
    ) -> Result<Option<SpanContext>, PropagationError> {
        let extractor = self
            .inner
            .registry
            .extractor(&format)
            .ok_or(PropagationError::UnsupportedFormat(format))?;
        match extractor.extract(carrier) {
            Ok(context) => Ok(context),
            Err(err) => {
                self.inner.metrics.decoding_errors.inc(1);
                debug!(error = %err, "Unable to extract span context from carrier");
                Ok(None)
            }
        }
    }

    /// Close the reporter, then the sampler.
    pub fn close(&self) {
        self.inner.reporter.close();
        self.inner.sampler.close();
    }

    pub(crate) fn clock(&self) -> Arc<dyn Clock> {
        self.inner.clock.clone()
    }

    pub(crate) fn report_span(&self, span: SpanData) {
        self.inner.reporter.report(span);
        self.inner.metrics.spans_finished.inc(1);
    }

    fn new_trace_id(&self) -> TraceId {
        let high = if self.inner.use_128bit_trace_id {
            self.inner.trace_id_high
        } else {
            0
        };
        TraceId::new(high, random_id())
    }
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("service_name", &self.inner.service_name)
            .finish()
    }
}

/// Describes a span before it starts: references, tags, and an optional
/// explicit start time.
pub struct SpanBuilder {
    tracer: Tracer,
    operation_name: String,
    start_time_micros: Option<i64>,
    references: Vec<Reference>,
    tags: HashMap<String, TagValue>,
    baggage: HashMap<String, String>,
}

impl SpanBuilder {
    /// Reference `parent` as the direct parent of the new span.
    pub fn child_of(self, parent: &SpanContext) -> Self {
        self.add_reference(ReferenceKind::ChildOf, parent)
    }

    /// Reference `preceding` as completed work the new span follows.
    pub fn follows_from(self, preceding: &SpanContext) -> Self {
        self.add_reference(ReferenceKind::FollowsFrom, preceding)
    }

    /// Add a causal reference. Baggage of every referenced context is merged
    /// into the new span, later references overwriting earlier ones on
    /// conflicting keys.
    pub fn add_reference(mut self, kind: ReferenceKind, context: &SpanContext) -> Self {
        for (key, value) in context.baggage() {
            self.baggage.insert(key.clone(), value.clone());
        }
        self.references.push(Reference {
            kind,
            context: context.clone(),
        });
        self
    }

    /// Set a tag on the span being built.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Use an explicit start time instead of reading the clock.
    pub fn with_start_timestamp(mut self, start_time_micros: i64) -> Self {
        self.start_time_micros = Some(start_time_micros);
        self
    }

    /// Start the span.
    pub fn start(mut self) -> Span {
        let preferred_parent = self
            .references
            .iter()
            .find(|reference| reference.kind == ReferenceKind::ChildOf)
            .or_else(|| self.references.first())
            .map(|reference| reference.context.clone());

        let context = match &preferred_parent {
            None => self.new_root_context(None),
            Some(parent) if parent.is_debug_id_container_only() => {
                self.new_root_context(parent.debug_id().map(str::to_owned))
            }
            Some(parent) => self.child_context(parent),
        };

        let inner = &self.tracer.inner;
        let (start_time_micros, start_time_nano_ticks, via_nano_ticks) =
            match self.start_time_micros {
                Some(start_time_micros) => (start_time_micros, 0, false),
                None => {
                    let micros = inner.clock.current_time_micros();
                    if inner.clock.is_micros_accurate() {
                        (micros, 0, false)
                    } else {
                        (micros, inner.clock.current_nano_ticks(), true)
                    }
                }
            };

        // In shared-span mode process tags ride the first span of this
        // process: the local root or the server side of the shared pair.
        if inner.zipkin_shared_rpc_span && (preferred_parent.is_none() || self.is_rpc_server()) {
            for (key, value) in &inner.tags {
                self.tags.insert(key.clone(), value.clone());
            }
        }

        if context.is_sampled() {
            inner.metrics.spans_sampled.inc(1);
        } else {
            inner.metrics.spans_not_sampled.inc(1);
        }
        inner.metrics.spans_started.inc(1);

        Span::new(
            self.tracer.clone(),
            context,
            self.operation_name,
            start_time_micros,
            start_time_nano_ticks,
            via_nano_ticks,
            self.tags,
            self.references,
        )
    }

    fn is_rpc_server(&self) -> bool {
        matches!(
            self.tags.get(SPAN_KIND_TAG_KEY),
            Some(TagValue::String(kind)) if kind == SPAN_KIND_SERVER
        )
    }

    fn new_root_context(&mut self, debug_id: Option<String>) -> SpanContext {
        let inner = &self.tracer.inner;
        let trace_id = self.tracer.new_trace_id();

        let mut flags = TraceFlags::default();
        match debug_id {
            Some(debug_id) => {
                flags = TraceFlags::SAMPLED | TraceFlags::DEBUG;
                self.tags.insert(
                    DEBUG_ID_HEADER_KEY.to_string(),
                    TagValue::String(debug_id),
                );
                inner.metrics.traces_started_sampled.inc(1);
            }
            None => {
                let status = inner.sampler.sample(&self.operation_name, trace_id);
                if status.sampled {
                    flags = TraceFlags::SAMPLED;
                    for (key, value) in status.tags {
                        self.tags.insert(key.to_string(), value);
                    }
                    inner.metrics.traces_started_sampled.inc(1);
                } else {
                    inner.metrics.traces_started_not_sampled.inc(1);
                }
            }
        }

        let context = SpanContext::new(trace_id, trace_id.low, 0, flags);
        if self.baggage.is_empty() {
            context
        } else {
            context.with_baggage(std::mem::take(&mut self.baggage))
        }
    }

    fn child_context(&mut self, parent: &SpanContext) -> SpanContext {
        let inner = &self.tracer.inner;
        if self.is_rpc_server() {
            if parent.is_sampled() {
                inner.metrics.traces_joined_sampled.inc(1);
            } else {
                inner.metrics.traces_joined_not_sampled.inc(1);
            }
            // Zipkin server compatibility: both sides of the RPC share one
            // span id
            if inner.zipkin_shared_rpc_span {
                return parent.clone();
            }
        }
        SpanContext::new(
            parent.trace_id(),
            random_id(),
            parent.span_id(),
            parent.flags(),
        )
        .with_baggage(std::mem::take(&mut self.baggage))
    }
}

/// Assembles a [`Tracer`].
pub struct TracerBuilder {
    service_name: String,
    reporter: Box<dyn Reporter>,
    sampler: Box<dyn Sampler>,
    registry: PropagationRegistry,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<Metrics>>,
    tags: HashMap<String, TagValue>,
    zipkin_shared_rpc_span: bool,
    use_128bit_trace_id: bool,
}

impl TracerBuilder {
    /// Create a builder. Plain and URL-encoded text codecs are registered
    /// for [`Format::TextMap`] and [`Format::HttpHeaders`] out of the box.
    ///
    /// # Panics
    ///
    /// Panics when `service_name` is empty or blank.
    pub fn new(
        service_name: impl Into<String>,
        reporter: impl Reporter + 'static,
        sampler: impl Sampler + 'static,
    ) -> Self {
        let service_name = service_name.into();
        assert!(
            !service_name.trim().is_empty(),
            "service name must not be empty"
        );

        let registry = PropagationRegistry::new();
        let text_codec = Arc::new(TextMapCodec::new(false));
        registry.register_injector(Format::TextMap, text_codec.clone());
        registry.register_extractor(Format::TextMap, text_codec);
        let http_codec = Arc::new(TextMapCodec::new(true));
        registry.register_injector(Format::HttpHeaders, http_codec.clone());
        registry.register_extractor(Format::HttpHeaders, http_codec);

        TracerBuilder {
            service_name,
            reporter: Box::new(reporter),
            sampler: Box::new(sampler),
            registry,
            clock: Arc::new(SystemClock::new()),
            metrics: None,
            tags: HashMap::new(),
            zipkin_shared_rpc_span: false,
            use_128bit_trace_id: false,
        }
    }

    /// Use a custom clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Materialize metrics from `factory`.
    pub fn with_metrics_factory(mut self, factory: &dyn MetricsFactory) -> Self {
        self.metrics = Some(Arc::new(Metrics::new(factory)));
        self
    }

    /// Use an already materialized metrics set, typically shared with the
    /// reporter and sampler.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Attach a process-level tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Reuse the parent span id for `span.kind=server` children, producing
    /// Zipkin-style shared RPC spans. Both sides of the RPC then report the
    /// same `(trace id, span id)` pair.
    pub fn with_zipkin_shared_rpc_span(mut self) -> Self {
        self.zipkin_shared_rpc_span = true;
        self
    }

    /// Generate 128-bit trace ids.
    pub fn with_trace_id_128bit(mut self) -> Self {
        self.use_128bit_trace_id = true;
        self
    }

    /// Register a custom injector for `format`.
    pub fn register_injector(self, format: Format, injector: Arc<dyn ContextInjector>) -> Self {
        self.registry.register_injector(format, injector);
        self
    }

    /// Register a custom extractor for `format`.
    pub fn register_extractor(self, format: Format, extractor: Arc<dyn ContextExtractor>) -> Self {
        self.registry.register_extractor(format, extractor);
        self
    }

    /// Build the tracer.
    pub fn build(mut self) -> Tracer {
        self.tags
            .insert(VERSION_TAG_KEY.to_string(), TagValue::String(VERSION.to_string()));
        if !self.tags.contains_key(HOSTNAME_TAG_KEY) {
            match hostname::get().map(|name| name.to_string_lossy().to_string()) {
                Ok(hostname) if !hostname.is_empty() => {
                    self.tags
                        .insert(HOSTNAME_TAG_KEY.to_string(), TagValue::String(hostname));
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "Cannot obtain host name"),
            }
        }

        let epoch_seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0);
        let trace_id_high = (epoch_seconds << 32) | (random_id() & 0xFFFF_FFFF);

        Tracer {
            inner: Arc::new(TracerInner {
                service_name: self.service_name,
                reporter: self.reporter,
                sampler: self.sampler,
                registry: self.registry,
                clock: self.clock,
                metrics: self.metrics.unwrap_or_else(|| Arc::new(Metrics::noop())),
                tags: self.tags,
                zipkin_shared_rpc_span: self.zipkin_shared_rpc_span,
                use_128bit_trace_id: self.use_128bit_trace_id,
                trace_id_high,
            }),
        }
    }
}
