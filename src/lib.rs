//! A client library for [Jaeger] distributed tracing.
//!
//! The crate covers the in-process half of tracing: deciding whether each
//! trace is sampled, building and propagating span contexts across process
//! boundaries, and delivering finished spans to an out-of-process agent
//! without blocking application threads.
//!
//! # Components
//!
//! * [`Tracer`] is the facade: it builds spans, injects and extracts
//!   contexts, and owns the reporter and sampler lifecycles.
//! * [`sampler`] holds the pluggable sampling strategies, from
//!   [`sampler::ConstSampler`] up to [`sampler::RemoteControlledSampler`],
//!   which refreshes its strategy from the agent and adapts per operation.
//! * [`reporter`] holds the span sinks. [`reporter::RemoteReporter`] queues
//!   spans on a bounded channel and ships them from a background worker
//!   through a [`sender::Sender`].
//! * [`propagation`] carries a [`SpanContext`] through text maps and HTTP
//!   headers, including the `jaeger-debug-id` back-channel.
//! * [`metrics`] and [`clock`] are capabilities for the tracer's own
//!   diagnostics and time sources.
//!
//! # Getting started
//!
//! ```
//! use jaeger_client::reporter::InMemoryReporter;
//! use jaeger_client::sampler::ConstSampler;
//! use jaeger_client::Tracer;
//!
//! let reporter = InMemoryReporter::new();
//! let tracer = Tracer::builder("my-service", reporter.clone(), ConstSampler::new(true)).build();
//!
//! let mut span = tracer.span_builder("say-hello").start();
//! span.set_tag("hello.to", "world");
//! span.finish();
//!
//! assert_eq!(reporter.spans().len(), 1);
//! tracer.close();
//! ```
//!
//! In production the reporter is a [`reporter::RemoteReporter`] over a
//! sender for the agent transport, and the sampler is typically a
//! [`sampler::RemoteControlledSampler`] polling the agent for the strategy
//! configured at the collector.
//!
//! [Jaeger]: https://www.jaegertracing.io/

#![warn(missing_docs)]

pub mod clock;
pub mod constants;
pub mod errors;
pub mod metrics;
pub mod propagation;
pub mod reporter;
pub mod sampler;
pub mod sender;

mod span;
mod span_context;
#[cfg(test)]
mod testing;
mod tracer;

pub use span::{LogEntry, Reference, ReferenceKind, Span, SpanData, TagValue};
pub use span_context::{SpanContext, TraceFlags, TraceId};
pub use tracer::{SpanBuilder, Tracer, TracerBuilder};
