//! Well-known tag keys and carrier header keys.

/// Span tag key under which a sampler records the strategy that made the
/// sampling decision (`const`, `probabilistic`, `ratelimiting`, `lowerbound`).
pub const SAMPLER_TYPE_TAG_KEY: &str = "sampler.type";

/// Span tag key for the parameter of the sampler that made the decision.
pub const SAMPLER_PARAM_TAG_KEY: &str = "sampler.param";

/// Carrier key for the debug correlation id. When present in an inbound
/// carrier it forces the new trace to be sampled as a debug trace, and its
/// value is recorded as a span tag under this same key so it can serve as a
/// searchable correlation id.
pub const DEBUG_ID_HEADER_KEY: &str = "jaeger-debug-id";

/// Span tag key identifying the role a span plays in an RPC.
pub const SPAN_KIND_TAG_KEY: &str = "span.kind";

/// `span.kind` value marking the server side of an RPC.
pub const SPAN_KIND_SERVER: &str = "server";
