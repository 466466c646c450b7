//! Immutable span identity and baggage.

use crate::errors::PropagationError;
use std::collections::HashMap;
use std::fmt;
use std::ops::{BitAnd, BitOr};
use std::str::FromStr;
use std::sync::Arc;

/// A 128-bit trace identifier stored as two unsigned 64-bit halves.
///
/// Tracers configured for 64-bit ids leave `high` at zero; the textual form
/// then contains only the low half, unpadded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TraceId {
    /// High 64 bits; zero unless 128-bit trace ids are enabled.
    pub high: u64,
    /// Low 64 bits.
    pub low: u64,
}

impl TraceId {
    /// The all-zero trace id, valid only inside a debug-id container context.
    pub const ZERO: TraceId = TraceId { high: 0, low: 0 };

    /// Build a trace id from both halves.
    pub fn new(high: u64, low: u64) -> Self {
        TraceId { high, low }
    }

    /// Build a 64-bit trace id.
    pub fn from_u64(low: u64) -> Self {
        TraceId { high: 0, low }
    }

    /// Whether both halves are zero.
    pub fn is_zero(&self) -> bool {
        self.high == 0 && self.low == 0
    }

    /// Parse up to 32 hex digits, case-insensitive, leading zeros allowed.
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.is_empty() || hex.len() > 32 {
            return None;
        }
        if hex.len() <= 16 {
            return u64::from_str_radix(hex, 16).ok().map(TraceId::from_u64);
        }
        let (high, low) = hex.split_at(hex.len() - 16);
        Some(TraceId {
            high: u64::from_str_radix(high, 16).ok()?,
            low: u64::from_str_radix(low, 16).ok()?,
        })
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.high == 0 {
            write!(f, "{:x}", self.low)
        } else {
            write!(f, "{:x}{:016x}", self.high, self.low)
        }
    }
}

/// Flags propagated with every span context.
///
/// Bit 0 marks the trace as sampled, bit 1 as a debug trace. The remaining
/// bits are reserved and carried through propagation verbatim.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TraceFlags(u8);

impl TraceFlags {
    /// The trace is sampled.
    pub const SAMPLED: TraceFlags = TraceFlags(0x01);
    /// The trace is a debug trace; collectors should not downsample it.
    pub const DEBUG: TraceFlags = TraceFlags(0x02);

    /// Wrap a raw flags byte.
    pub fn new(flags: u8) -> Self {
        TraceFlags(flags)
    }

    /// The raw flags byte.
    pub fn to_u8(self) -> u8 {
        self.0
    }

    /// Whether the sampled bit is set.
    pub fn is_sampled(&self) -> bool {
        self.0 & Self::SAMPLED.0 == Self::SAMPLED.0
    }

    /// Whether the debug bit is set.
    pub fn is_debug(&self) -> bool {
        self.0 & Self::DEBUG.0 == Self::DEBUG.0
    }
}

impl BitOr for TraceFlags {
    type Output = TraceFlags;

    fn bitor(self, rhs: TraceFlags) -> TraceFlags {
        TraceFlags(self.0 | rhs.0)
    }
}

impl BitAnd for TraceFlags {
    type Output = TraceFlags;

    fn bitand(self, rhs: TraceFlags) -> TraceFlags {
        TraceFlags(self.0 & rhs.0)
    }
}

impl fmt::LowerHex for TraceFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Immutable identity of a span plus the baggage traveling with its trace.
///
/// Every mutation returns a new instance; existing references keep observing
/// the snapshot they hold. Baggage is stored behind an [`Arc`] so contexts
/// clone cheaply.
#[derive(Clone, Debug, PartialEq)]
pub struct SpanContext {
    trace_id: TraceId,
    span_id: u64,
    parent_id: u64,
    flags: TraceFlags,
    baggage: Arc<HashMap<String, String>>,
    debug_id: Option<Arc<str>>,
}

impl SpanContext {
    /// Build a context with empty baggage.
    pub fn new(trace_id: TraceId, span_id: u64, parent_id: u64, flags: TraceFlags) -> Self {
        SpanContext {
            trace_id,
            span_id,
            parent_id,
            flags,
            baggage: Arc::new(HashMap::new()),
            debug_id: None,
        }
    }

    /// Build a dummy context that only carries a debug correlation id.
    ///
    /// Returned from extraction when the carrier holds a
    /// `jaeger-debug-id` entry but no tracer state; starting a span under it
    /// begins a new trace sampled as a debug trace.
    pub fn with_debug_id(debug_id: impl Into<String>) -> Self {
        SpanContext {
            trace_id: TraceId::ZERO,
            span_id: 0,
            parent_id: 0,
            flags: TraceFlags::default(),
            baggage: Arc::new(HashMap::new()),
            debug_id: Some(Arc::from(debug_id.into())),
        }
    }

    /// The trace id.
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// The span id.
    pub fn span_id(&self) -> u64 {
        self.span_id
    }

    /// The parent span id, zero for root spans.
    pub fn parent_id(&self) -> u64 {
        self.parent_id
    }

    /// The propagation flags.
    pub fn flags(&self) -> TraceFlags {
        self.flags
    }

    /// Whether the trace is sampled.
    pub fn is_sampled(&self) -> bool {
        self.flags.is_sampled()
    }

    /// Whether the trace is a debug trace.
    pub fn is_debug(&self) -> bool {
        self.flags.is_debug()
    }

    /// The debug correlation id, when this context was extracted from a
    /// carrier with a `jaeger-debug-id` entry.
    pub fn debug_id(&self) -> Option<&str> {
        self.debug_id.as_deref()
    }

    /// Whether this context exists only to carry a debug correlation id.
    pub fn is_debug_id_container_only(&self) -> bool {
        self.trace_id.is_zero() && self.debug_id.is_some()
    }

    /// The baggage item stored under `key`.
    pub fn baggage_item(&self, key: &str) -> Option<&str> {
        self.baggage.get(key).map(String::as_str)
    }

    /// All baggage carried by this context.
    pub fn baggage(&self) -> &HashMap<String, String> {
        &self.baggage
    }

    /// A copy of this context with `key` set to `value`, or removed when
    /// `value` is `None`.
    pub fn with_baggage_item(&self, key: impl Into<String>, value: Option<String>) -> Self {
        let mut baggage = (*self.baggage).clone();
        match value {
            Some(value) => baggage.insert(key.into(), value),
            None => baggage.remove(&key.into()),
        };
        SpanContext {
            baggage: Arc::new(baggage),
            ..self.clone()
        }
    }

    /// A copy of this context with its baggage replaced wholesale.
    pub fn with_baggage(&self, baggage: HashMap<String, String>) -> Self {
        SpanContext {
            baggage: Arc::new(baggage),
            ..self.clone()
        }
    }

    /// A copy of this context with different flags.
    pub fn with_flags(&self, flags: TraceFlags) -> Self {
        SpanContext {
            flags,
            ..self.clone()
        }
    }

    /// The wire form `traceId:spanId:parentId:flags`, lowercase hex,
    /// unpadded.
    pub fn context_as_string(&self) -> String {
        format!(
            "{}:{:x}:{:x}:{:x}",
            self.trace_id, self.span_id, self.parent_id, self.flags
        )
    }
}

impl fmt::Display for SpanContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{:x}:{:x}:{:x}",
            self.trace_id, self.span_id, self.parent_id, self.flags
        )
    }
}

impl FromStr for SpanContext {
    type Err = PropagationError;

    /// Parse the wire form. Lenient to hex case and leading zeros, strict
    /// about shape: exactly four colon-separated fields.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.is_empty() {
            return Err(PropagationError::EmptyTracerState);
        }
        let malformed = || PropagationError::MalformedTracerState(value.to_string());
        let parts: Vec<&str> = value.split(':').collect();
        if parts.len() != 4 {
            return Err(malformed());
        }
        let trace_id = TraceId::from_hex(parts[0]).ok_or_else(malformed)?;
        let span_id = u64::from_str_radix(parts[1], 16).map_err(|_| malformed())?;
        let parent_id = u64::from_str_radix(parts[2], 16).map_err(|_| malformed())?;
        let flags = u8::from_str_radix(parts[3], 16).map_err(|_| malformed())?;
        Ok(SpanContext::new(
            trace_id,
            span_id,
            parent_id,
            TraceFlags::new(flags),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_string_round_trip() {
        let context = SpanContext::new(
            TraceId::from_u64(0xab),
            0xcd,
            0x12,
            TraceFlags::SAMPLED,
        );
        assert_eq!(context.context_as_string(), "ab:cd:12:1");

        let reparsed: SpanContext = "ab:cd:12:1".parse().unwrap();
        assert_eq!(reparsed, context);
    }

    #[test]
    fn parse_is_lenient_to_case_and_leading_zeros() {
        let context: SpanContext = "00AB:0CD:0012:01".parse().unwrap();
        assert_eq!(context.trace_id(), TraceId::from_u64(0xab));
        assert_eq!(context.span_id(), 0xcd);
        assert_eq!(context.parent_id(), 0x12);
        assert!(context.is_sampled());
    }

    #[test]
    fn parse_rejects_wrong_colon_count() {
        let err = "abc:def".parse::<SpanContext>().unwrap_err();
        assert!(matches!(err, PropagationError::MalformedTracerState(_)));

        let err = "a:b:c:d:e".parse::<SpanContext>().unwrap_err();
        assert!(matches!(err, PropagationError::MalformedTracerState(_)));
    }

    #[test]
    fn parse_rejects_empty_input() {
        let err = "".parse::<SpanContext>().unwrap_err();
        assert!(matches!(err, PropagationError::EmptyTracerState));
    }

    #[test]
    fn parse_rejects_non_hex_fields() {
        let err = "xyz:1:0:1".parse::<SpanContext>().unwrap_err();
        assert!(matches!(err, PropagationError::MalformedTracerState(_)));
    }

    #[test]
    fn long_trace_ids_keep_both_halves() {
        let context = SpanContext::new(
            TraceId::new(0x4d, 0x16),
            0x17c29,
            0,
            TraceFlags::SAMPLED,
        );
        assert_eq!(context.context_as_string(), "4d0000000000000016:17c29:0:1");

        let reparsed: SpanContext = "4d0000000000000016:17c29:0:1".parse().unwrap();
        assert_eq!(reparsed.trace_id(), TraceId::new(0x4d, 0x16));
    }

    #[test]
    fn trace_id_rejects_overlong_hex() {
        assert!(TraceId::from_hex(&"1".repeat(33)).is_none());
        assert!(TraceId::from_hex("").is_none());
    }

    #[test]
    fn baggage_mutation_returns_new_snapshot() {
        let context = SpanContext::new(TraceId::from_u64(1), 2, 0, TraceFlags::SAMPLED);
        let with_item = context.with_baggage_item("key", Some("value".to_string()));

        assert_eq!(context.baggage_item("key"), None);
        assert_eq!(with_item.baggage_item("key"), Some("value"));

        let removed = with_item.with_baggage_item("key", None);
        assert_eq!(removed.baggage_item("key"), None);
        assert_eq!(with_item.baggage_item("key"), Some("value"));
    }

    #[test]
    fn debug_id_container() {
        let context = SpanContext::with_debug_id("xyz");
        assert!(context.is_debug_id_container_only());
        assert_eq!(context.debug_id(), Some("xyz"));
        assert!(!context.is_sampled());

        let regular = SpanContext::new(TraceId::from_u64(1), 1, 0, TraceFlags::default());
        assert!(!regular.is_debug_id_container_only());
    }

    #[test]
    fn reserved_flag_bits_survive() {
        let context: SpanContext = "1:2:0:ff".parse().unwrap();
        assert_eq!(context.flags().to_u8(), 0xff);
        assert!(context.is_sampled());
        assert!(context.is_debug());
        assert_eq!(context.context_as_string(), "1:2:0:ff");
    }
}
