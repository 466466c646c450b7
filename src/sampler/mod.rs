//! Sampling strategies.
//!
//! A sampler decides, once per trace at the root span, whether the trace is
//! recorded. The decision carries tags describing which strategy made it and
//! with what parameter, and those tags end up on the root span so the
//! backend can reason about collected data.

mod guaranteed;
mod http;
mod per_operation;
mod rate_limiting;
mod remote;
mod strategies;

pub use guaranteed::GuaranteedThroughputSampler;
pub use http::{HttpSamplingManager, SamplingManager};
pub use per_operation::PerOperationSampler;
pub use rate_limiting::RateLimitingSampler;
pub use remote::{RemoteControlledSampler, RemoteControlledSamplerBuilder};
pub use strategies::{
    OperationSamplingStrategy, PerOperationSamplingStrategies, ProbabilisticSamplingStrategy,
    RateLimitingSamplingStrategy, SamplingStrategyResponse, SamplingStrategyType,
};

use crate::constants::{SAMPLER_PARAM_TAG_KEY, SAMPLER_TYPE_TAG_KEY};
use crate::span::TagValue;
use crate::span_context::TraceId;

/// Outcome of one sampling decision.
#[derive(Clone, Debug, PartialEq)]
pub struct SamplingStatus {
    /// Whether the trace is sampled.
    pub sampled: bool,
    /// Tags describing the deciding strategy, recorded on the root span when
    /// the decision is positive.
    pub tags: Vec<(&'static str, TagValue)>,
}

impl SamplingStatus {
    pub(crate) fn new(sampled: bool, tags: Vec<(&'static str, TagValue)>) -> Self {
        SamplingStatus { sampled, tags }
    }
}

/// Decision function over `(operation, trace id)`.
///
/// Implementations are consulted from any thread without external
/// synchronization and must not block application threads beyond a short
/// mutex acquire.
pub trait Sampler: Send + Sync {
    /// Decide whether the trace identified by `trace_id` is sampled.
    fn sample(&self, operation_name: &str, trace_id: TraceId) -> SamplingStatus;

    /// Release resources held by the sampler. Called when the owning tracer
    /// closes.
    fn close(&self) {}
}

fn decision_tags(sampler_type: &'static str, param: TagValue) -> Vec<(&'static str, TagValue)> {
    vec![
        (SAMPLER_TYPE_TAG_KEY, TagValue::String(sampler_type.to_string())),
        (SAMPLER_PARAM_TAG_KEY, param),
    ]
}

/// Sampler that makes the same decision for every trace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConstSampler {
    decision: bool,
}

impl ConstSampler {
    /// Value of `sampler.type` reported by this sampler.
    pub const TYPE: &'static str = "const";

    /// Create a sampler that always answers `decision`.
    pub fn new(decision: bool) -> Self {
        ConstSampler { decision }
    }
}

impl Sampler for ConstSampler {
    fn sample(&self, _operation_name: &str, _trace_id: TraceId) -> SamplingStatus {
        SamplingStatus::new(
            self.decision,
            decision_tags(Self::TYPE, TagValue::Bool(self.decision)),
        )
    }
}

/// Sampler that admits a fixed fraction of traces, keyed off the trace id.
///
/// A trace id below `rate * 2^63` (after masking the id to 63 bits) is
/// sampled, so the same trace id always produces the same decision.
#[derive(Clone, Debug, PartialEq)]
pub struct ProbabilisticSampler {
    sampling_rate: f64,
    sampling_boundary: u64,
}

impl ProbabilisticSampler {
    /// Value of `sampler.type` reported by this sampler.
    pub const TYPE: &'static str = "probabilistic";

    /// Create a sampler admitting `sampling_rate` of traces.
    ///
    /// # Panics
    ///
    /// Panics when `sampling_rate` is outside `[0.0, 1.0]`.
    pub fn new(sampling_rate: f64) -> Self {
        assert!(
            (0.0..=1.0).contains(&sampling_rate),
            "sampling rate must be between 0.0 and 1.0"
        );
        let sampling_boundary = if sampling_rate >= 1.0 {
            u64::MAX
        } else {
            (sampling_rate * (1u64 << 63) as f64) as u64
        };
        ProbabilisticSampler {
            sampling_rate,
            sampling_boundary,
        }
    }

    /// The configured sampling rate.
    pub fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }
}

impl Sampler for ProbabilisticSampler {
    fn sample(&self, _operation_name: &str, trace_id: TraceId) -> SamplingStatus {
        let sampled = (trace_id.low & i64::MAX as u64) < self.sampling_boundary;
        SamplingStatus::new(
            sampled,
            decision_tags(Self::TYPE, TagValue::F64(self.sampling_rate)),
        )
    }
}
