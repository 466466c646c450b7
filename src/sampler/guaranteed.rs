//! Probabilistic sampling with a guaranteed per-second floor.

use super::rate_limiting::RateLimitingSampler;
use super::{decision_tags, ProbabilisticSampler, Sampler, SamplingStatus};
use crate::clock::{Clock, SystemClock};
use crate::span::TagValue;
use crate::span_context::TraceId;
use std::sync::Arc;

/// Composition of a probabilistic sampler and a lower-bound rate limiter.
///
/// A trace is sampled when either component votes yes. Both components are
/// consulted on every call, so the lower-bound tokens drain even while the
/// probabilistic component is admitting traffic; an operation with enough
/// volume is therefore governed by its probability, while a quiet operation
/// still produces at least `lower_bound` traces per second.
#[derive(Debug)]
pub struct GuaranteedThroughputSampler {
    probabilistic: ProbabilisticSampler,
    lower_bound: RateLimitingSampler,
    clock: Arc<dyn Clock>,
}

impl GuaranteedThroughputSampler {
    /// Value of `sampler.type` reported when the lower bound made the
    /// decision.
    pub const TYPE: &'static str = "lowerbound";

    /// Create a sampler with the given probability and floor.
    pub fn new(sampling_rate: f64, lower_bound: f64) -> Self {
        GuaranteedThroughputSampler::with_clock(
            sampling_rate,
            lower_bound,
            Arc::new(SystemClock::new()),
        )
    }

    pub(crate) fn with_clock(sampling_rate: f64, lower_bound: f64, clock: Arc<dyn Clock>) -> Self {
        GuaranteedThroughputSampler {
            probabilistic: ProbabilisticSampler::new(sampling_rate),
            lower_bound: RateLimitingSampler::with_clock(lower_bound, clock.clone()),
            clock,
        }
    }

    /// The probability component's rate.
    pub fn sampling_rate(&self) -> f64 {
        self.probabilistic.sampling_rate()
    }

    /// The lower-bound rate in traces per second.
    pub fn lower_bound(&self) -> f64 {
        self.lower_bound.max_traces_per_second()
    }

    // Replaces whichever components changed; returns whether anything did.
    pub(crate) fn update(&mut self, sampling_rate: f64, lower_bound: f64) -> bool {
        let mut changed = false;
        if self.probabilistic.sampling_rate() != sampling_rate {
            self.probabilistic = ProbabilisticSampler::new(sampling_rate.clamp(0.0, 1.0));
            changed = true;
        }
        if self.lower_bound.max_traces_per_second() != lower_bound {
            self.lower_bound = RateLimitingSampler::with_clock(lower_bound, self.clock.clone());
            changed = true;
        }
        changed
    }
}

impl PartialEq for GuaranteedThroughputSampler {
    fn eq(&self, other: &Self) -> bool {
        self.probabilistic == other.probabilistic && self.lower_bound == other.lower_bound
    }
}

impl Sampler for GuaranteedThroughputSampler {
    fn sample(&self, operation_name: &str, trace_id: TraceId) -> SamplingStatus {
        let probabilistic = self.probabilistic.sample(operation_name, trace_id);
        let lower_bound = self.lower_bound.sample(operation_name, trace_id);
        if probabilistic.sampled {
            return probabilistic;
        }
        SamplingStatus::new(
            lower_bound.sampled,
            decision_tags(
                Self::TYPE,
                TagValue::F64(self.lower_bound.max_traces_per_second()),
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockClock;
    use std::time::Duration;

    // below any positive probabilistic boundary
    const LOW_ID: TraceId = TraceId { high: 0, low: 1 };
    // above the boundary for rates below 1.0
    const HIGH_ID: TraceId = TraceId {
        high: 0,
        low: i64::MAX as u64,
    };

    #[test]
    fn probabilistic_win_reports_probabilistic_tags() {
        let clock = Arc::new(MockClock::new());
        let sampler = GuaranteedThroughputSampler::with_clock(0.5, 1.0, clock);

        let status = sampler.sample("op", LOW_ID);
        assert!(status.sampled);
        assert_eq!(
            status.tags,
            vec![
                ("sampler.type", TagValue::String("probabilistic".to_string())),
                ("sampler.param", TagValue::F64(0.5)),
            ]
        );
    }

    #[test]
    fn lower_bound_win_reports_lower_bound_tags() {
        let clock = Arc::new(MockClock::new());
        let sampler = GuaranteedThroughputSampler::with_clock(0.5, 1.0, clock.clone());

        // trace id loses the probabilistic vote but the bucket is full
        let status = sampler.sample("op", HIGH_ID);
        assert!(status.sampled);
        assert_eq!(
            status.tags,
            vec![
                ("sampler.type", TagValue::String("lowerbound".to_string())),
                ("sampler.param", TagValue::F64(1.0)),
            ]
        );

        // bucket now empty and probability still loses
        let status = sampler.sample("op", HIGH_ID);
        assert!(!status.sampled);
    }

    #[test]
    fn lower_bound_tokens_drain_on_probabilistic_wins() {
        let clock = Arc::new(MockClock::new());
        let sampler = GuaranteedThroughputSampler::with_clock(0.5, 1.0, clock);

        // the probabilistic win consumes the floor token too
        assert!(sampler.sample("op", LOW_ID).sampled);

        // so a probabilistic loss right after finds the bucket empty
        assert!(!sampler.sample("op", HIGH_ID).sampled);
    }

    #[test]
    fn update_replaces_changed_components_only() {
        let clock = Arc::new(MockClock::new());
        let mut sampler = GuaranteedThroughputSampler::with_clock(0.5, 1.0, clock.clone());

        assert!(!sampler.update(0.5, 1.0));
        assert!(sampler.update(0.25, 1.0));
        assert_eq!(sampler.sampling_rate(), 0.25);
        assert_eq!(sampler.lower_bound(), 1.0);

        assert!(sampler.update(0.25, 2.0));
        assert_eq!(sampler.lower_bound(), 2.0);

        clock.advance(Duration::from_secs(1));
        let status = sampler.sample("op", HIGH_ID);
        assert!(status.sampled);
        assert_eq!(status.tags[1], ("sampler.param", TagValue::F64(2.0)));
    }
}
