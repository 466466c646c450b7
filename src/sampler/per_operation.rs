//! Adaptive sampling with one strategy per operation.

use super::guaranteed::GuaranteedThroughputSampler;
use super::strategies::PerOperationSamplingStrategies;
use super::{ProbabilisticSampler, Sampler, SamplingStatus};
use crate::clock::{Clock, SystemClock};
use crate::span_context::TraceId;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

/// Sampler that keeps a [`GuaranteedThroughputSampler`] per operation name.
///
/// Endpoints of one service can receive vastly different traffic; a single
/// probability either floods the backend from the hot endpoints or starves
/// the quiet ones. This sampler gives every operation its own probability
/// plus a shared lower-bound floor. Operations beyond the configured map
/// capacity fall through to the service-wide default probabilistic sampler.
#[derive(Debug)]
pub struct PerOperationSampler {
    max_operations: usize,
    clock: Arc<dyn Clock>,
    state: Mutex<PerOperationState>,
}

#[derive(Debug)]
struct PerOperationState {
    default_sampler: ProbabilisticSampler,
    lower_bound: f64,
    operation_samplers: HashMap<String, GuaranteedThroughputSampler>,
}

impl PerOperationSampler {
    /// Create a sampler with the given capacity, default probability, and
    /// lower-bound floor.
    pub fn new(max_operations: usize, default_sampling_rate: f64, lower_bound: f64) -> Self {
        PerOperationSampler::with_clock(
            max_operations,
            default_sampling_rate,
            lower_bound,
            Arc::new(SystemClock::new()),
        )
    }

    pub(crate) fn with_clock(
        max_operations: usize,
        default_sampling_rate: f64,
        lower_bound: f64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        PerOperationSampler {
            max_operations,
            clock,
            state: Mutex::new(PerOperationState {
                default_sampler: ProbabilisticSampler::new(default_sampling_rate),
                lower_bound,
                operation_samplers: HashMap::new(),
            }),
        }
    }

    /// Merge a freshly retrieved strategy set into this sampler.
    ///
    /// Existing operations are updated in place, unseen operations inserted
    /// until the map is at capacity. Returns whether anything changed.
    pub(crate) fn update(&self, strategies: &PerOperationSamplingStrategies) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut updated =
            state.lower_bound != strategies.default_lower_bound_traces_per_second;

        state.lower_bound = strategies.default_lower_bound_traces_per_second;
        let default_rate = strategies.default_sampling_probability.clamp(0.0, 1.0);
        if state.default_sampler.sampling_rate() != default_rate {
            state.default_sampler = ProbabilisticSampler::new(default_rate);
            updated = true;
        }

        for strategy in &strategies.per_operation_strategies {
            let sampling_rate = strategy.probabilistic_sampling.sampling_rate.clamp(0.0, 1.0);
            let lower_bound = state.lower_bound;
            let at_capacity = state.operation_samplers.len() >= self.max_operations;
            match state.operation_samplers.entry(strategy.operation.clone()) {
                Entry::Occupied(mut entry) => {
                    updated = entry.get_mut().update(sampling_rate, lower_bound) || updated;
                }
                Entry::Vacant(entry) if !at_capacity => {
                    entry.insert(GuaranteedThroughputSampler::with_clock(
                        sampling_rate,
                        lower_bound,
                        self.clock.clone(),
                    ));
                    updated = true;
                }
                Entry::Vacant(_) => {
                    info!(
                        max_operations = self.max_operations,
                        operation = %strategy.operation,
                        "Exceeded the maximum number of operations for per-operation sampling"
                    );
                }
            }
        }

        updated
    }
}

impl Sampler for PerOperationSampler {
    fn sample(&self, operation_name: &str, trace_id: TraceId) -> SamplingStatus {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sampler) = state.operation_samplers.get(operation_name) {
            return sampler.sample(operation_name, trace_id);
        }
        if state.operation_samplers.len() < self.max_operations {
            let sampler = GuaranteedThroughputSampler::with_clock(
                state.default_sampler.sampling_rate(),
                state.lower_bound,
                self.clock.clone(),
            );
            let status = sampler.sample(operation_name, trace_id);
            state
                .operation_samplers
                .insert(operation_name.to_string(), sampler);
            return status;
        }
        state.default_sampler.sample(operation_name, trace_id)
    }
}
