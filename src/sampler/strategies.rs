//! Wire models of the sampling strategy endpoint.

use serde::{Deserialize, Serialize};

/// Strategy that samples traces with a fixed probability.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProbabilisticSamplingStrategy {
    /// Sampling probability in the range [0.0, 1.0].
    pub sampling_rate: f64,
}

/// Strategy that samples a fixed number of traces per second.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitingSamplingStrategy {
    /// Upper bound on sampled traces per second.
    pub max_traces_per_second: f64,
}

/// Sampling strategy for one operation (endpoint, span name). Only
/// probabilistic sampling is supported per operation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperationSamplingStrategy {
    /// Operation the strategy applies to.
    pub operation: String,
    /// Probability for that operation.
    #[serde(default)]
    pub probabilistic_sampling: ProbabilisticSamplingStrategy,
}

/// Per-operation strategies plus service-wide defaults. Useful for services
/// whose endpoints receive vastly different traffic, where any single
/// sampling rate yields either too much data for some endpoints or almost
/// none for others.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PerOperationSamplingStrategies {
    /// Probability for operations that match none of the per-operation
    /// strategies.
    pub default_sampling_probability: f64,
    /// Lower-bound rate guaranteeing a minimal number of traces for
    /// endpoints that probabilistic sampling would otherwise never pick. The
    /// limit is local to a service instance.
    pub default_lower_bound_traces_per_second: f64,
    /// Strategies for individual operations within the service.
    #[serde(default)]
    pub per_operation_strategies: Vec<OperationSamplingStrategy>,
}

/// Overall sampling strategy for a service. Treated as a union: exactly one
/// of the strategy fields is expected, checked starting with
/// `operation_sampling`. The legacy `strategy_type` discriminator is carried
/// but not trusted, since it predates per-operation strategies.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SamplingStrategyResponse {
    /// Legacy discriminator for the probabilistic and rate-limiting cases.
    #[serde(default)]
    pub strategy_type: SamplingStrategyType,
    /// Present for a probabilistic strategy.
    pub probabilistic_sampling: Option<ProbabilisticSamplingStrategy>,
    /// Present for a rate-limiting strategy.
    pub rate_limiting_sampling: Option<RateLimitingSamplingStrategy>,
    /// Present for per-operation strategies.
    pub operation_sampling: Option<PerOperationSamplingStrategies>,
}

/// See [`SamplingStrategyResponse::strategy_type`].
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SamplingStrategyType {
    /// Probabilistic sampling.
    #[default]
    Probabilistic,
    /// Rate-limiting sampling.
    RateLimiting,
}
