//! Error types surfaced by the propagation and sampling subsystems.

use crate::propagation::Format;
use thiserror::Error;

/// Errors raised while injecting into or extracting from a carrier.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PropagationError {
    /// The carrier held an empty tracer state string.
    #[error("empty tracer state string")]
    EmptyTracerState,

    /// The tracer state string did not match `traceId:spanId:parentId:flags`.
    #[error("malformed tracer state string: {0}")]
    MalformedTracerState(String),

    /// No codec is registered for the requested carrier format.
    #[error("unsupported carrier format: {0:?}")]
    UnsupportedFormat(Format),
}

/// Errors raised while fetching or decoding a remote sampling strategy.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SamplingStrategyError {
    /// The strategy endpoint could not be reached or answered with an error.
    #[error("sampling strategy query failed: {0}")]
    Query(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The strategy endpoint answered with a body that is not a valid
    /// strategy response.
    #[error("sampling strategy response could not be parsed: {0}")]
    Parsing(#[from] serde_json::Error),
}
