//! Sampler whose strategy is refreshed from a remote endpoint.

use super::http::{HttpSamplingManager, SamplingManager};
use super::per_operation::PerOperationSampler;
use super::rate_limiting::RateLimitingSampler;
use super::strategies::{PerOperationSamplingStrategies, SamplingStrategyResponse};
use super::{ProbabilisticSampler, Sampler, SamplingStatus};
use crate::clock::{Clock, SystemClock};
use crate::errors::SamplingStrategyError;
use crate::metrics::Metrics;
use crate::span_context::TraceId;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender as ShutdownSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_INITIAL_SAMPLING_RATE: f64 = 0.001;
const DEFAULT_MAX_OPERATIONS: usize = 2000;

// The strategy currently driving decisions. Replaced atomically under the
// lock when a refresh brings something new.
#[derive(Debug)]
enum InnerSampler {
    Probabilistic(ProbabilisticSampler),
    RateLimiting(RateLimitingSampler),
    PerOperation(PerOperationSampler),
}

impl InnerSampler {
    fn sample(&self, operation_name: &str, trace_id: TraceId) -> SamplingStatus {
        match self {
            InnerSampler::Probabilistic(sampler) => sampler.sample(operation_name, trace_id),
            InnerSampler::RateLimiting(sampler) => sampler.sample(operation_name, trace_id),
            InnerSampler::PerOperation(sampler) => sampler.sample(operation_name, trace_id),
        }
    }
}

impl PartialEq for InnerSampler {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (InnerSampler::Probabilistic(a), InnerSampler::Probabilistic(b)) => a == b,
            (InnerSampler::RateLimiting(a), InnerSampler::RateLimiting(b)) => a == b,
            _ => false,
        }
    }
}

struct RemoteSamplerInner {
    service_name: String,
    manager: Box<dyn SamplingManager>,
    metrics: Arc<Metrics>,
    clock: Arc<dyn Clock>,
    max_operations: usize,
    sampler: Mutex<InnerSampler>,
}

impl RemoteSamplerInner {
    fn update_sampler(&self) {
        match self.manager.sampling_strategy(&self.service_name) {
            Ok(response) => {
                self.metrics.sampler_retrieved.inc(1);
                match &response.operation_sampling {
                    Some(strategies) => self.update_per_operation_sampler(strategies),
                    None => self.update_rate_limiting_or_probabilistic_sampler(&response),
                }
            }
            Err(SamplingStrategyError::Parsing(err)) => {
                self.metrics.sampler_parsing_failure.inc(1);
                debug!(error = %err, "Unable to parse sampling strategy response");
            }
            Err(err) => {
                self.metrics.sampler_query_failure.inc(1);
                debug!(error = %err, "Unable to retrieve sampling strategy");
            }
        }
    }

    fn update_per_operation_sampler(&self, strategies: &PerOperationSamplingStrategies) {
        let mut sampler = self.sampler.lock().unwrap_or_else(PoisonError::into_inner);
        match &*sampler {
            InnerSampler::PerOperation(per_operation) => {
                if per_operation.update(strategies) {
                    self.metrics.sampler_updated.inc(1);
                }
            }
            _ => {
                let per_operation = PerOperationSampler::with_clock(
                    self.max_operations,
                    strategies.default_sampling_probability.clamp(0.0, 1.0),
                    strategies.default_lower_bound_traces_per_second,
                    self.clock.clone(),
                );
                per_operation.update(strategies);
                *sampler = InnerSampler::PerOperation(per_operation);
                self.metrics.sampler_updated.inc(1);
            }
        }
    }

    fn update_rate_limiting_or_probabilistic_sampler(&self, response: &SamplingStrategyResponse) {
        let candidate = if let Some(probabilistic) = &response.probabilistic_sampling {
            InnerSampler::Probabilistic(ProbabilisticSampler::new(
                probabilistic.sampling_rate.clamp(0.0, 1.0),
            ))
        } else if let Some(rate_limiting) = &response.rate_limiting_sampling {
            InnerSampler::RateLimiting(RateLimitingSampler::with_clock(
                rate_limiting.max_traces_per_second,
                self.clock.clone(),
            ))
        } else {
            self.metrics.sampler_parsing_failure.inc(1);
            debug!("Sampling strategy response carried no strategy");
            return;
        };

        let mut sampler = self.sampler.lock().unwrap_or_else(PoisonError::into_inner);
        if *sampler != candidate {
            *sampler = candidate;
            self.metrics.sampler_updated.inc(1);
        }
    }
}

/// Sampler that polls a strategy endpoint and swaps its inner strategy when
/// the response changes.
///
/// Decisions before the first successful refresh come from a probabilistic
/// sampler at the configured initial rate. The poll runs on its own
/// background thread and never blocks application threads; a failed poll
/// keeps the current strategy.
pub struct RemoteControlledSampler {
    inner: Arc<RemoteSamplerInner>,
    poller: Mutex<Option<(ShutdownSender<()>, JoinHandle<()>)>>,
}

impl RemoteControlledSampler {
    /// Start building a sampler for `service_name`.
    pub fn builder(service_name: impl Into<String>) -> RemoteControlledSamplerBuilder {
        RemoteControlledSamplerBuilder::new(service_name)
    }

    #[cfg(test)]
    fn poll_once(&self) {
        self.inner.update_sampler();
    }
}

impl Sampler for RemoteControlledSampler {
    fn sample(&self, operation_name: &str, trace_id: TraceId) -> SamplingStatus {
        self.inner
            .sampler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sample(operation_name, trace_id)
    }

    fn close(&self) {
        let poller = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((shutdown, handle)) = poller {
            let _ = shutdown.try_send(());
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for RemoteControlledSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteControlledSampler")
            .field("service_name", &self.inner.service_name)
            .finish()
    }
}

/// Builder for [`RemoteControlledSampler`].
pub struct RemoteControlledSamplerBuilder {
    service_name: String,
    manager: Option<Box<dyn SamplingManager>>,
    initial_sampling_rate: f64,
    polling_interval: Duration,
    max_operations: usize,
    metrics: Option<Arc<Metrics>>,
    clock: Arc<dyn Clock>,
}

impl RemoteControlledSamplerBuilder {
    fn new(service_name: impl Into<String>) -> Self {
        RemoteControlledSamplerBuilder {
            service_name: service_name.into(),
            manager: None,
            initial_sampling_rate: DEFAULT_INITIAL_SAMPLING_RATE,
            polling_interval: DEFAULT_POLLING_INTERVAL,
            max_operations: DEFAULT_MAX_OPERATIONS,
            metrics: None,
            clock: Arc::new(SystemClock::new()),
        }
    }

    /// Use a custom strategy source instead of the agent's HTTP endpoint.
    pub fn with_sampling_manager(mut self, manager: impl SamplingManager + 'static) -> Self {
        self.manager = Some(Box::new(manager));
        self
    }

    /// Poll the agent at `host_port` (`"host:port"`).
    pub fn with_agent_host_port(mut self, host_port: impl Into<String>) -> Self {
        self.manager = Some(Box::new(HttpSamplingManager::new(host_port)));
        self
    }

    /// Probability used until the first refresh succeeds. Defaults to 0.001.
    pub fn with_initial_sampling_rate(mut self, sampling_rate: f64) -> Self {
        self.initial_sampling_rate = sampling_rate;
        self
    }

    /// How often to refresh the strategy. Defaults to 60 seconds.
    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    /// Capacity of the per-operation strategy map. Defaults to 2000.
    pub fn with_max_operations(mut self, max_operations: usize) -> Self {
        self.max_operations = max_operations;
        self
    }

    /// Metrics sink for refresh outcomes.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[cfg(test)]
    fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build the sampler and start its polling thread.
    pub fn build(self) -> RemoteControlledSampler {
        let initial = ProbabilisticSampler::new(self.initial_sampling_rate.clamp(0.0, 1.0));
        let inner = Arc::new(RemoteSamplerInner {
            service_name: self.service_name,
            manager: self
                .manager
                .unwrap_or_else(|| Box::new(HttpSamplingManager::default())),
            metrics: self.metrics.unwrap_or_else(|| Arc::new(Metrics::noop())),
            clock: self.clock,
            max_operations: self.max_operations,
            sampler: Mutex::new(InnerSampler::Probabilistic(initial)),
        });

        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let poll_inner = inner.clone();
        let interval = self.polling_interval;
        let poller = thread::Builder::new()
            .name("jaeger.RemoteSampler-PollTimer".to_string())
            .spawn(move || loop {
                match shutdown_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => poll_inner.update_sampler(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .ok()
            .map(|handle| (shutdown_tx, handle));

        RemoteControlledSampler {
            inner,
            poller: Mutex::new(poller),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::InMemoryMetricsFactory;
    use crate::sampler::strategies::{
        OperationSamplingStrategy, ProbabilisticSamplingStrategy, RateLimitingSamplingStrategy,
    };
    use crate::span::TagValue;
    use crate::testing::MockClock;
    use std::collections::VecDeque;

    struct QueuedManager {
        responses: Mutex<VecDeque<Result<SamplingStrategyResponse, SamplingStrategyError>>>,
    }

    impl QueuedManager {
        fn new(
            responses: Vec<Result<SamplingStrategyResponse, SamplingStrategyError>>,
        ) -> Self {
            QueuedManager {
                responses: Mutex::new(responses.into()),
            }
        }
    }

    impl SamplingManager for QueuedManager {
        fn sampling_strategy(
            &self,
            _service_name: &str,
        ) -> Result<SamplingStrategyResponse, SamplingStrategyError> {
            self.responses
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front()
                .unwrap_or_else(|| Ok(SamplingStrategyResponse::default()))
        }
    }

    fn probabilistic_response(sampling_rate: f64) -> SamplingStrategyResponse {
        SamplingStrategyResponse {
            probabilistic_sampling: Some(ProbabilisticSamplingStrategy { sampling_rate }),
            ..Default::default()
        }
    }

    fn rate_limiting_response(max_traces_per_second: f64) -> SamplingStrategyResponse {
        SamplingStrategyResponse {
            rate_limiting_sampling: Some(RateLimitingSamplingStrategy {
                max_traces_per_second,
            }),
            ..Default::default()
        }
    }

    fn sampler_with(
        responses: Vec<Result<SamplingStrategyResponse, SamplingStrategyError>>,
        metrics: Arc<Metrics>,
    ) -> RemoteControlledSampler {
        RemoteControlledSampler::builder("test-service")
            .with_sampling_manager(QueuedManager::new(responses))
            .with_metrics(metrics)
            .with_clock(Arc::new(MockClock::new()))
            .with_polling_interval(Duration::from_secs(3600))
            .with_initial_sampling_rate(1.0)
            .build()
    }

    fn sampler_type(sampler: &RemoteControlledSampler) -> TagValue {
        sampler
            .sample("op", TraceId::from_u64(1))
            .tags
            .into_iter()
            .find(|(key, _)| *key == "sampler.type")
            .expect("missing sampler.type tag")
            .1
    }

    #[test]
    fn initial_sampler_is_probabilistic() {
        let factory = InMemoryMetricsFactory::new();
        let sampler = sampler_with(vec![], Arc::new(Metrics::new(&factory)));
        assert_eq!(
            sampler_type(&sampler),
            TagValue::String("probabilistic".to_string())
        );
        sampler.close();
    }

    #[test]
    fn refresh_swaps_in_rate_limiting_strategy() {
        let factory = InMemoryMetricsFactory::new();
        let metrics = Arc::new(Metrics::new(&factory));
        let sampler = sampler_with(vec![Ok(rate_limiting_response(2.0))], metrics);

        sampler.poll_once();
        assert_eq!(
            sampler_type(&sampler),
            TagValue::String("ratelimiting".to_string())
        );
        assert_eq!(
            factory.counter_value("jaeger_tracer_sampler", &[("state", "retrieved")]),
            1
        );
        assert_eq!(
            factory.counter_value("jaeger_tracer_sampler", &[("state", "updated")]),
            1
        );
        sampler.close();
    }

    #[test]
    fn unchanged_strategy_counts_retrieved_but_not_updated() {
        let factory = InMemoryMetricsFactory::new();
        let metrics = Arc::new(Metrics::new(&factory));
        let sampler = sampler_with(
            vec![
                Ok(probabilistic_response(0.5)),
                Ok(probabilistic_response(0.5)),
            ],
            metrics,
        );

        sampler.poll_once();
        sampler.poll_once();

        assert_eq!(
            factory.counter_value("jaeger_tracer_sampler", &[("state", "retrieved")]),
            2
        );
        assert_eq!(
            factory.counter_value("jaeger_tracer_sampler", &[("state", "updated")]),
            1
        );
        sampler.close();
    }

    #[test]
    fn query_failure_keeps_current_sampler() {
        let factory = InMemoryMetricsFactory::new();
        let metrics = Arc::new(Metrics::new(&factory));
        let sampler = sampler_with(
            vec![Err(SamplingStrategyError::Query("agent unreachable".into()))],
            metrics,
        );

        sampler.poll_once();
        assert_eq!(
            sampler_type(&sampler),
            TagValue::String("probabilistic".to_string())
        );
        assert_eq!(
            factory.counter_value(
                "jaeger_tracer_sampler",
                &[("state", "failure"), ("phase", "query")]
            ),
            1
        );
        assert_eq!(
            factory.counter_value("jaeger_tracer_sampler", &[("state", "retrieved")]),
            0
        );
        sampler.close();
    }

    #[test]
    fn empty_response_counts_a_parsing_failure() {
        let factory = InMemoryMetricsFactory::new();
        let metrics = Arc::new(Metrics::new(&factory));
        let sampler = sampler_with(vec![Ok(SamplingStrategyResponse::default())], metrics);

        sampler.poll_once();
        assert_eq!(
            factory.counter_value(
                "jaeger_tracer_sampler",
                &[("state", "failure"), ("phase", "parsing")]
            ),
            1
        );
        sampler.close();
    }

    #[test]
    fn per_operation_strategies_replace_and_then_merge() {
        let factory = InMemoryMetricsFactory::new();
        let metrics = Arc::new(Metrics::new(&factory));
        let strategies = PerOperationSamplingStrategies {
            default_sampling_probability: 0.5,
            default_lower_bound_traces_per_second: 1.0,
            per_operation_strategies: vec![OperationSamplingStrategy {
                operation: "get-user".to_string(),
                probabilistic_sampling: ProbabilisticSamplingStrategy { sampling_rate: 0.8 },
            }],
        };
        let response = SamplingStrategyResponse {
            operation_sampling: Some(strategies),
            ..Default::default()
        };
        let sampler = sampler_with(vec![Ok(response.clone()), Ok(response)], metrics);

        sampler.poll_once();
        let status = sampler.sample("get-user", TraceId::from_u64(1));
        assert_eq!(
            status.tags,
            vec![
                ("sampler.type", TagValue::String("probabilistic".to_string())),
                ("sampler.param", TagValue::F64(0.8)),
            ]
        );
        assert_eq!(
            factory.counter_value("jaeger_tracer_sampler", &[("state", "updated")]),
            1
        );

        // the identical strategy set changes nothing
        sampler.poll_once();
        assert_eq!(
            factory.counter_value("jaeger_tracer_sampler", &[("state", "updated")]),
            1
        );
        sampler.close();
    }

    #[test]
    fn close_stops_the_poller_and_is_idempotent() {
        let factory = InMemoryMetricsFactory::new();
        let sampler = sampler_with(vec![], Arc::new(Metrics::new(&factory)));
        sampler.close();
        sampler.close();
    }
}
