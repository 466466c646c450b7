//! Strategy retrieval over the agent's HTTP endpoint.

use super::strategies::SamplingStrategyResponse;
use crate::errors::SamplingStrategyError;
use std::time::Duration;

const DEFAULT_HOST_PORT: &str = "localhost:5778";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Capability for fetching the sampling strategy of a service.
pub trait SamplingManager: Send + Sync {
    /// Fetch the current strategy for `service_name`.
    fn sampling_strategy(
        &self,
        service_name: &str,
    ) -> Result<SamplingStrategyResponse, SamplingStrategyError>;
}

/// Queries the agent's HTTP sampling endpoint,
/// `http://<host:port>/?service=<name>`.
#[derive(Debug)]
pub struct HttpSamplingManager {
    host_port: String,
    client: reqwest::blocking::Client,
}

impl HttpSamplingManager {
    /// Create a manager querying `host_port` (`"host:port"`).
    pub fn new(host_port: impl Into<String>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        HttpSamplingManager {
            host_port: host_port.into(),
            client,
        }
    }

    fn strategy_url(&self, service_name: &str) -> Result<url::Url, SamplingStrategyError> {
        let mut endpoint = url::Url::parse(&format!("http://{}/", self.host_port))
            .map_err(|err| SamplingStrategyError::Query(Box::new(err)))?;
        endpoint
            .query_pairs_mut()
            .append_pair("service", service_name);
        Ok(endpoint)
    }
}

impl Default for HttpSamplingManager {
    fn default() -> Self {
        HttpSamplingManager::new(DEFAULT_HOST_PORT)
    }
}

impl SamplingManager for HttpSamplingManager {
    fn sampling_strategy(
        &self,
        service_name: &str,
    ) -> Result<SamplingStrategyResponse, SamplingStrategyError> {
        let endpoint = self.strategy_url(service_name)?;
        let response = self
            .client
            .get(endpoint.as_str())
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|err| SamplingStrategyError::Query(Box::new(err)))?;
        let body = response
            .text()
            .map_err(|err| SamplingStrategyError::Query(Box::new(err)))?;
        Ok(serde_json::from_str(&body)?)
    }
}
