//! Active reachability probes

use async_trait::async_trait;
use std::time::Duration;

use crate::error::ProbeError;

/// A lightweight request against one endpoint
///
/// Any response at all counts as success: the question is whether the
/// network is reachable, not whether the endpoint is healthy.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, endpoint: &str) -> Result<(), ProbeError>;
}

/// HEAD-request probe using a blocking HTTP agent on tokio's blocking pool
pub struct HttpProbe {
    agent: ureq::Agent,
    timeout: Duration,
}

impl HttpProbe {
    /// Create a probe whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        Self {
            agent: config.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, endpoint: &str) -> Result<(), ProbeError> {
        let agent = self.agent.clone();
        let url = endpoint.to_string();

        let result = tokio::task::spawn_blocking(move || agent.head(&url).call())
            .await
            .map_err(|e| ProbeError::Request {
                message: format!("Probe task failed: {}", e),
            })?;

        match result {
            Ok(_) => Ok(()),
            Err(ureq::Error::Timeout(_)) => Err(ProbeError::Timeout {
                millis: self.timeout.as_millis() as u64,
            }),
            Err(e) => Err(ProbeError::Request {
                message: e.to_string(),
            }),
        }
    }
}
