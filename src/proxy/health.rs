//! Health checking for proxy units
//!
//! A unit is working iff a GET for the test URL, sent through the unit's listen port as
//! an HTTP proxy, answers exactly 200 within the timeout. Every failure cause counts the
//! same.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use tracing::{debug, instrument, warn};

use crate::error::Result;

pub const DEFAULT_TEST_URL: &str = "http://icanhazip.com";

/// Health checker configuration
#[derive(Debug, Clone)]
pub struct HealthCheckerConfig {
    /// URL fetched through each unit
    pub test_url: String,
    /// Bound on connecting to the unit and on each read from it
    pub timeout: Duration,
    /// Verify TLS certificates when the test URL is https
    pub verify_tls: bool,
}

impl Default for HealthCheckerConfig {
    fn default() -> Self {
        Self {
            test_url: DEFAULT_TEST_URL.to_string(),
            timeout: Duration::from_secs(20),
            verify_tls: true,
        }
    }
}

/// Decides whether the endpoint on a local port is serving traffic
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn is_working(&self, port: u16) -> bool;
}

/// Probe that fetches the test URL through the unit
#[derive(Debug, Clone, Default)]
pub struct HttpHealthProbe {
    config: HealthCheckerConfig,
}

impl HttpHealthProbe {
    pub fn new(config: HealthCheckerConfig) -> Self {
        Self { config }
    }

    /// Fetch the test URL through `127.0.0.1:port` and return the status
    pub async fn fetch_status(&self, port: u16) -> Result<StatusCode> {
        let proxy = reqwest::Proxy::all(format!("http://127.0.0.1:{}", port))?;
        let client = reqwest::Client::builder()
            .no_proxy()
            .proxy(proxy)
            .connect_timeout(self.config.timeout)
            .read_timeout(self.config.timeout)
            .redirect(Policy::none())
            .danger_accept_invalid_certs(!self.config.verify_tls)
            .build()?;

        let response = client.get(&self.config.test_url).send().await?;
        Ok(response.status())
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    #[instrument(skip(self))]
    async fn is_working(&self, port: u16) -> bool {
        match self.fetch_status(port).await {
            Ok(status) if status == StatusCode::OK => {
                debug!("proxy on port {} is healthy", port);
                true
            }
            Ok(status) => {
                warn!("proxy on port {} is unhealthy: status {}", port, status);
                false
            }
            Err(e) => {
                warn!("proxy on port {} is unhealthy: {}", port, e);
                false
            }
        }
    }
}
