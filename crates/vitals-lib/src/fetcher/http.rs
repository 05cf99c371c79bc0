//! HTTP fetcher backed by reqwest

use super::{point_from_body, VitalsFetcher};
use crate::error::{ConfigError, FetchError};
use crate::models::{MetricPoint, ServerTarget};
use async_trait::async_trait;
use reqwest::Client;
use std::error::Error as StdError;
use std::time::Duration;
use tracing::debug;

/// Default timeout for a whole request, body included
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the HTTP fetcher
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Upper bound on one poll, from connect to end of body
    pub timeout: Duration,
    /// User agent sent to vitals endpoints
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_FETCH_TIMEOUT,
            user_agent: concat!("vitals-agent/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Fetches vitals documents over HTTP
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    config: FetcherConfig,
}

impl HttpFetcher {
    /// Create a fetcher with its own connection pool
    pub fn new(config: FetcherConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(ConfigError::HttpClient)?;

        Ok(Self { client, config })
    }

    /// Get the request timeout
    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }
}

#[async_trait]
impl VitalsFetcher for HttpFetcher {
    async fn fetch(&self, target: &ServerTarget) -> Result<MetricPoint, FetchError> {
        let response = self
            .client
            .get(&target.url)
            .send()
            .await
            .map_err(|e| FetchError::Network(error_chain(&e)))?;

        // Status is not checked, any body is decoded
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::BodyRead(error_chain(&e)))?;

        debug!(
            server = %target.name,
            status = status.as_u16(),
            bytes = body.len(),
            "Received vitals response"
        );

        point_from_body(target, &body)
    }
}

/// Flatten an error and its sources into one line
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.contains(&cause_text) {
            message.push_str(": ");
            message.push_str(&cause_text);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Outer(std::io::Error);

    impl std::fmt::Display for Outer {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "error sending request")
        }
    }

    impl StdError for Outer {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_error_chain_includes_sources() {
        let err = Outer(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert_eq!(error_chain(&err), "error sending request: connection refused");
    }

    #[test]
    fn test_fetcher_config_default() {
        let config = FetcherConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.user_agent.starts_with("vitals-agent/"));
    }
}
