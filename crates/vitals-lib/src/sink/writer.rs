//! Store writers
//!
//! [`InfluxWriter`] posts line protocol batches to the InfluxDB v2 write API.

use super::line_protocol::encode_batch;
use crate::error::{ConfigError, WriteError};
use crate::models::MetricPoint;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Longest store error body kept in a [`WriteError::Rejected`]
const MAX_ERROR_BODY: usize = 512;

/// Connection details for the time-series store
#[derive(Clone)]
pub struct StoreConfig {
    /// Base URL of the store, e.g. `http://influxdb:8086`
    pub url: String,
    pub org: String,
    pub bucket: String,
    /// API token sent as `Authorization: Token <token>`
    pub token: String,
    /// Timeout for a single write request
    pub request_timeout: Duration,
}

impl StoreConfig {
    pub fn new(
        url: impl Into<String>,
        org: impl Into<String>,
        bucket: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            org: org.into(),
            bucket: bucket.into(),
            token: token.into(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("url", &self.url)
            .field("org", &self.org)
            .field("bucket", &self.bucket)
            .field("token", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Destination for batches of points
#[async_trait]
pub trait StoreWriter: Send + Sync {
    /// Write a batch, all or nothing
    async fn write_batch(&self, points: &[MetricPoint]) -> Result<(), WriteError>;
}

/// Writer for the InfluxDB v2 HTTP write API
pub struct InfluxWriter {
    client: Client,
    endpoint: Url,
    auth_header: String,
}

impl InfluxWriter {
    /// Create a writer for the given store
    pub fn new(config: &StoreConfig) -> Result<Self, ConfigError> {
        let endpoint = write_endpoint(config)?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(ConfigError::HttpClient)?;

        Ok(Self {
            client,
            endpoint,
            auth_header: format!("Token {}", config.token),
        })
    }

    /// Get the fully resolved write URL
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl StoreWriter for InfluxWriter {
    async fn write_batch(&self, points: &[MetricPoint]) -> Result<(), WriteError> {
        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(AUTHORIZATION, &self.auth_header)
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(encode_batch(points))
            .send()
            .await
            .map_err(|e| WriteError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(points = points.len(), status = status.as_u16(), "Batch accepted by store");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(WriteError::Rejected {
            status: status.as_u16(),
            body: error_message(&body),
        })
    }
}

/// Whether a failed write is worth another attempt
pub fn is_retryable(err: &WriteError) -> bool {
    match err {
        WriteError::Unreachable(_) => true,
        WriteError::Rejected { status, .. } => {
            *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
        }
        WriteError::QueueFull { .. } | WriteError::Closed { .. } => false,
    }
}

#[derive(Deserialize)]
struct StoreErrorBody {
    message: String,
}

/// Prefer the `message` of an InfluxDB JSON error, else the raw body
fn error_message(body: &str) -> String {
    let message = serde_json::from_str::<StoreErrorBody>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| body.trim().to_string());

    if message.len() <= MAX_ERROR_BODY {
        return message;
    }
    let mut end = MAX_ERROR_BODY;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &message[..end])
}

fn write_endpoint(config: &StoreConfig) -> Result<Url, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidStoreUrl {
        url: config.url.clone(),
        reason: reason.to_string(),
    };

    let mut url = Url::parse(&config.url).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }

    url.path_segments_mut()
        .map_err(|_| invalid("url cannot be a base"))?
        .pop_if_empty()
        .extend(["api", "v2", "write"]);
    url.query_pairs_mut()
        .append_pair("org", &config.org)
        .append_pair("bucket", &config.bucket)
        .append_pair("precision", "ns");

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_endpoint() {
        let config = StoreConfig::new("http://influxdb:8086", "acme", "servers", "secret");
        let url = write_endpoint(&config).unwrap();
        assert_eq!(
            url.as_str(),
            "http://influxdb:8086/api/v2/write?org=acme&bucket=servers&precision=ns"
        );
    }

    #[test]
    fn test_write_endpoint_keeps_base_path() {
        let config = StoreConfig::new("https://metrics.example.com/influx/", "my org", "b", "t");
        let url = write_endpoint(&config).unwrap();
        assert_eq!(url.path(), "/influx/api/v2/write");
        assert_eq!(url.query(), Some("org=my+org&bucket=b&precision=ns"));
    }

    #[test]
    fn test_write_endpoint_rejects_bad_urls() {
        for bad in ["influxdb:8086", "ftp://influxdb", "not a url"] {
            let config = StoreConfig::new(bad, "o", "b", "t");
            assert!(
                matches!(write_endpoint(&config), Err(ConfigError::InvalidStoreUrl { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = StoreConfig::new("http://influxdb:8086", "acme", "servers", "secret");
        let printed = format!("{config:?}");
        assert!(!printed.contains("secret"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn test_error_message_extracts_influx_message() {
        let body = r#"{"code":"unauthorized","message":"unauthorized access"}"#;
        assert_eq!(error_message(body), "unauthorized access");
        assert_eq!(error_message(" plain failure \n"), "plain failure");
    }

    #[test]
    fn test_error_message_truncates() {
        let long = "x".repeat(2000);
        let message = error_message(&long);
        assert_eq!(message.len(), MAX_ERROR_BODY + 3);
        assert!(message.ends_with("..."));
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(&WriteError::Unreachable("refused".into())));
        assert!(is_retryable(&WriteError::Rejected { status: 503, body: String::new() }));
        assert!(is_retryable(&WriteError::Rejected { status: 429, body: String::new() }));
        assert!(!is_retryable(&WriteError::Rejected { status: 401, body: String::new() }));
        assert!(!is_retryable(&WriteError::Rejected { status: 400, body: String::new() }));
    }
}
