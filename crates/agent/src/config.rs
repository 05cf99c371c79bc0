//! Agent configuration

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use vitals_lib::scheduler::OverlapPolicy;
use vitals_lib::sink::StoreConfig;

const DEFAULT_SERVERS_FILE: &str = "data/servers.json";
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Longest supported polling interval, one year
const MAX_POLLING_INTERVAL_MINUTES: u64 = 365 * 24 * 60;

/// Environment variables as read, before validation
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    org: Option<String>,
    bucket: Option<String>,
    token: Option<String>,
    store_url: Option<String>,
    polling_interval_minutes: Option<String>,
    servers_file: Option<String>,
    fetch_timeout_secs: Option<String>,
    api_port: Option<String>,
    overlap_policy: Option<String>,
}

/// Agent configuration
#[derive(Clone)]
pub struct AgentConfig {
    /// InfluxDB organization
    pub org: String,
    /// InfluxDB bucket
    pub bucket: String,
    /// InfluxDB API token
    pub token: String,
    /// Base URL of the InfluxDB server
    pub store_url: String,
    pub polling_interval_minutes: u64,

    /// JSON file listing the servers to poll
    pub servers_file: PathBuf,
    pub fetch_timeout_secs: u64,

    /// Port for health/metrics; the API is off when unset
    pub api_port: Option<u16>,
    pub overlap_policy: OverlapPolicy,
}

impl AgentConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        Self::from_environment(config::Environment::default())
    }

    fn from_environment(environment: config::Environment) -> Result<Self> {
        let raw: RawConfig = config::Config::builder()
            .add_source(environment)
            .build()
            .context("Failed to read environment")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        raw.validate()
    }

    /// Time between polling ticks
    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_minutes * 60)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Connection settings for the store
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new(&self.store_url, &self.org, &self.bucket, &self.token)
    }
}

impl fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentConfig")
            .field("org", &self.org)
            .field("bucket", &self.bucket)
            .field("token", &"<redacted>")
            .field("store_url", &self.store_url)
            .field("polling_interval_minutes", &self.polling_interval_minutes)
            .field("servers_file", &self.servers_file)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("api_port", &self.api_port)
            .field("overlap_policy", &self.overlap_policy)
            .finish()
    }
}

impl RawConfig {
    fn validate(self) -> Result<AgentConfig> {
        let interval = required("POLLING_INTERVAL_MINUTES", self.polling_interval_minutes)?;
        let polling_interval_minutes = positive("POLLING_INTERVAL_MINUTES", interval)?;
        if polling_interval_minutes > MAX_POLLING_INTERVAL_MINUTES {
            bail!(
                "POLLING_INTERVAL_MINUTES must be at most {}, got {}",
                MAX_POLLING_INTERVAL_MINUTES,
                polling_interval_minutes
            );
        }

        let fetch_timeout_secs = match optional(self.fetch_timeout_secs) {
            Some(value) => positive("FETCH_TIMEOUT_SECS", value)?,
            None => DEFAULT_FETCH_TIMEOUT_SECS,
        };

        let api_port = match optional(self.api_port) {
            Some(value) => Some(
                value
                    .parse::<u16>()
                    .with_context(|| format!("API_PORT must be a port number, got {value:?}"))?,
            ),
            None => None,
        };

        let overlap_policy = match optional(self.overlap_policy) {
            Some(value) => value
                .parse::<OverlapPolicy>()
                .map_err(|e| anyhow::anyhow!("OVERLAP_POLICY: {e}"))?,
            None => OverlapPolicy::default(),
        };

        Ok(AgentConfig {
            org: required("ORG", self.org)?,
            bucket: required("BUCKET", self.bucket)?,
            token: required("TOKEN", self.token)?,
            store_url: required("STORE_URL", self.store_url)?,
            polling_interval_minutes,
            servers_file: optional(self.servers_file)
                .unwrap_or_else(|| DEFAULT_SERVERS_FILE.to_string())
                .into(),
            fetch_timeout_secs,
            api_port,
            overlap_policy,
        })
    }
}

fn required(name: &str, value: Option<String>) -> Result<String> {
    match optional(value) {
        Some(value) => Ok(value),
        None => bail!("{name} must be set and non-empty"),
    }
}

/// Treat empty and whitespace-only values as unset
fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn positive(name: &str, value: String) -> Result<u64> {
    match value.parse::<u64>() {
        Ok(0) => bail!("{name} must be greater than zero"),
        Ok(n) => Ok(n),
        Err(_) => bail!("{name} must be a positive integer, got {value:?}"),
    }
}
