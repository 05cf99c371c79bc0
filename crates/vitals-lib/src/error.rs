//! Error types shared across the agent
//!
//! Errors fall into three groups with very different handling:
//! - [`ConfigError`] is fatal and only produced at startup
//! - [`FetchError`] is per poll; the target simply yields no point this cycle
//! - [`WriteError`] arrives asynchronously on the sink's error stream

use std::path::PathBuf;
use thiserror::Error;

/// Startup configuration failure
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read servers file {path:?}: {source}")]
    ReadServers {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed servers list: {0}")]
    ParseServers(#[source] serde_json::Error),

    #[error("invalid store url {url:?}: {reason}")]
    InvalidStoreUrl { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failure of a single poll against one target
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Network(String),

    #[error("failed to read response body: {0}")]
    BodyRead(String),

    #[error("failed to decode vitals document: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("incompatible document version {0}, need at least 0.2")]
    IncompatibleVersion(f64),

    #[error("unexpected document title {0:?}, expected \"vitals-glimpse\"")]
    UnexpectedTitle(String),
}

impl FetchError {
    /// Stable label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Network(_) => "network",
            FetchError::BodyRead(_) => "body_read",
            FetchError::Decode(_) => "decode",
            FetchError::IncompatibleVersion(_) => "incompatible_version",
            FetchError::UnexpectedTitle(_) => "unexpected_title",
        }
    }
}

/// Asynchronous store write failure
#[derive(Debug, Clone, Error)]
pub enum WriteError {
    #[error("store unreachable: {0}")]
    Unreachable(String),

    #[error("store rejected write with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("write queue full, dropped point for server {server:?}")]
    QueueFull { server: String },

    #[error("sink closed, dropped point for server {server:?}")]
    Closed { server: String },
}

impl WriteError {
    /// Stable label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            WriteError::Unreachable(_) => "unreachable",
            WriteError::Rejected { .. } => "rejected",
            WriteError::QueueFull { .. } => "queue_full",
            WriteError::Closed { .. } => "closed",
        }
    }
}
