//! Library for the vitals polling agent
//!
//! This crate provides the core functionality for:
//! - Loading the static list of monitored servers
//! - Fetching and validating vitals-glimpse documents
//! - Writing metric points to an InfluxDB-compatible store
//! - Scheduling periodic polls across all servers
//! - Health checks and observability

pub mod error;
pub mod fetcher;
pub mod health;
pub mod models;
pub mod observability;
pub mod registry;
pub mod scheduler;
pub mod sink;

pub use error::{ConfigError, FetchError, WriteError};
pub use health::{
    Component, ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse,
    ReadinessResponse,
};
pub use models::*;
pub use observability::{AgentMetrics, StructuredLogger};
pub use registry::ServerRegistry;
