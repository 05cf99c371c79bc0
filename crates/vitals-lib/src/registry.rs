//! Static registry of monitored servers
//!
//! The registry is loaded once at startup from a JSON array of
//! `{"name": ..., "url": ...}` objects and never changes afterwards.
//! Duplicate names are kept as-is; each entry is polled independently.

use crate::error::ConfigError;
use crate::models::ServerTarget;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Read-only list of servers to poll
#[derive(Debug, Clone)]
pub struct ServerRegistry {
    targets: Arc<[ServerTarget]>,
}

impl ServerRegistry {
    /// Load the registry from a servers file on disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadServers {
            path: path.to_path_buf(),
            source,
        })?;

        let registry = Self::from_json(&content)?;
        info!(
            path = %path.display(),
            servers = registry.len(),
            "Loaded server registry"
        );
        Ok(registry)
    }

    /// Parse the registry from the servers file contents
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let targets: Vec<ServerTarget> =
            serde_json::from_str(content).map_err(ConfigError::ParseServers)?;
        Ok(Self::from_targets(targets))
    }

    /// Build a registry from an existing target list
    pub fn from_targets(targets: Vec<ServerTarget>) -> Self {
        if targets.is_empty() {
            warn!("Server registry is empty, nothing will be polled");
        }
        for target in &targets {
            debug!(server = %target.name, url = %target.url, "Registering server");
        }

        Self {
            targets: targets.into(),
        }
    }

    /// All registered targets, in file order
    pub fn targets(&self) -> &[ServerTarget] {
        &self.targets
    }

    /// Shared handle to the target list
    pub fn shared(&self) -> Arc<[ServerTarget]> {
        Arc::clone(&self.targets)
    }

    /// Get the number of registered servers
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
