//! Health of the agent's long-running parts
//!
//! The scheduler and the sink each carry a status. The overall status is the
//! worst of the two. The agent is ready while it is running and no part is
//! unhealthy.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// A part of the agent that reports health
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Component {
    /// The tick loop and the polls it dispatches
    Scheduler,
    /// The write path into the store
    Sink,
}

impl Component {
    pub const ALL: [Component; 2] = [Component::Scheduler, Component::Sink];

    pub fn name(self) -> &'static str {
        match self {
            Component::Scheduler => "scheduler",
            Component::Sink => "sink",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Health status of a component, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Some polls or writes fail but the agent keeps going
    Degraded,
    /// The component cannot do its job
    Unhealthy,
}

/// Current status of one component
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Unix time of the last status change
    pub since: i64,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            since: chrono::Utc::now().timestamp(),
        }
    }
}

/// Body of the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<&'static str, ComponentHealth>,
}

/// Body of the readiness endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug)]
struct HealthState {
    components: BTreeMap<Component, ComponentHealth>,
    running: bool,
}

/// Shared health state, cheap to clone
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    state: Arc<RwLock<HealthState>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    /// Every component starts healthy; the agent starts not running
    pub fn new() -> Self {
        let components = Component::ALL
            .iter()
            .map(|c| (*c, ComponentHealth::new(ComponentStatus::Healthy, None)))
            .collect();

        Self {
            state: Arc::new(RwLock::new(HealthState {
                components,
                running: false,
            })),
        }
    }

    pub async fn set_healthy(&self, component: Component) {
        self.transition(component, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, component: Component, message: impl Into<String>) {
        self.transition(component, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn set_unhealthy(&self, component: Component, message: impl Into<String>) {
        self.transition(component, ComponentStatus::Unhealthy, Some(message.into()))
            .await;
    }

    async fn transition(
        &self,
        component: Component,
        status: ComponentStatus,
        message: Option<String>,
    ) {
        let mut state = self.state.write().await;
        if let Some(current) = state.components.get_mut(&component) {
            if current.status == status {
                current.message = message;
                return;
            }
            if current.status < status {
                warn!(
                    component = %component,
                    from = ?current.status,
                    to = ?status,
                    message = message.as_deref().unwrap_or(""),
                    "Component health worsened"
                );
            } else if current.status > status {
                info!(
                    component = %component,
                    from = ?current.status,
                    to = ?status,
                    "Component health recovered"
                );
            }
        }

        state
            .components
            .insert(component, ComponentHealth::new(status, message));
    }

    /// Mark the agent as running or shutting down
    pub async fn set_running(&self, running: bool) {
        self.state.write().await.running = running;
    }

    pub async fn status(&self, component: Component) -> ComponentStatus {
        self.state
            .read()
            .await
            .components
            .get(&component)
            .map(|h| h.status)
            .unwrap_or(ComponentStatus::Healthy)
    }

    /// Snapshot of every component and the worst status among them
    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        let status = state
            .components
            .values()
            .map(|h| h.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);

        HealthResponse {
            status,
            components: state
                .components
                .iter()
                .map(|(c, h)| (c.name(), h.clone()))
                .collect(),
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        if !state.running {
            return ReadinessResponse {
                ready: false,
                reason: Some("agent not running".to_string()),
            };
        }

        let unhealthy = state
            .components
            .iter()
            .find(|(_, h)| h.status == ComponentStatus::Unhealthy);

        match unhealthy {
            Some((component, health)) => ReadinessResponse {
                ready: false,
                reason: Some(format!(
                    "{} unhealthy: {}",
                    component,
                    health.message.as_deref().unwrap_or("no details")
                )),
            },
            None => ReadinessResponse {
                ready: true,
                reason: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_components_start_healthy() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert_eq!(
            health.components.keys().copied().collect::<Vec<_>>(),
            vec!["scheduler", "sink"]
        );
    }

    #[tokio::test]
    async fn test_overall_status_is_worst_component() {
        let registry = HealthRegistry::new();

        registry.set_degraded(Component::Sink, "store rejected batch").await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(
            health.components["sink"].message.as_deref(),
            Some("store rejected batch")
        );

        registry
            .set_unhealthy(Component::Scheduler, "tick loop stopped")
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);

        registry.set_healthy(Component::Scheduler).await;
        registry.set_healthy(Component::Sink).await;
        assert_eq!(registry.health().await.status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_same_status_updates_message_only() {
        let registry = HealthRegistry::new();
        registry.set_degraded(Component::Sink, "first failure").await;
        let since = registry.health().await.components["sink"].since;

        registry.set_degraded(Component::Sink, "second failure").await;
        let health = registry.health().await;
        assert_eq!(health.components["sink"].since, since);
        assert_eq!(
            health.components["sink"].message.as_deref(),
            Some("second failure")
        );
        assert_eq!(registry.status(Component::Sink).await, ComponentStatus::Degraded);
    }

    #[tokio::test]
    async fn test_readiness_requires_running() {
        let registry = HealthRegistry::new();
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("agent not running"));

        registry.set_running(true).await;
        assert!(registry.readiness().await.ready);

        registry.set_running(false).await;
        assert!(!registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_readiness_names_unhealthy_component() {
        let registry = HealthRegistry::new();
        registry.set_running(true).await;
        registry.set_degraded(Component::Scheduler, "all polls failed").await;
        assert!(registry.readiness().await.ready);

        registry
            .set_unhealthy(Component::Sink, "3 consecutive batches failed")
            .await;
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(
            readiness.reason.as_deref(),
            Some("sink unhealthy: 3 consecutive batches failed")
        );
    }
}
