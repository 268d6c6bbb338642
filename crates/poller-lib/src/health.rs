//! Health check infrastructure for the IPMI poller
//!
//! Tracks the scheduler, the metrics sink and every monitored host. A host
//! whose polls fail is degraded, never unhealthy on its own account, so one
//! dead BMC does not fail the liveness probe of the whole poller.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Ordered from best to worst, so the overall status is the maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still polling, with failures reported in the message
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub mod components {
    pub const SCHEDULER: &str = "scheduler";
    pub const METRICS_SINK: &str = "metrics_sink";

    /// Component tracking the polls of one host
    pub fn host(host: &str) -> String {
        format!("host:{}", host)
    }
}

#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a component as healthy
    pub async fn register(&self, name: &str) {
        self.set_healthy(name).await;
    }

    pub async fn set_healthy(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Unhealthy, Some(message.into()))
            .await;
    }

    async fn set(&self, name: &str, status: ComponentStatus, message: Option<String>) {
        self.components
            .write()
            .await
            .insert(name.to_string(), ComponentHealth::new(status, message));
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn component(&self, name: &str) -> Option<ComponentHealth> {
        self.components.read().await.get(name).cloned()
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = components
            .values()
            .map(|health| health.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);

        HealthResponse { status, components }
    }

    /// Ready once polling is scheduled and for as long as the scheduler runs;
    /// host failures never affect readiness
    pub async fn readiness(&self) -> ReadinessResponse {
        let reason = if !*self.ready.read().await {
            Some("Poller not yet scheduling")
        } else if self
            .component(components::SCHEDULER)
            .await
            .is_some_and(|h| h.status == ComponentStatus::Unhealthy)
        {
            Some("Scheduler stopped")
        } else {
            None
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason: reason.map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_registry_is_healthy_but_not_ready() {
        let registry = HealthRegistry::new();

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("Poller not yet scheduling"));
    }

    #[tokio::test]
    async fn test_degraded_host_degrades_overall_status() {
        let registry = HealthRegistry::new();
        registry.register(components::SCHEDULER).await;
        registry.register(&components::host("bmc-1")).await;

        registry
            .set_degraded(&components::host("bmc-1"), "Collection aborted")
            .await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(
            health.components["host:bmc-1"].message.as_deref(),
            Some("Collection aborted")
        );
        assert_eq!(
            health.components[components::SCHEDULER].status,
            ComponentStatus::Healthy
        );
    }

    #[tokio::test]
    async fn test_unhealthy_host_keeps_poller_ready() {
        let registry = HealthRegistry::new();
        registry.register(components::SCHEDULER).await;
        registry
            .set_unhealthy(&components::host("bmc-2"), "poll pass panicked")
            .await;
        registry.set_ready(true).await;

        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_stopped_scheduler_is_not_ready() {
        let registry = HealthRegistry::new();
        registry.register(components::SCHEDULER).await;
        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);

        registry
            .set_unhealthy(components::SCHEDULER, "poll scheduler stopped")
            .await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("Scheduler stopped"));
    }
}
