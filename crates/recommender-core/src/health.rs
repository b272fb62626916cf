//! Health tracking for the recommendation service
//!
//! Catalog and pricing collaborators report their state here; the service
//! exposes it through liveness and readiness probes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Failing, but a fallback keeps recommendations flowing
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        !matches!(self, ComponentStatus::Unhealthy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Failures reported since the last success
    pub consecutive_failures: u32,
    pub updated_at: i64,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>, consecutive_failures: u32) -> Self {
        Self {
            status,
            message,
            consecutive_failures,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across all components
    pub fn overall(components: &BTreeMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|c| c.status)
            .fold(ComponentStatus::Healthy, |acc, s| match (acc, s) {
                (ComponentStatus::Unhealthy, _) | (_, ComponentStatus::Unhealthy) => {
                    ComponentStatus::Unhealthy
                }
                (ComponentStatus::Degraded, _) | (_, ComponentStatus::Degraded) => {
                    ComponentStatus::Degraded
                }
                _ => ComponentStatus::Healthy,
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    /// Descriptive provider API backing the catalog registry
    pub const CATALOG: &str = "catalog";
    /// Time-series metrics backend for spot price averages
    pub const PRICING_METRICS: &str = "pricing_metrics";
    /// Provider spot-price-history API
    pub const PRICING_HISTORY: &str = "pricing_history";
}

/// Shared, cloneable view of collaborator health
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<BTreeMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, name: &str) {
        self.components.write().await.insert(
            name.to_string(),
            ComponentHealth::new(ComponentStatus::Healthy, None, 0),
        );
    }

    pub async fn set_healthy(&self, name: &str) {
        self.components.write().await.insert(
            name.to_string(),
            ComponentHealth::new(ComponentStatus::Healthy, None, 0),
        );
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.record_failure(name, ComponentStatus::Degraded, message.into())
            .await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.record_failure(name, ComponentStatus::Unhealthy, message.into())
            .await;
    }

    async fn record_failure(&self, name: &str, status: ComponentStatus, message: String) {
        let mut components = self.components.write().await;
        let failures = components
            .get(name)
            .map(|c| c.consecutive_failures)
            .unwrap_or(0)
            .saturating_add(1);
        components.insert(
            name.to_string(),
            ComponentHealth::new(status, Some(message), failures),
        );
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::overall(&components);
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        if !*self.ready.read().await {
            return ReadinessResponse {
                ready: false,
                reason: Some("Service not yet initialized".to_string()),
            };
        }

        match self.health().await.status {
            ComponentStatus::Unhealthy => ReadinessResponse {
                ready: false,
                reason: Some("Catalog or pricing collaborator unhealthy".to_string()),
            },
            _ => ReadinessResponse {
                ready: true,
                reason: None,
            },
        }
    }
}
