//! Health check module
//! Reports the status of the payment store and the configured gateways

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info};

use crate::database::repository::PaymentStore;
use crate::payments::factory::GatewayRegistry;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

#[derive(Clone)]
pub struct HealthChecker {
    store: Arc<dyn PaymentStore>,
    gateways: Arc<GatewayRegistry>,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn PaymentStore>, gateways: Arc<GatewayRegistry>) -> Self {
        Self { store, gateways }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();
        let mut overall_healthy = true;

        match timeout(Duration::from_secs(5), check_store_health(self.store.as_ref())).await {
            Ok(Ok(response_time)) => {
                health_status
                    .checks
                    .insert("database".to_string(), ComponentHealth::up(Some(response_time)));
                info!("Payment store health check: OK ({}ms)", response_time);
            }
            Ok(Err(e)) => {
                overall_healthy = false;
                health_status
                    .checks
                    .insert("database".to_string(), ComponentHealth::down(Some(e)));
                error!("Payment store health check failed");
            }
            Err(_) => {
                overall_healthy = false;
                health_status.checks.insert(
                    "database".to_string(),
                    ComponentHealth::down(Some("Timeout".to_string())),
                );
                error!("Payment store health check timed out");
            }
        }

        // Gateways are configuration, not a live probe.
        let enabled = self.gateways.enabled();
        let gateways_health = if enabled.is_empty() {
            ComponentHealth::warning(None, Some("no payment gateway configured".to_string()))
        } else {
            let names: Vec<String> = enabled.iter().map(|g| g.name().to_string()).collect();
            ComponentHealth {
                status: ComponentState::Up,
                response_time_ms: None,
                details: Some(names.join(",")),
            }
        };
        let degraded = gateways_health.status == ComponentState::Warning;
        health_status
            .checks
            .insert("gateways".to_string(), gateways_health);

        health_status.status = if !overall_healthy {
            HealthState::Unhealthy
        } else if degraded {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        health_status
    }
}

pub async fn check_store_health(store: &dyn PaymentStore) -> Result<u128, String> {
    let start = Instant::now();
    store
        .ping()
        .await
        .map(|_| start.elapsed().as_millis())
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory_store::InMemoryPaymentStore;

    #[tokio::test]
    async fn test_health_status_creation() {
        let health_status = HealthStatus::new();
        assert!(matches!(health_status.status, HealthState::Healthy));
        assert!(health_status.checks.is_empty());
        assert!(health_status.timestamp <= chrono::Utc::now());
    }

    #[test]
    fn test_component_health_states() {
        let up_health = ComponentHealth::up(Some(100));
        assert!(matches!(up_health.status, ComponentState::Up));
        assert_eq!(up_health.response_time_ms, Some(100));

        let down_health = ComponentHealth::down(Some("Test error".to_string()));
        assert!(matches!(down_health.status, ComponentState::Down));
        assert_eq!(down_health.details, Some("Test error".to_string()));

        let warning_health = ComponentHealth::warning(Some(500), Some("Slow response".to_string()));
        assert!(matches!(warning_health.status, ComponentState::Warning));
        assert_eq!(warning_health.response_time_ms, Some(500));
    }

    #[tokio::test]
    async fn no_gateways_reports_degraded() {
        let checker = HealthChecker::new(
            Arc::new(InMemoryPaymentStore::new()),
            Arc::new(GatewayRegistry::new()),
        );
        let status = checker.check_health().await;
        assert_eq!(status.status, HealthState::Degraded);
        assert!(matches!(
            status.checks["database"].status,
            ComponentState::Up
        ));
    }
}
