//! Route Selection
//!
//! The backend-or-direct decision table. This is deliberately not a state
//! machine: it holds no memory of past decisions, so it is safe to consult
//! on every request and flips as soon as the health snapshot does.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::{RouteConfig, RouteMode};
use crate::health::{BackendHealthStatus, HealthMonitor};

/// Decide whether a call for `service` should use the backend path
///
/// Decision table:
/// - `Direct` mode: never.
/// - `Backend` mode: iff the backend is healthy.
/// - `Auto` mode: never when unhealthy; otherwise the per-service flag,
///   defaulting to the backend for unlisted services.
#[must_use]
pub fn select_route(config: &RouteConfig, health: &BackendHealthStatus, service: &str) -> bool {
    match config.mode {
        RouteMode::Direct => false,
        RouteMode::Backend => health.is_healthy,
        RouteMode::Auto => {
            if !health.is_healthy {
                return false;
            }
            config
                .per_service_override
                .get(service)
                .copied()
                .unwrap_or(true)
        }
    }
}

/// Route selector bound to the live configuration and health monitor
#[derive(Clone)]
pub struct RouteSelector {
    config: Arc<RwLock<RouteConfig>>,
    monitor: Arc<HealthMonitor>,
}

impl RouteSelector {
    /// Create a selector over shared config and health state
    pub fn new(config: Arc<RwLock<RouteConfig>>, monitor: Arc<HealthMonitor>) -> Self {
        Self { config, monitor }
    }

    /// Evaluate the decision table against the current snapshots
    #[must_use]
    pub fn should_use_backend(&self, service: &str) -> bool {
        let health = self.monitor.get_status();
        let config = self.config.read();
        select_route(&config, &health, service)
    }
}

impl std::fmt::Debug for RouteSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteSelector").finish()
    }
}
