//! Backend Health Monitoring
//!
//! Periodic liveness probing of the backend proxy. The monitor keeps a
//! value snapshot of the last known health state that route decisions read
//! without blocking; probing runs on its own timer, independent of request
//! traffic.
//!
//! # Probe Semantics
//!
//! - Any 2xx from `GET {backend}/health` within the timeout marks the
//!   backend healthy and records latency and the reported version.
//! - Any other outcome (non-2xx, timeout, transport error) marks it
//!   unhealthy but leaves the previous latency/version untouched for
//!   diagnostics.
//! - A failed probe is never raised to the application; it only updates
//!   the snapshot.
//! - Probing continues regardless of prior outcomes at a fixed interval;
//!   there is no open-circuit state that stops it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use tokio::task::JoinHandle;

use crate::config::RouteConfig;
use crate::transport::{HttpMethod, HttpTransport, OutboundRequest};

// ============================================================================
// Health Status
// ============================================================================

/// Snapshot of the backend's last known health state
///
/// Created at startup with `is_healthy = false` (the derived default);
/// refreshed on each probe; never deleted, only overwritten.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BackendHealthStatus {
    /// Whether the last probe succeeded
    pub is_healthy: bool,
    /// When the last probe completed (`None` before the first probe)
    pub last_checked: Option<DateTime<Utc>>,
    /// Latency of the last successful probe, in milliseconds
    pub response_time_ms: Option<u64>,
    /// Backend version reported by the last successful probe
    pub version: Option<String>,
}

/// Body of the backend liveness endpoint, parsed leniently
#[derive(Debug, Default, Deserialize)]
struct HealthProbeBody {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    features: Option<Vec<String>>,
}

// ============================================================================
// Health Monitor
// ============================================================================

/// Periodic backend liveness prober
///
/// Owns the health snapshot read by route selection. `get_status` is a
/// non-blocking value read; the probe loop and `probe_now` are the only
/// writers.
pub struct HealthMonitor {
    config: Arc<RwLock<RouteConfig>>,
    transport: Arc<dyn HttpTransport>,
    status: RwLock<BackendHealthStatus>,
    probe_task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    /// Create a monitor with the initial (unhealthy) status
    pub fn new(config: Arc<RwLock<RouteConfig>>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            config,
            transport,
            status: RwLock::new(BackendHealthStatus::default()),
            probe_task: Mutex::new(None),
        }
    }

    /// Non-blocking read of the current health snapshot
    #[must_use]
    pub fn get_status(&self) -> BackendHealthStatus {
        self.status.read().clone()
    }

    /// Begin periodic probing at the given interval
    ///
    /// The first probe fires immediately. Calling `start` again replaces
    /// the running probe task.
    pub fn start(self: &Arc<Self>, interval: Duration) {
        self.stop();

        let monitor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                monitor.probe_now().await;
            }
        });

        *self.probe_task.lock() = Some(handle);
        tracing::debug!(interval_ms = interval.as_millis() as u64, "Health probing started");
    }

    /// Halt periodic probing
    pub fn stop(&self) {
        if let Some(handle) = self.probe_task.lock().take() {
            handle.abort();
            tracing::debug!("Health probing stopped");
        }
    }

    /// Whether the periodic probe task is running
    #[must_use]
    pub fn is_probing(&self) -> bool {
        self.probe_task.lock().is_some()
    }

    /// Perform one probe immediately and update the shared snapshot
    ///
    /// Never fails: every outcome, including transport errors, is folded
    /// into the returned status.
    pub async fn probe_now(&self) -> BackendHealthStatus {
        let (base_url, timeout) = {
            let config = self.config.read();
            (config.backend_base_url.clone(), config.request_timeout())
        };

        if base_url.is_empty() {
            tracing::debug!("No backend URL configured, marking unhealthy");
            return self.record_failure();
        }

        let url = format!("{}/health", base_url.trim_end_matches('/'));
        let request = OutboundRequest::new(HttpMethod::Get, &url, timeout);

        match self.transport.execute(request).await {
            Ok(response) if response.is_success() => {
                let body: HealthProbeBody =
                    serde_json::from_value(response.body.clone()).unwrap_or_default();
                if let Some(ref features) = body.features {
                    tracing::trace!(?features, "Backend reported feature set");
                }
                let latency_ms = response.latency.as_millis() as u64;

                let mut status = self.status.write();
                status.is_healthy = true;
                status.last_checked = Some(Utc::now());
                status.response_time_ms = Some(latency_ms);
                if body.version.is_some() {
                    status.version = body.version;
                }

                tracing::debug!(
                    latency_ms,
                    status = body.status.as_deref().unwrap_or("ok"),
                    "Backend probe succeeded"
                );
                status.clone()
            }
            Ok(response) => {
                tracing::warn!(status = response.status, url = %url, "Backend probe returned non-2xx");
                self.record_failure()
            }
            Err(e) => {
                tracing::warn!(error = %e, url = %url, "Backend probe failed");
                self.record_failure()
            }
        }
    }

    /// Mark the backend unhealthy, preserving prior latency/version fields
    fn record_failure(&self) -> BackendHealthStatus {
        let mut status = self.status.write();
        status.is_healthy = false;
        status.last_checked = Some(Utc::now());
        status.clone()
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("status", &self.get_status())
            .field("probing", &self.is_probing())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
