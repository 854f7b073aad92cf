//! Hybrid Client
//!
//! The owning facade over the resilience layer. One `HybridClient` is
//! constructed at application start and handed by reference to callers;
//! it wires the health monitor, rollout controller, request router,
//! offline queue, and connectivity observer together, so tests can stand
//! up fully isolated instances.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use budgetbuddy_core::{
//!     config::load_config,
//!     client::HybridClient,
//!     queue::store::FileStore,
//!     transport::ReqwestTransport,
//! };
//!
//! let config = load_config()?;
//! let client = HybridClient::new(
//!     config,
//!     Arc::new(ReqwestTransport::new()),
//!     Arc::new(FileStore::new(data_dir)),
//! )?;
//! client.start();
//!
//! let reply = client.chat("How did I do against my grocery budget?").await?;
//! ```

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::config::RouteConfig;
use crate::connectivity::{spawn_reconnect_drain, ConnectivityMonitor};
use crate::error::ClientError;
use crate::health::{BackendHealthStatus, HealthMonitor};
use crate::queue::store::BlobStore;
use crate::queue::{DrainReport, OfflineQueue, OperationKind};
use crate::routing::rollout::{RandomSource, RolloutController, ThreadRngSource};
use crate::routing::router::{RequestOptions, RequestRouter, RequestSource, ServiceResponse};
use crate::routing::selector::RouteSelector;
use crate::session::{AuthTokens, Credentials};
use crate::transport::HttpTransport;

/// Result of a mutating call
#[derive(Debug)]
pub enum MutationOutcome {
    /// The mutation completed against a live path
    Completed(ServiceResponse),
    /// The mutation was queued for replay; carries the operation id
    Queued(String),
}

impl MutationOutcome {
    /// Whether the mutation ended up in the offline queue
    #[must_use]
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued(_))
    }
}

/// Owning facade over the resilience layer
pub struct HybridClient {
    config: Arc<RwLock<RouteConfig>>,
    health: Arc<HealthMonitor>,
    router: Arc<RequestRouter>,
    queue: Arc<OfflineQueue>,
    connectivity: Arc<ConnectivityMonitor>,
    drain_task: Mutex<Option<JoinHandle<()>>>,
}

impl HybridClient {
    /// Build a client over the given transport and blob store
    ///
    /// # Errors
    ///
    /// Fails fast with [`ClientError::Configuration`] when the config is
    /// invalid, rather than surfacing the problem per request.
    pub fn new(
        config: RouteConfig,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn BlobStore>,
    ) -> Result<Self, ClientError> {
        Self::with_random_source(config, transport, store, Arc::new(ThreadRngSource))
    }

    /// Build a client with an injected rollout random source
    ///
    /// # Errors
    ///
    /// Same contract as [`HybridClient::new`].
    pub fn with_random_source(
        config: RouteConfig,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn BlobStore>,
        random: Arc<dyn RandomSource>,
    ) -> Result<Self, ClientError> {
        config.validate()?;

        let config = Arc::new(RwLock::new(config));
        let health = Arc::new(HealthMonitor::new(
            Arc::clone(&config),
            Arc::clone(&transport),
        ));
        let selector = RouteSelector::new(Arc::clone(&config), Arc::clone(&health));
        let rollout = RolloutController::with_random_source(Arc::clone(&config), selector, random);
        let router = Arc::new(RequestRouter::new(
            Arc::clone(&config),
            rollout,
            transport,
        ));
        let queue = Arc::new(OfflineQueue::load(store));
        let connectivity = Arc::new(ConnectivityMonitor::new(true));

        Ok(Self {
            config,
            health,
            router,
            queue,
            connectivity,
            drain_task: Mutex::new(None),
        })
    }

    /// Start background work: periodic health probing and the
    /// reconnect-drain trigger
    pub fn start(&self) {
        let interval = self.config.read().health_check_interval();
        self.health.start(interval);

        let handle = spawn_reconnect_drain(
            &self.connectivity,
            Arc::clone(&self.queue),
            Arc::clone(&self.router),
        );
        *self.drain_task.lock() = Some(handle);

        tracing::info!("Hybrid client started");
    }

    /// Stop background work
    pub fn shutdown(&self) {
        self.health.stop();
        if let Some(handle) = self.drain_task.lock().take() {
            handle.abort();
        }
        tracing::info!("Hybrid client shut down");
    }

    // ------------------------------------------------------------------
    // Outward calls
    // ------------------------------------------------------------------

    /// Send a chat message to the AI service
    ///
    /// # Errors
    ///
    /// Propagates routing errors per the request router's contract.
    pub async fn chat(&self, message: &str) -> Result<ServiceResponse, ClientError> {
        self.router
            .request("ai", "chat", RequestOptions::post(json!({ "message": message })))
            .await
    }

    /// Request spending insights from the AI service
    ///
    /// # Errors
    ///
    /// Propagates routing errors per the request router's contract.
    pub async fn get_insights(&self, payload: Value) -> Result<ServiceResponse, ClientError> {
        self.router
            .request("ai", "insights", RequestOptions::post(payload))
            .await
    }

    /// Request budgeting recommendations from the AI service
    ///
    /// # Errors
    ///
    /// Propagates routing errors per the request router's contract.
    pub async fn get_recommendations(
        &self,
        payload: Value,
    ) -> Result<ServiceResponse, ClientError> {
        self.router
            .request("ai", "recommendations", RequestOptions::post(payload))
            .await
    }

    /// Log in and store the session tokens
    ///
    /// # Errors
    ///
    /// Routing errors per the router's contract, or a serving-path error
    /// when the response carries no usable token set.
    pub async fn login(&self, credentials: &Credentials) -> Result<AuthTokens, ClientError> {
        let response = self
            .router
            .request("auth", "login", RequestOptions::post(credentials.login_body()))
            .await?;
        self.adopt_session(response)
    }

    /// Register a new account and store the session tokens
    ///
    /// # Errors
    ///
    /// Same contract as [`HybridClient::login`].
    pub async fn register(&self, credentials: &Credentials) -> Result<AuthTokens, ClientError> {
        let response = self
            .router
            .request(
                "auth",
                "register",
                RequestOptions::post(credentials.register_body()),
            )
            .await?;
        self.adopt_session(response)
    }

    /// End the session: best-effort remote revoke, then clear local tokens
    ///
    /// The local token set is cleared even when the remote call fails.
    pub async fn logout(&self) {
        if self.router.tokens().is_some() {
            if let Err(e) = self
                .router
                .request("auth", "logout", RequestOptions::post(json!({})))
                .await
            {
                tracing::debug!(error = %e, "Remote logout failed, clearing session anyway");
            }
        }
        self.router.clear_tokens();
        tracing::info!("Session cleared");
    }

    /// Probe the backend immediately and return the fresh snapshot
    pub async fn health_check(&self) -> BackendHealthStatus {
        self.health.probe_now().await
    }

    /// Perform a mutating call, queueing it for replay when it cannot
    /// complete (offline, or both paths failed)
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::QueuePersistence`] when the operation could
    /// not be durably queued; in that case it is not safe to assume the
    /// mutation will ever happen.
    pub async fn mutate(
        &self,
        kind: OperationKind,
        resource: &str,
        payload: Value,
    ) -> Result<MutationOutcome, ClientError> {
        if !self.connectivity.is_online() {
            let id = self.queue.enqueue(kind, resource, payload)?;
            return Ok(MutationOutcome::Queued(id));
        }

        match self
            .router
            .request(resource, "", kind.request_options(payload.clone()))
            .await
        {
            Ok(response) => Ok(MutationOutcome::Completed(response)),
            Err(e) => {
                tracing::warn!(error = %e, resource, %kind, "Mutation failed, queueing for replay");
                let id = self.queue.enqueue(kind, resource, payload)?;
                Ok(MutationOutcome::Queued(id))
            }
        }
    }

    /// Drain the offline queue now (the explicit trigger)
    pub async fn drain_queue(&self) -> DrainReport {
        self.queue.drain(&self.router).await
    }

    // ------------------------------------------------------------------
    // State management
    // ------------------------------------------------------------------

    /// Report a network-state change from the platform shell
    pub fn set_online(&self, online: bool) {
        self.connectivity.set_online(online);
    }

    /// Apply a configuration update (the single config writer)
    ///
    /// The update is validated against a copy first; an invalid update
    /// leaves the running configuration untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] when the updated config does
    /// not validate.
    pub fn update_config(
        &self,
        update: impl FnOnce(&mut RouteConfig),
    ) -> Result<(), ClientError> {
        let mut config = self.config.write();
        let mut candidate = config.clone();
        update(&mut candidate);
        candidate.validate()?;

        self.router.sync_providers(&candidate.providers);
        *config = candidate;
        tracing::info!(mode = %config.mode, rollout = config.rollout_percent, "Routing configuration updated");
        Ok(())
    }

    /// Snapshot of the current configuration
    #[must_use]
    pub fn config_snapshot(&self) -> RouteConfig {
        self.config.read().clone()
    }

    /// The request router (for advanced callers and replay plumbing)
    #[must_use]
    pub fn router(&self) -> Arc<RequestRouter> {
        Arc::clone(&self.router)
    }

    /// The offline queue
    #[must_use]
    pub fn queue(&self) -> Arc<OfflineQueue> {
        Arc::clone(&self.queue)
    }

    /// The health monitor
    #[must_use]
    pub fn health_monitor(&self) -> Arc<HealthMonitor> {
        Arc::clone(&self.health)
    }

    fn adopt_session(&self, response: ServiceResponse) -> Result<AuthTokens, ClientError> {
        let Some(tokens) = AuthTokens::from_response(&response.body) else {
            // A 2xx without a token set is an unusable answer from
            // whichever path served it.
            return Err(match response.source {
                RequestSource::Backend => ClientError::BackendUnavailable {
                    url: "auth".to_string(),
                    status: response.status,
                    detail: "auth response carried no access token".to_string(),
                },
                RequestSource::Direct => ClientError::DirectProvider {
                    service: "auth".to_string(),
                    status: response.status,
                    detail: "auth response carried no access token".to_string(),
                },
            });
        };

        self.router.set_tokens(tokens.clone());
        tracing::info!(source = %response.source, "Session established");
        Ok(tokens)
    }
}

impl Drop for HybridClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for HybridClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridClient")
            .field("config", &*self.config.read())
            .field("queued", &self.queue.len())
            .field("online", &self.connectivity.is_online())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
