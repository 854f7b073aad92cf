//! Budget Buddy Core - Client Resilience Layer
//!
//! This crate provides the request-resilience logic for the Budget Buddy
//! mobile app, completely independent of any UI framework: it decides, per
//! request, whether to call the app's backend proxy or an external provider
//! directly, health-checks the backend continuously, falls back
//! transparently on failure, supports percentage-based gradual rollout
//! between the two paths, and queues mutating operations made while offline
//! so they replay once connectivity returns.
//!
//! # Architecture
//!
//! ```text
//! +------------------------------------------------------------------+
//! |                         HybridClient                             |
//! |                                                                  |
//! |  chat / insights / auth / mutate                                 |
//! |        |                                                         |
//! |        v                                                         |
//! |  +------------------+     +----------------+                     |
//! |  | RolloutController| --> | RouteSelector  | <-- HealthMonitor   |
//! |  +--------+---------+     +----------------+     (probe loop)    |
//! |           |                                                      |
//! |           v                                                      |
//! |  +------------------+   backend path: {backend}/{service}/{path} |
//! |  |  RequestRouter   | ------------------------------------+      |
//! |  +--------+---------+   direct path:  {provider}/{path}   |      |
//! |           |                                               v      |
//! |           | failed mutations                         HTTP calls  |
//! |           v                                                      |
//! |  +------------------+     +---------------------+                |
//! |  |   OfflineQueue   | <-- | ConnectivityMonitor |                |
//! |  |  (durable FIFO)  |     |  (watch channel)    |                |
//! |  +------------------+     +---------------------+                |
//! +------------------------------------------------------------------+
//! ```
//!
//! # Key Types
//!
//! - [`HybridClient`]: the owning facade, constructed once at app start
//! - [`RouteConfig`]: routing mode, rollout percentage, providers, timeouts
//! - [`HealthMonitor`]: periodic backend liveness probing
//! - [`RequestRouter`]: dual-path execution with one-shot fallback
//! - [`OfflineQueue`]: durable FIFO of pending mutations with bounded retries
//!
//! # Module Overview
//!
//! - [`client`]: the owning `HybridClient` facade
//! - [`config`]: configuration loading and validation
//! - [`connectivity`]: network-state channel and the reconnect-drain trigger
//! - [`error`]: the error taxonomy
//! - [`health`]: backend health monitoring
//! - [`queue`]: the offline mutation queue and its blob-store seam
//! - [`routing`]: route selection, rollout gating, request execution
//! - [`session`]: credentials and session tokens
//! - [`transport`]: the HTTP seam and its `reqwest` implementation
//!
//! # No UI Dependencies
//!
//! This crate has **zero** dependencies on any UI framework. The mobile
//! shells plug in a transport, a blob store, and network-state events.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod health;
pub mod queue;
pub mod routing;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-exports for convenience
pub use client::{HybridClient, MutationOutcome};
pub use config::{
    default_config_path, load_config, load_config_from_path, DirectProviderConfig, RouteConfig,
    RouteMode,
};
pub use connectivity::{spawn_reconnect_drain, ConnectivityMonitor};
pub use error::ClientError;
pub use health::{BackendHealthStatus, HealthMonitor};
pub use queue::store::{BlobStore, FileStore, MemoryStore, StoreError};
pub use queue::{
    DrainReport, OfflineQueue, OperationKind, PendingOperation, MAX_REPLAY_ATTEMPTS,
    QUEUE_STORAGE_KEY,
};
pub use routing::rollout::{RandomSource, RolloutController, RouteDecision, SequenceSource, ThreadRngSource};
pub use routing::router::{RequestOptions, RequestRouter, RequestSource, ServiceResponse};
pub use routing::selector::{select_route, RouteSelector};
pub use session::{AuthTokens, Credentials};
pub use transport::{
    HttpMethod, HttpTransport, OutboundRequest, ReqwestTransport, TransportError,
    TransportResponse,
};
