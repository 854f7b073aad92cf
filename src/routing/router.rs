//! Request Router
//!
//! Executes a single logical request against whichever path the rollout
//! controller chose. When the backend path fails with a recoverable error
//! and fallback is enabled, the router retries exactly once against the
//! direct provider and returns that outcome as final.
//!
//! # Credential Spaces
//!
//! Backend calls carry the session bearer token; direct calls carry the
//! target provider's own credential (its header and scheme come from the
//! provider registry). The two are never mixed.
//!
//! # Side Effects
//!
//! None beyond the HTTP call itself. The stored token set changes only
//! through the explicit `set_tokens`/`clear_tokens` accessors, called by
//! login and logout.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use crate::config::{DirectProviderConfig, RouteConfig};
use crate::error::ClientError;
use crate::session::AuthTokens;
use crate::transport::{HttpMethod, HttpTransport, OutboundRequest};

use super::rollout::RolloutController;

// ============================================================================
// Request Options and Response
// ============================================================================

/// Which path produced a response
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestSource {
    /// Served by the backend proxy
    Backend,
    /// Served by the external provider directly
    Direct,
}

impl std::fmt::Display for RequestSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Backend => write!(f, "backend"),
            Self::Direct => write!(f, "direct"),
        }
    }
}

/// Per-request options: method, body, extra headers, timeout override
#[derive(Clone, Debug)]
pub struct RequestOptions {
    /// HTTP method
    pub method: HttpMethod,
    /// Optional JSON body
    pub body: Option<Value>,
    /// Extra headers merged into the request
    pub headers: Vec<(String, String)>,
    /// Timeout override; the configured request timeout applies otherwise
    pub timeout: Option<Duration>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: HttpMethod::Get,
            body: None,
            headers: Vec::new(),
            timeout: None,
        }
    }
}

impl RequestOptions {
    /// Options for the given method, no body
    #[must_use]
    pub fn new(method: HttpMethod) -> Self {
        Self {
            method,
            ..Default::default()
        }
    }

    /// GET options
    #[must_use]
    pub fn get() -> Self {
        Self::new(HttpMethod::Get)
    }

    /// POST options with a JSON body
    #[must_use]
    pub fn post(body: Value) -> Self {
        Self::new(HttpMethod::Post).with_body(body)
    }

    /// PUT options with a JSON body
    #[must_use]
    pub fn put(body: Value) -> Self {
        Self::new(HttpMethod::Put).with_body(body)
    }

    /// DELETE options
    #[must_use]
    pub fn delete() -> Self {
        Self::new(HttpMethod::Delete)
    }

    /// Set the JSON body
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Add a header
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Override the timeout for this request
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Successful response, tagged with the path that served it
#[derive(Clone, Debug)]
pub struct ServiceResponse {
    /// HTTP status code (2xx)
    pub status: u16,
    /// Response body (opaque to this layer)
    pub body: Value,
    /// Which path produced this response
    pub source: RequestSource,
    /// Wall-clock latency of the winning attempt, in milliseconds
    pub latency_ms: u64,
}

// ============================================================================
// Request Router
// ============================================================================

/// Dual-path request executor with one-shot fallback
pub struct RequestRouter {
    config: Arc<RwLock<RouteConfig>>,
    rollout: RolloutController,
    transport: Arc<dyn HttpTransport>,
    /// Direct-path provider registry, keyed by logical service name
    providers: DashMap<String, DirectProviderConfig>,
    tokens: RwLock<Option<AuthTokens>>,
}

impl RequestRouter {
    /// Create a router, seeding the provider registry from the config
    pub fn new(
        config: Arc<RwLock<RouteConfig>>,
        rollout: RolloutController,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let providers = DashMap::new();
        for (service, provider) in &config.read().providers {
            providers.insert(service.clone(), provider.clone());
        }

        Self {
            config,
            rollout,
            transport,
            providers,
            tokens: RwLock::new(None),
        }
    }

    /// Register (or replace) the direct provider for a service
    pub fn register_provider(&self, service: impl Into<String>, provider: DirectProviderConfig) {
        let service = service.into();
        tracing::debug!(service = %service, "Registered direct provider");
        self.providers.insert(service, provider);
    }

    /// Replace the whole provider registry (used after config updates)
    pub fn sync_providers(&self, providers: &std::collections::HashMap<String, DirectProviderConfig>) {
        self.providers.clear();
        for (service, provider) in providers {
            self.providers.insert(service.clone(), provider.clone());
        }
    }

    /// Store the session tokens (login/register only)
    pub fn set_tokens(&self, tokens: AuthTokens) {
        *self.tokens.write() = Some(tokens);
    }

    /// Clear the session tokens (logout only)
    pub fn clear_tokens(&self) {
        *self.tokens.write() = None;
    }

    /// Current session tokens, if any
    #[must_use]
    pub fn tokens(&self) -> Option<AuthTokens> {
        self.tokens.read().clone()
    }

    /// Execute one logical request against the chosen path
    ///
    /// # Errors
    ///
    /// - [`ClientError::Transport`] / [`ClientError::BackendUnavailable`]
    ///   when the backend attempt fails and fallback is disabled
    /// - [`ClientError::DirectProvider`] / [`ClientError::Transport`] when
    ///   the direct path was chosen and fails
    /// - [`ClientError::BothPathsFailed`] when the backend attempt and its
    ///   direct fallback both fail
    /// - [`ClientError::Configuration`] when a direct attempt has no
    ///   registered provider
    pub async fn request(
        &self,
        service: &str,
        path: &str,
        options: RequestOptions,
    ) -> Result<ServiceResponse, ClientError> {
        let request_id = Uuid::new_v4();
        let decision = self.rollout.route(service);
        let fallback_enabled = self.config.read().fallback_enabled;

        tracing::debug!(
            %request_id,
            service,
            path,
            use_backend = decision.use_backend,
            "Routing request"
        );

        if !decision.use_backend {
            return self.try_direct(service, path, &options).await;
        }

        match self.try_backend(service, path, &options).await {
            Ok(response) => Ok(response),
            Err(backend_err) if fallback_enabled && backend_err.fallback_eligible() => {
                tracing::warn!(
                    %request_id,
                    service,
                    error = %backend_err,
                    "Backend path failed, falling back to direct"
                );
                match self.try_direct(service, path, &options).await {
                    Ok(response) => Ok(response),
                    Err(direct_err) => Err(ClientError::BothPathsFailed {
                        service: service.to_string(),
                        path: path.to_string(),
                        backend: Box::new(backend_err),
                        direct: Box::new(direct_err),
                    }),
                }
            }
            Err(backend_err) => Err(backend_err),
        }
    }

    /// Execute against the backend proxy with the session bearer token
    async fn try_backend(
        &self,
        service: &str,
        path: &str,
        options: &RequestOptions,
    ) -> Result<ServiceResponse, ClientError> {
        let (base_url, default_timeout) = {
            let config = self.config.read();
            (config.backend_base_url.clone(), config.request_timeout())
        };

        if base_url.is_empty() {
            return Err(ClientError::Configuration(
                "backend base URL not configured".to_string(),
            ));
        }

        let url = join_url(&base_url, &[service, path]);
        let mut request = OutboundRequest::new(
            options.method,
            &url,
            options.timeout.unwrap_or(default_timeout),
        );
        request.headers = options.headers.clone();
        request.body = options.body.clone();

        if let Some(tokens) = self.tokens.read().as_ref() {
            request
                .headers
                .push(("Authorization".to_string(), format!("Bearer {}", tokens.access_token)));
        }

        let response = self.transport.execute(request).await?;

        if response.is_success() {
            Ok(ServiceResponse {
                status: response.status,
                body: response.body,
                source: RequestSource::Backend,
                latency_ms: response.latency.as_millis() as u64,
            })
        } else {
            Err(ClientError::BackendUnavailable {
                url,
                status: response.status,
                detail: error_detail(&response.body),
            })
        }
    }

    /// Execute against the service's direct provider with its own credential
    async fn try_direct(
        &self,
        service: &str,
        path: &str,
        options: &RequestOptions,
    ) -> Result<ServiceResponse, ClientError> {
        let provider = self
            .providers
            .get(service)
            .map(|entry| entry.clone())
            .ok_or_else(|| {
                ClientError::Configuration(format!(
                    "no direct provider configured for service '{service}'"
                ))
            })?;

        let default_timeout = self.config.read().request_timeout();
        let url = join_url(&provider.base_url, &[path]);

        let mut request = OutboundRequest::new(
            options.method,
            &url,
            options.timeout.unwrap_or(default_timeout),
        );
        request.headers = options.headers.clone();
        request.body = options.body.clone();

        if let Some((name, value)) = provider.auth_header_pair() {
            request.headers.push((name, value));
        }

        let response = self.transport.execute(request).await?;

        if response.is_success() {
            Ok(ServiceResponse {
                status: response.status,
                body: response.body,
                source: RequestSource::Direct,
                latency_ms: response.latency.as_millis() as u64,
            })
        } else {
            Err(ClientError::DirectProvider {
                service: service.to_string(),
                status: response.status,
                detail: error_detail(&response.body),
            })
        }
    }
}

impl std::fmt::Debug for RequestRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestRouter")
            .field("providers", &self.providers.len())
            .field("has_tokens", &self.tokens.read().is_some())
            .finish()
    }
}

/// Join a base URL with path segments, skipping empty ones
fn join_url(base: &str, segments: &[&str]) -> String {
    let mut url = base.trim_end_matches('/').to_string();
    for segment in segments {
        let segment = segment.trim_matches('/');
        if !segment.is_empty() {
            url.push('/');
            url.push_str(segment);
        }
    }
    url
}

/// Pull a human-readable detail out of an error body
fn error_detail(body: &Value) -> String {
    if let Some(detail) = body.get("detail").and_then(Value::as_str) {
        return detail.to_string();
    }
    if let Some(message) = body.get("message").and_then(Value::as_str) {
        return message.to_string();
    }
    let raw = body.to_string();
    if raw.len() > 200 {
        format!("{}...", &raw[..200])
    } else {
        raw
    }
}

// ============================================================================
// Tests
// ============================================================================
