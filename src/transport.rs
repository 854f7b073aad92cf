//! HTTP Transport Abstraction
//!
//! Trait definition for the HTTP layer used by the health monitor and the
//! request router. The abstraction keeps routing logic independent of the
//! concrete HTTP client so tests can substitute a scripted transport with
//! no live network.
//!
//! # Design Philosophy
//!
//! A transport does exactly one thing: execute a single bounded-timeout
//! HTTP exchange and report either a response (any status code) or a
//! transport-level failure (DNS, connection, timeout). Status-code
//! interpretation belongs to the caller; a 503 is a *response* here, not
//! an error. Exceeding the timeout is reported as a transport failure,
//! never as a hang.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// HTTP method for an outbound request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET request
    Get,
    /// POST request
    Post,
    /// PUT request
    Put,
    /// DELETE request
    Delete,
}

impl HttpMethod {
    /// Get the method name as it appears on the wire
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single outbound HTTP request
#[derive(Clone, Debug)]
pub struct OutboundRequest {
    /// HTTP method
    pub method: HttpMethod,
    /// Fully resolved URL
    pub url: String,
    /// Request headers as name/value pairs
    pub headers: Vec<(String, String)>,
    /// Optional JSON body
    pub body: Option<Value>,
    /// Hard deadline for the whole exchange
    pub timeout: Duration,
}

impl OutboundRequest {
    /// Create a request with no headers or body
    pub fn new(method: HttpMethod, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout,
        }
    }

    /// Attach a header
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attach a JSON body
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Response from a completed HTTP exchange
#[derive(Clone, Debug)]
pub struct TransportResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body, parsed as JSON where possible (raw text otherwise)
    pub body: Value,
    /// Wall-clock duration of the exchange
    pub latency: Duration,
}

impl TransportResponse {
    /// Check whether the status code is in the 2xx range
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport-level failure: the exchange never produced a status code
#[derive(Clone, Debug, Error)]
#[error("transport failure for {url}: {reason}")]
pub struct TransportError {
    /// URL that was attempted
    pub url: String,
    /// Human-readable failure description
    pub reason: String,
    /// Whether the failure was the configured timeout elapsing
    pub timed_out: bool,
}

impl TransportError {
    /// Create a transport error for a URL
    pub fn new(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reason: reason.into(),
            timed_out: false,
        }
    }

    /// Create a timeout error for a URL
    pub fn timed_out(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            reason: format!("timed out after {}ms", timeout.as_millis()),
            timed_out: true,
        }
    }
}

/// HTTP transport trait
///
/// Implement this trait to supply the HTTP layer. Production uses
/// [`ReqwestTransport`]; tests use a scripted mock.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Execute one HTTP exchange within the request's timeout
    async fn execute(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError>;
}

/// Production transport backed by a shared `reqwest` client
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with a default client
    ///
    /// Timeouts are applied per request from [`OutboundRequest::timeout`],
    /// so the client itself carries no global deadline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Create a transport from an existing client (custom TLS, proxies, ...)
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport").finish()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let started = std::time::Instant::now();

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::timed_out(&request.url, request.timeout)
            } else {
                TransportError::new(&request.url, e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::new(&request.url, e.to_string()))?;

        // Bodies are opaque JSON to this layer; non-JSON payloads are kept
        // verbatim as a string value for diagnostics.
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

        Ok(TransportResponse {
            status,
            body,
            latency: started.elapsed(),
        })
    }
}
