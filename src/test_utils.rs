//! Test Utilities
//!
//! Scripted infrastructure for exercising routing and queue behavior
//! without a live network. The mock transport supports per-URL response
//! rules, transport-failure and timeout injection, artificial latency, and
//! request history tracking for verification.
//!
//! # Usage
//!
//! ```ignore
//! let transport = Arc::new(MockTransport::new());
//! transport.respond_with("/health", 200, json!({"status": "healthy"}));
//! transport.fail_with("provider.test", "connection refused");
//!
//! // After the test, verify what was actually sent
//! assert_eq!(transport.request_count("/health"), 1);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::queue::store::{BlobStore, MemoryStore, StoreError};
use crate::transport::{
    HttpMethod, HttpTransport, OutboundRequest, TransportError, TransportResponse,
};

// ============================================================================
// Recorded Requests
// ============================================================================

/// Captured request for test verification
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    /// HTTP method that was used
    pub method: HttpMethod,
    /// Full URL that was requested
    pub url: String,
    /// Headers that were sent
    pub headers: Vec<(String, String)>,
    /// Body that was sent, if any
    pub body: Option<Value>,
}

impl RecordedRequest {
    /// Value of the first header with the given name, if present
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

// ============================================================================
// Mock Transport
// ============================================================================

enum MockOutcome {
    Respond { status: u16, body: Value },
    Fail { reason: String, timed_out: bool },
}

struct MockRule {
    url_fragment: String,
    outcome: MockOutcome,
}

/// Scripted transport: rules match on URL substrings, first match wins;
/// unmatched requests get an empty 200
#[derive(Default)]
pub struct MockTransport {
    rules: Mutex<Vec<MockRule>>,
    history: Mutex<Vec<RecordedRequest>>,
    delay: Mutex<Option<Duration>>,
}

impl MockTransport {
    /// Create a transport with no rules
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond with the given status and body for URLs containing the fragment
    pub fn respond_with(&self, url_fragment: impl Into<String>, status: u16, body: Value) {
        self.rules.lock().push(MockRule {
            url_fragment: url_fragment.into(),
            outcome: MockOutcome::Respond { status, body },
        });
    }

    /// Fail with a transport error for URLs containing the fragment
    pub fn fail_with(&self, url_fragment: impl Into<String>, reason: impl Into<String>) {
        self.rules.lock().push(MockRule {
            url_fragment: url_fragment.into(),
            outcome: MockOutcome::Fail {
                reason: reason.into(),
                timed_out: false,
            },
        });
    }

    /// Fail with a timeout for URLs containing the fragment
    pub fn time_out(&self, url_fragment: impl Into<String>) {
        self.rules.lock().push(MockRule {
            url_fragment: url_fragment.into(),
            outcome: MockOutcome::Fail {
                reason: "simulated timeout".to_string(),
                timed_out: true,
            },
        });
    }

    /// Drop all rules (history is kept)
    pub fn clear_rules(&self) {
        self.rules.lock().clear();
    }

    /// Sleep this long before answering each request
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// All requests seen so far, in order
    pub fn history(&self) -> Vec<RecordedRequest> {
        self.history.lock().clone()
    }

    /// Number of requests whose URL contains the fragment
    pub fn request_count(&self, url_fragment: &str) -> usize {
        self.history
            .lock()
            .iter()
            .filter(|r| r.url.contains(url_fragment))
            .count()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn execute(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        self.history.lock().push(RecordedRequest {
            method: request.method,
            url: request.url.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
        });

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = {
            let rules = self.rules.lock();
            rules
                .iter()
                .find(|rule| request.url.contains(&rule.url_fragment))
                .map(|rule| match &rule.outcome {
                    MockOutcome::Respond { status, body } => Ok((*status, body.clone())),
                    MockOutcome::Fail { reason, timed_out } => {
                        Err((reason.clone(), *timed_out))
                    }
                })
        };

        match outcome {
            Some(Ok((status, body))) => Ok(TransportResponse {
                status,
                body,
                latency: Duration::from_millis(1),
            }),
            Some(Err((reason, timed_out))) => Err(TransportError {
                url: request.url,
                reason,
                timed_out,
            }),
            None => Ok(TransportResponse {
                status: 200,
                body: json!({}),
                latency: Duration::from_millis(1),
            }),
        }
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("rules", &self.rules.lock().len())
            .field("requests", &self.history.lock().len())
            .finish()
    }
}

// ============================================================================
// Failing Store
// ============================================================================

/// Blob store with injectable write failures, for persistence-error paths
#[derive(Debug, Default)]
pub struct FailingStore {
    inner: MemoryStore,
    fail_puts: AtomicBool,
}

impl FailingStore {
    /// Create a store that initially accepts writes
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle write failure injection
    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }
}

impl BlobStore for FailingStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other("injected write failure")));
        }
        self.inner.put(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.inner.remove(key)
    }
}
