//! Offline Mutation Queue
//!
//! Durable FIFO of mutating operations that could not complete, replayed
//! through the request router once connectivity returns.
//!
//! # Correctness Invariant
//!
//! The full pending list is persisted to the blob store *before* an
//! enqueue is acknowledged. A crash between enqueue and persistence is
//! therefore indistinguishable from never having enqueued; once
//! acknowledged, an operation is never silently lost (at-least-once).
//! The in-memory list and its persisted mirror are kept in lockstep
//! (write-through) on every state change.
//!
//! # Per-Operation State Machine
//!
//! ```text
//! Pending --replay ok--> Succeeded (removed)
//! Pending --replay err--> retry_count + 1 --< 3--> Pending
//!                                         -->= 3--> Discarded (removed, logged)
//! ```
//!
//! Draining is not re-entrant: an overlapping `drain` replays nothing and
//! reports the current pending set unchanged.

pub mod store;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClientError;
use crate::routing::router::{RequestOptions, RequestRouter};
use crate::transport::HttpMethod;

use store::{BlobStore, StoreError};

/// Storage key holding the persisted pending-operation array
pub const QUEUE_STORAGE_KEY: &str = "pending_operations";

/// Replay attempts before an operation is dropped
pub const MAX_REPLAY_ATTEMPTS: u32 = 3;

// ============================================================================
// Pending Operations
// ============================================================================

/// Kind of mutating operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Create a resource
    Create,
    /// Update a resource
    Update,
    /// Delete a resource
    Delete,
}

impl OperationKind {
    /// HTTP method a replay uses for this kind
    #[must_use]
    pub fn method(self) -> HttpMethod {
        match self {
            Self::Create => HttpMethod::Post,
            Self::Update => HttpMethod::Put,
            Self::Delete => HttpMethod::Delete,
        }
    }

    /// Request options for replaying this kind with the given payload
    #[must_use]
    pub fn request_options(self, payload: Value) -> RequestOptions {
        let options = RequestOptions::new(self.method());
        match self {
            Self::Delete => options,
            _ => options.with_body(payload),
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// A mutating operation awaiting replay
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Unique id, monotonically ordered by enqueue time
    pub id: String,
    /// Operation kind
    pub kind: OperationKind,
    /// Logical resource the operation targets (e.g. `expenses`)
    pub resource: String,
    /// Opaque JSON payload
    pub payload: Value,
    /// When the operation was enqueued
    pub enqueued_at: DateTime<Utc>,
    /// Failed replay attempts so far
    pub retry_count: u32,
}

/// Outcome of one drain pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Ids replayed successfully, in enqueue order
    pub succeeded: Vec<String>,
    /// Ids that failed but remain queued for a later pass
    pub still_pending: Vec<String>,
    /// Ids dropped after exhausting their replay attempts
    pub discarded: Vec<String>,
}

impl DrainReport {
    /// Whether nothing remains queued after this pass
    #[must_use]
    pub fn is_fully_drained(&self) -> bool {
        self.still_pending.is_empty()
    }
}

// ============================================================================
// Offline Queue
// ============================================================================

/// Durable FIFO of pending mutating operations
pub struct OfflineQueue {
    store: Arc<dyn BlobStore>,
    pending: Mutex<Vec<PendingOperation>>,
    next_seq: AtomicU64,
    draining: AtomicBool,
}

impl OfflineQueue {
    /// Load the queue from the blob store
    ///
    /// An absent key yields an empty queue. An unreadable blob is logged
    /// and discarded rather than failing startup. The id sequence resumes
    /// past the highest persisted id so ordering survives restarts.
    pub fn load(store: Arc<dyn BlobStore>) -> Self {
        let pending: Vec<PendingOperation> = match store.get(QUEUE_STORAGE_KEY) {
            Ok(Some(blob)) => match serde_json::from_str(&blob) {
                Ok(ops) => ops,
                Err(e) => {
                    tracing::warn!(error = %e, "Discarding unreadable pending-operation blob");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read pending-operation blob, starting empty");
                Vec::new()
            }
        };

        let next_seq = pending
            .iter()
            .filter_map(|op| op.id.strip_prefix("op-")?.parse::<u64>().ok())
            .max()
            .map_or(1, |max| max + 1);

        if !pending.is_empty() {
            tracing::info!(count = pending.len(), "Restored pending offline operations");
        }

        Self {
            store,
            pending: Mutex::new(pending),
            next_seq: AtomicU64::new(next_seq),
            draining: AtomicBool::new(false),
        }
    }

    /// Number of queued operations
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Ids of all queued operations, in enqueue order
    #[must_use]
    pub fn pending_ids(&self) -> Vec<String> {
        self.pending.lock().iter().map(|op| op.id.clone()).collect()
    }

    /// Snapshot of all queued operations, in enqueue order
    #[must_use]
    pub fn pending_operations(&self) -> Vec<PendingOperation> {
        self.pending.lock().clone()
    }

    /// Whether a drain pass is currently in flight
    #[must_use]
    pub fn drain_in_progress(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Queue a mutating operation, persisting before acknowledging
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::QueuePersistence`] when the store rejects the
    /// write; the in-memory queue is rolled back so memory and disk stay in
    /// lockstep and the caller knows the operation is not durable.
    pub fn enqueue(
        &self,
        kind: OperationKind,
        resource: &str,
        payload: Value,
    ) -> Result<String, ClientError> {
        let mut pending = self.pending.lock();

        let operation = PendingOperation {
            id: format!("op-{:016}", self.next_seq.fetch_add(1, Ordering::SeqCst)),
            kind,
            resource: resource.to_string(),
            payload,
            enqueued_at: Utc::now(),
            retry_count: 0,
        };
        let id = operation.id.clone();
        pending.push(operation);

        if let Err(e) = persist(&self.store, &pending) {
            pending.pop();
            return Err(ClientError::QueuePersistence(e.to_string()));
        }

        tracing::debug!(%id, resource, %kind, "Queued offline operation");
        Ok(id)
    }

    /// Replay pending operations in enqueue order through the router
    ///
    /// Operations that fail are re-persisted with an incremented retry
    /// count; operations at the replay ceiling are dropped and reported as
    /// discarded. A drain already in flight makes this call a no-op that
    /// reports the current pending set.
    pub async fn drain(&self, router: &RequestRouter) -> DrainReport {
        if self.draining.swap(true, Ordering::SeqCst) {
            tracing::debug!("Drain already in flight, skipping");
            return DrainReport {
                succeeded: Vec::new(),
                still_pending: self.pending_ids(),
                discarded: Vec::new(),
            };
        }
        let _guard = DrainGuard(&self.draining);

        let snapshot = self.pending_operations();
        let mut report = DrainReport::default();

        tracing::debug!(count = snapshot.len(), "Draining offline queue");

        for operation in snapshot {
            // Stale entries at the ceiling (e.g. persisted by an earlier
            // run) are dropped without another replay.
            if operation.retry_count >= MAX_REPLAY_ATTEMPTS {
                self.remove_operation(&operation.id);
                tracing::warn!(
                    id = %operation.id,
                    resource = %operation.resource,
                    "Dropping operation already at the replay ceiling"
                );
                report.discarded.push(operation.id);
                continue;
            }

            let options = operation.kind.request_options(operation.payload.clone());
            match router.request(&operation.resource, "", options).await {
                Ok(_) => {
                    self.remove_operation(&operation.id);
                    tracing::debug!(id = %operation.id, "Replayed offline operation");
                    report.succeeded.push(operation.id);
                }
                Err(e) => {
                    let attempts = operation.retry_count + 1;
                    if attempts >= MAX_REPLAY_ATTEMPTS {
                        self.remove_operation(&operation.id);
                        tracing::warn!(
                            id = %operation.id,
                            resource = %operation.resource,
                            error = %e,
                            attempts,
                            "Dropping operation after exhausting replay attempts"
                        );
                        report.discarded.push(operation.id);
                    } else {
                        self.set_retry_count(&operation.id, attempts);
                        tracing::debug!(
                            id = %operation.id,
                            error = %e,
                            attempts,
                            "Replay failed, keeping operation queued"
                        );
                        report.still_pending.push(operation.id);
                    }
                }
            }
        }

        report
    }

    /// Remove every queued operation
    pub fn clear(&self) {
        let mut pending = self.pending.lock();
        pending.clear();
        if let Err(e) = persist(&self.store, &pending) {
            tracing::error!(error = %e, "Failed to persist cleared queue");
        }
    }

    /// Remove one operation and re-persist
    fn remove_operation(&self, id: &str) {
        let mut pending = self.pending.lock();
        pending.retain(|op| op.id != id);
        if let Err(e) = persist(&self.store, &pending) {
            // Memory stays authoritative for this process; a crash before
            // the next successful persist re-replays (at-least-once).
            tracing::error!(error = %e, %id, "Failed to persist queue after removal");
        }
    }

    /// Update one operation's retry count and re-persist
    fn set_retry_count(&self, id: &str, retry_count: u32) {
        let mut pending = self.pending.lock();
        if let Some(op) = pending.iter_mut().find(|op| op.id == id) {
            op.retry_count = retry_count;
        }
        if let Err(e) = persist(&self.store, &pending) {
            tracing::error!(error = %e, %id, "Failed to persist queue after retry update");
        }
    }
}

impl std::fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineQueue")
            .field("pending", &self.len())
            .field("draining", &self.drain_in_progress())
            .finish()
    }
}

/// Serialize and write the full pending list
fn persist(store: &Arc<dyn BlobStore>, pending: &[PendingOperation]) -> Result<(), StoreError> {
    let blob = serde_json::to_string(pending)?;
    store.put(QUEUE_STORAGE_KEY, &blob)
}

/// Resets the drain-in-progress flag even when a replay panics
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DirectProviderConfig, RouteConfig, RouteMode};
    use crate::health::HealthMonitor;
    use crate::routing::rollout::RolloutController;
    use crate::routing::selector::RouteSelector;
    use crate::test_utils::{FailingStore, MockTransport};
    use crate::transport::HttpTransport;
    use parking_lot::RwLock;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use super::store::MemoryStore;

    /// Direct-mode router over a mock transport: replays hit
    /// `https://sync.test/{resource}` with no health coupling.
    fn replay_router(transport: &Arc<MockTransport>) -> RequestRouter {
        let mut config = RouteConfig::new().with_mode(RouteMode::Direct);
        for resource in ["expenses", "budgets", "accounts"] {
            config = config.with_provider(
                resource,
                DirectProviderConfig::new(format!("https://sync.test/{resource}")),
            );
        }
        let config = Arc::new(RwLock::new(config));
        let monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&config),
            Arc::clone(transport) as Arc<dyn HttpTransport>,
        ));
        let selector = RouteSelector::new(Arc::clone(&config), monitor);
        let rollout = RolloutController::new(Arc::clone(&config), selector);
        RequestRouter::new(
            config,
            rollout,
            Arc::clone(transport) as Arc<dyn HttpTransport>,
        )
    }

    #[test]
    fn test_enqueue_persists_before_acknowledging() {
        let store = Arc::new(MemoryStore::new());
        let queue = OfflineQueue::load(Arc::clone(&store) as Arc<dyn BlobStore>);

        let id = queue
            .enqueue(OperationKind::Create, "expenses", json!({"amount": 125}))
            .unwrap();

        let blob = store.get(QUEUE_STORAGE_KEY).unwrap().unwrap();
        let persisted: Vec<PendingOperation> = serde_json::from_str(&blob).unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].id, id);
        assert_eq!(persisted[0].retry_count, 0);
    }

    #[test]
    fn test_enqueue_failure_rolls_back_memory() {
        let store = Arc::new(FailingStore::new());
        let queue = OfflineQueue::load(Arc::clone(&store) as Arc<dyn BlobStore>);

        store.set_fail_puts(true);
        let result = queue.enqueue(OperationKind::Create, "expenses", json!({}));

        assert!(matches!(result, Err(ClientError::QueuePersistence(_))));
        assert!(queue.is_empty());

        // Once the store recovers, enqueueing works again
        store.set_fail_puts(false);
        queue
            .enqueue(OperationKind::Create, "expenses", json!({}))
            .unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_restart_round_trip_preserves_operations() {
        let store = Arc::new(MemoryStore::new());

        let queue = OfflineQueue::load(Arc::clone(&store) as Arc<dyn BlobStore>);
        queue
            .enqueue(OperationKind::Create, "expenses", json!({"amount": 125}))
            .unwrap();
        queue
            .enqueue(OperationKind::Update, "budgets", json!({"limit": 5000}))
            .unwrap();
        let before = queue.pending_operations();

        // Simulated restart: a fresh queue over the same store
        let reloaded = OfflineQueue::load(Arc::clone(&store) as Arc<dyn BlobStore>);
        assert_eq!(reloaded.pending_operations(), before);

        // Ids keep increasing monotonically after the restart
        let new_id = reloaded
            .enqueue(OperationKind::Delete, "expenses", json!({"id": 7}))
            .unwrap();
        assert!(new_id > before.last().unwrap().id);
    }

    #[test]
    fn test_missing_key_loads_empty() {
        let queue = OfflineQueue::load(Arc::new(MemoryStore::new()));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_corrupt_blob_loads_empty() {
        let store = Arc::new(MemoryStore::new());
        store.put(QUEUE_STORAGE_KEY, "not json at all").unwrap();

        let queue = OfflineQueue::load(store);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_ids_are_unique_and_ordered() {
        let queue = OfflineQueue::load(Arc::new(MemoryStore::new()));

        let ids: Vec<String> = (0..5)
            .map(|i| {
                queue
                    .enqueue(OperationKind::Create, "expenses", json!({ "n": i }))
                    .unwrap()
            })
            .collect();

        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted, ids);
    }

    #[tokio::test]
    async fn test_drain_replays_fifo_and_partitions_results() {
        let transport = Arc::new(MockTransport::new());
        let router = replay_router(&transport);
        let queue = OfflineQueue::load(Arc::new(MemoryStore::new()));

        let a = queue
            .enqueue(OperationKind::Create, "expenses", json!({"n": 1}))
            .unwrap();
        let b = queue
            .enqueue(OperationKind::Create, "budgets", json!({"n": 2}))
            .unwrap();
        let c = queue
            .enqueue(OperationKind::Update, "accounts", json!({"n": 3}))
            .unwrap();

        // B's provider is down; A and C succeed.
        transport.fail_with("sync.test/budgets", "connection refused");

        let report = queue.drain(&router).await;

        assert_eq!(report.succeeded, vec![a, c]);
        assert_eq!(report.still_pending, vec![b.clone()]);
        assert!(report.discarded.is_empty());
        assert_eq!(queue.pending_ids(), vec![b]);

        // The failed operation carries its bumped retry count
        assert_eq!(queue.pending_operations()[0].retry_count, 1);
    }

    #[tokio::test]
    async fn test_retry_ceiling_discards_after_three_attempts() {
        let transport = Arc::new(MockTransport::new());
        let router = replay_router(&transport);
        let queue = OfflineQueue::load(Arc::new(MemoryStore::new()));

        let id = queue
            .enqueue(OperationKind::Create, "expenses", json!({}))
            .unwrap();
        transport.fail_with("sync.test/expenses", "still down");

        let first = queue.drain(&router).await;
        assert_eq!(first.still_pending, vec![id.clone()]);

        let second = queue.drain(&router).await;
        assert_eq!(second.still_pending, vec![id.clone()]);

        // Third failed replay hits the ceiling
        let third = queue.drain(&router).await;
        assert_eq!(third.discarded, vec![id]);
        assert!(queue.is_empty());

        // Exactly three replays happened; later drains replay nothing
        assert_eq!(transport.request_count("sync.test/expenses"), 3);
        let fourth = queue.drain(&router).await;
        assert_eq!(fourth, DrainReport::default());
        assert_eq!(transport.request_count("sync.test/expenses"), 3);
    }

    #[tokio::test]
    async fn test_stale_entry_at_ceiling_is_discarded_without_replay() {
        let store = Arc::new(MemoryStore::new());
        let stale = vec![PendingOperation {
            id: "op-0000000000000001".to_string(),
            kind: OperationKind::Create,
            resource: "expenses".to_string(),
            payload: json!({}),
            enqueued_at: Utc::now(),
            retry_count: MAX_REPLAY_ATTEMPTS,
        }];
        store
            .put(QUEUE_STORAGE_KEY, &serde_json::to_string(&stale).unwrap())
            .unwrap();

        let transport = Arc::new(MockTransport::new());
        let router = replay_router(&transport);
        let queue = OfflineQueue::load(store);

        let report = queue.drain(&router).await;
        assert_eq!(report.discarded, vec!["op-0000000000000001".to_string()]);
        assert_eq!(transport.request_count("sync.test"), 0);
    }

    #[tokio::test]
    async fn test_overlapping_drain_is_a_noop() {
        let transport = Arc::new(MockTransport::new());
        transport.set_delay(std::time::Duration::from_millis(40));
        let router = Arc::new(replay_router(&transport));
        let queue = Arc::new(OfflineQueue::load(Arc::new(MemoryStore::new())));

        for i in 0..3 {
            queue
                .enqueue(OperationKind::Create, "expenses", json!({ "n": i }))
                .unwrap();
        }

        let slow = {
            let queue = Arc::clone(&queue);
            let router = Arc::clone(&router);
            tokio::spawn(async move { queue.drain(&router).await })
        };

        // Give the first drain time to set its flag and start replaying.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let overlapping = queue.drain(&router).await;

        assert!(overlapping.succeeded.is_empty());
        assert_eq!(overlapping.still_pending.len(), 3);

        let report = slow.await.unwrap();
        assert_eq!(report.succeeded.len(), 3);

        // Each operation was replayed exactly once.
        assert_eq!(transport.request_count("sync.test/expenses"), 3);
    }

    #[tokio::test]
    async fn test_later_operations_proceed_past_discarded_ones() {
        let transport = Arc::new(MockTransport::new());
        let router = replay_router(&transport);
        let store = Arc::new(MemoryStore::new());

        // Seed one operation one failure away from the ceiling, then a
        // healthy one behind it.
        let queue = OfflineQueue::load(Arc::clone(&store) as Arc<dyn BlobStore>);
        let doomed = queue
            .enqueue(OperationKind::Create, "expenses", json!({}))
            .unwrap();
        let healthy = queue
            .enqueue(OperationKind::Create, "budgets", json!({}))
            .unwrap();

        transport.fail_with("sync.test/expenses", "down");
        let first = queue.drain(&router).await;
        assert_eq!(first.succeeded, vec![healthy]);
        queue.drain(&router).await;

        let report = queue.drain(&router).await;
        assert_eq!(report.discarded, vec![doomed]);
        assert!(queue.is_empty());
        assert_eq!(transport.request_count("sync.test/budgets"), 1);
    }

    #[test]
    fn test_clear_empties_queue_and_store() {
        let store = Arc::new(MemoryStore::new());
        let queue = OfflineQueue::load(Arc::clone(&store) as Arc<dyn BlobStore>);

        queue
            .enqueue(OperationKind::Create, "expenses", json!({}))
            .unwrap();
        queue.clear();

        assert!(queue.is_empty());
        let blob = store.get(QUEUE_STORAGE_KEY).unwrap().unwrap();
        assert_eq!(blob, "[]");
    }

    #[test]
    fn test_operation_kind_methods() {
        assert_eq!(OperationKind::Create.method(), HttpMethod::Post);
        assert_eq!(OperationKind::Update.method(), HttpMethod::Put);
        assert_eq!(OperationKind::Delete.method(), HttpMethod::Delete);

        let options = OperationKind::Delete.request_options(json!({"id": 1}));
        assert!(options.body.is_none());

        let options = OperationKind::Create.request_options(json!({"id": 1}));
        assert!(options.body.is_some());
    }
}
