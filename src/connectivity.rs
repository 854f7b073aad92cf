//! Network-State Observation
//!
//! Single-producer online/offline channel consumed by the queue drain
//! trigger. Platform shells feed reachability changes into
//! [`ConnectivityMonitor::set_online`]; the reconnect task watches for
//! offline-to-online transitions and drains the offline queue through the
//! request router.
//!
//! Modeling this as one `watch` channel (rather than ad hoc callback
//! registration) gives late subscribers the current state immediately and
//! makes teardown a plain task abort.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;

use crate::queue::OfflineQueue;
use crate::routing::router::RequestRouter;

/// Single-producer network-state channel
pub struct ConnectivityMonitor {
    online: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    /// Create a monitor with the given initial state
    #[must_use]
    pub fn new(initially_online: bool) -> Self {
        let (online, _) = watch::channel(initially_online);
        Self { online }
    }

    /// Report a network-state change (the single producer)
    pub fn set_online(&self, online: bool) {
        if *self.online.borrow() != online {
            tracing::info!(online, "Network state changed");
        }
        self.online.send_replace(online);
    }

    /// Current network state
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Subscribe to state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("online", &self.is_online())
            .finish()
    }
}

/// Spawn the task that drains the queue on every offline-to-online
/// transition
///
/// The returned handle owns the task; aborting it tears the trigger down.
pub fn spawn_reconnect_drain(
    monitor: &ConnectivityMonitor,
    queue: Arc<OfflineQueue>,
    router: Arc<RequestRouter>,
) -> JoinHandle<()> {
    let receiver = monitor.subscribe();
    let mut was_online = *receiver.borrow();
    let mut states = WatchStream::new(receiver);

    tokio::spawn(async move {
        while let Some(online) = states.next().await {
            if online && !was_online {
                tracing::info!("Connectivity restored, draining offline queue");
                let report = queue.drain(&router).await;
                tracing::info!(
                    succeeded = report.succeeded.len(),
                    still_pending = report.still_pending.len(),
                    discarded = report.discarded.len(),
                    "Offline queue drain finished"
                );
            }
            was_online = online;
        }
    })
}
