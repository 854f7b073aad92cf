//! Gradual Rollout
//!
//! Percentage-based traffic split between the hybrid (selector-decided)
//! path and the forced-direct path, used to stage a migration onto the
//! backend proxy.
//!
//! Assignment is per-call, not sticky per user: a single session can land
//! on different paths across consecutive requests while the percentage is
//! between the extremes. This is intentional, documented behavior.
//!
//! Randomness is injected through [`RandomSource`] so tests supply a
//! deterministic sequence; production wires [`ThreadRngSource`]. At 0 and
//! 100 percent no draw happens at all.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;

use crate::config::RouteConfig;

use super::selector::RouteSelector;

// ============================================================================
// Random Source
// ============================================================================

/// Pluggable source of uniform randomness in `[0, 1)`
pub trait RandomSource: Send + Sync {
    /// Draw the next value in `[0, 1)`
    fn next(&self) -> f64;
}

/// Production source backed by the thread-local RNG
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadRngSource;

impl RandomSource for ThreadRngSource {
    fn next(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Deterministic source cycling through a fixed sequence (for tests)
#[derive(Debug)]
pub struct SequenceSource {
    values: Vec<f64>,
    cursor: AtomicUsize,
}

impl SequenceSource {
    /// Create a source that cycles through `values`
    #[must_use]
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            values,
            cursor: AtomicUsize::new(0),
        }
    }
}

impl RandomSource for SequenceSource {
    fn next(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.values[index % self.values.len()]
    }
}

// ============================================================================
// Rollout Controller
// ============================================================================

/// Outcome of a rollout-gated route decision
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteDecision {
    /// Whether the request should use the backend path
    pub use_backend: bool,
    /// Whether the rollout gate forced the direct path regardless of the
    /// selector's answer
    pub rollout_forced_direct: bool,
}

/// Percentage gate wrapping the route selector
pub struct RolloutController {
    config: Arc<RwLock<RouteConfig>>,
    selector: RouteSelector,
    random: Arc<dyn RandomSource>,
}

impl RolloutController {
    /// Create a controller using the thread-local RNG
    pub fn new(config: Arc<RwLock<RouteConfig>>, selector: RouteSelector) -> Self {
        Self::with_random_source(config, selector, Arc::new(ThreadRngSource))
    }

    /// Create a controller with an injected random source
    pub fn with_random_source(
        config: Arc<RwLock<RouteConfig>>,
        selector: RouteSelector,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            config,
            selector,
            random,
        }
    }

    /// Decide the path for one call
    ///
    /// At `rollout_percent >= 100` the selector decides; at `0` the direct
    /// path is forced; in between, one uniform draw in `[0, 100)` below the
    /// percentage admits the call to the hybrid path.
    #[must_use]
    pub fn route(&self, service: &str) -> RouteDecision {
        let percent = self.config.read().rollout_percent;

        if percent >= 100 {
            return RouteDecision {
                use_backend: self.selector.should_use_backend(service),
                rollout_forced_direct: false,
            };
        }

        if percent == 0 {
            return RouteDecision {
                use_backend: false,
                rollout_forced_direct: true,
            };
        }

        let draw = self.random.next() * 100.0;
        if draw < f64::from(percent) {
            RouteDecision {
                use_backend: self.selector.should_use_backend(service),
                rollout_forced_direct: false,
            }
        } else {
            tracing::trace!(service, percent, "Rollout gate forced direct path");
            RouteDecision {
                use_backend: false,
                rollout_forced_direct: true,
            }
        }
    }
}

impl std::fmt::Debug for RolloutController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RolloutController")
            .field("rollout_percent", &self.config.read().rollout_percent)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
