//! Hybrid Request Routing
//!
//! Decides, per request, whether a call goes through the backend proxy or
//! straight to the external provider, and executes it with a one-shot
//! fallback when the backend path fails.
//!
//! # Architecture
//!
//! ```text
//! +--------------------+
//! | RolloutController  |  <-- percentage gate (staged migration)
//! +---------+----------+
//!           |
//!           v
//! +--------------------+
//! |   RouteSelector    |  <-- mode x health x per-service decision table
//! +---------+----------+
//!           |
//!           v
//! +--------------------+
//! |   RequestRouter    |  <-- executes chosen path, falls back once
//! +--------------------+
//! ```
//!
//! # Design Principles
//!
//! 1. **Stateless decisions**: route selection is a pure function of the
//!    current config and health snapshot, safe to call on every request
//! 2. **Graceful degradation**: a failed backend attempt retries exactly
//!    once against the direct path, never more
//! 3. **Separate credential spaces**: the backend bearer token and each
//!    provider's own credentials are never conflated

pub mod rollout;
pub mod router;
pub mod selector;

pub use rollout::{RandomSource, RolloutController, RouteDecision, SequenceSource, ThreadRngSource};
pub use router::{RequestOptions, RequestRouter, RequestSource, ServiceResponse};
pub use selector::{select_route, RouteSelector};
