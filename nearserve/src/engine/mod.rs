//! The dispatch engine.
//!
//! Entry point for every session event: registration, request submission,
//! provider responses, cancellation, live-location and online-status
//! updates, and completion. The facade owns the shared state (session
//! registry, lifecycle store, live search tokens) and spawns one search
//! task per request.
//!
//! # Components
//!
//! - [`facade`] - `DispatchEngine` wiring and the exposed operations
//! - [`response`] - the accept/reject race resolver
//! - [`stats`] - monotonic counters for monitoring

mod facade;
mod response;
mod stats;

pub use facade::{DispatchEngine, HealthSnapshot, SubmitRequest};
pub use response::{ResponseDecision, ResponseOutcome};
pub use stats::{EngineStats, EngineStatsSnapshot};
