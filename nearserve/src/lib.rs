//! Nearserve - real-time proximity dispatch for hyper-local home services.
//!
//! This library matches incoming service requests to nearby providers in
//! real time: a progressive radius search locates candidates, broadcasts
//! the request to their live sessions, resolves the race among concurrent
//! provider accepts to a single winner, and drives each request through a
//! well-defined lifecycle to completion or termination.
//!
//! # High-Level API
//!
//! The [`engine`] module provides the facade most callers want:
//!
//! ```ignore
//! use std::sync::Arc;
//! use nearserve::config::EngineConfig;
//! use nearserve::engine::{DispatchEngine, SubmitRequest};
//! use nearserve::persistence::{NoOpNotifier, NoOpRepository};
//! use nearserve::provider::MemoryProfileStore;
//!
//! let engine = DispatchEngine::new(
//!     EngineConfig::default(),
//!     Arc::new(MemoryProfileStore::new()),
//!     Arc::new(NoOpRepository),
//!     Arc::new(NoOpNotifier),
//! );
//!
//! let request_id = engine.submit_request(fields).await?;
//! ```

pub mod completion;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod geo;
pub mod lifecycle;
pub mod location;
pub mod logging;
pub mod persistence;
pub mod provider;
pub mod search;
pub mod session;

/// Version of the nearserve library and CLI.
///
/// Synchronized across the workspace and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
