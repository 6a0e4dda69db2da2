//! Progressive radius search.
//!
//! Each in-flight request owns one search task that expands the radius in
//! timed phases (1 km per 30 s by default, up to 4 km), broadcasts to the
//! first non-empty candidate set it finds, and otherwise resolves to
//! timeout at the radius ceiling or the 120 s deadline. The search trades
//! completeness for latency: it commits to the first match rather than
//! waiting for a bigger pool.
//!
//! # Components
//!
//! - [`config`] - `SearchConfig` phase/radius/deadline tunables
//! - [`controller`] - the per-request `SearchController` task

mod config;
mod controller;

pub use config::SearchConfig;
pub use controller::{ActiveSearches, SearchController, SearchDeps};
