//! Engine configuration.

use std::time::Duration;

use crate::location::LocationConfig;
use crate::search::SearchConfig;

/// Aggregate configuration for the dispatch engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Progressive search tunables.
    pub search: SearchConfig,
    /// Location resolution and ranking tunables.
    pub location: LocationConfig,
    /// How long a terminated request stays queryable.
    pub terminated_grace: Duration,
    /// How often the sweeper looks for aged terminated entries.
    pub sweep_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            search: SearchConfig::default(),
            location: LocationConfig::default(),
            terminated_grace: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}
