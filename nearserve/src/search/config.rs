//! Progressive search tunables.

use std::time::Duration;

/// Configuration for the phased radius expansion.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Duration of each search phase.
    pub phase_duration: Duration,
    /// Hard deadline for the whole search.
    pub max_search_time: Duration,
    /// Radius of the first phase, kilometers.
    pub start_radius_km: f64,
    /// Radius ceiling, kilometers.
    pub max_radius_km: f64,
    /// Radius growth per phase, kilometers.
    pub radius_increment_km: f64,
    /// Cap on providers notified in one broadcast.
    pub max_providers_per_broadcast: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            phase_duration: Duration::from_secs(30),
            max_search_time: Duration::from_secs(120),
            start_radius_km: 1.0,
            max_radius_km: 4.0,
            radius_increment_km: 1.0,
            max_providers_per_broadcast: 10,
        }
    }
}

impl SearchConfig {
    /// The phase a given elapsed time belongs to (1-based).
    pub fn phase_for_elapsed(&self, elapsed: Duration) -> u32 {
        let phase_secs = self.phase_duration.as_secs().max(1);
        (elapsed.as_secs() / phase_secs) as u32 + 1
    }

    /// The radius for a phase, capped at the ceiling.
    pub fn radius_for_phase(&self, phase: u32) -> f64 {
        let grown = self.start_radius_km + f64::from(phase.saturating_sub(1)) * self.radius_increment_km;
        grown.min(self.max_radius_km)
    }
}
