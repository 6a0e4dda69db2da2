//! Provider location resolution.
//!
//! A provider can report position two ways: a **live fix** from active
//! real-time tracking (with accuracy and recency metadata) and a **static
//! location** configured on their profile. The resolver picks the
//! authoritative current position:
//!
//! 1. A live fix fresher than the staleness threshold always wins.
//! 2. Otherwise the static location is used, tagged stale from its own age.
//! 3. A provider with neither is excluded from every radius search.
//!
//! The module also computes the **effective distance** ranking key: actual
//! distance minus priority boosts for being online and for carrying an
//! accurate live fix. The result orders candidates and is never reported to
//! the user as a true distance.

mod types;

pub use types::{LiveFix, LocationSource, ResolvedLocation, StaticLocation};

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::geo::distance_km;
use crate::provider::ProviderSnapshot;

/// Tunables for location resolution and candidate ranking.
#[derive(Debug, Clone)]
pub struct LocationConfig {
    /// Age beyond which a reported location no longer counts as current.
    pub stale_after: Duration,
    /// Effective-distance reduction for online providers, in kilometers.
    pub online_boost_km: f64,
    /// Additional reduction for an accurate live fix, in kilometers.
    pub live_boost_km: f64,
    /// A live fix must be at least this accurate (meters) to earn the boost.
    pub min_accuracy_for_priority_m: f64,
    /// Movement below this (meters) is not worth persisting.
    pub min_movement_m: f64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(10 * 60),
            online_boost_km: 0.5,
            live_boost_km: 0.3,
            min_accuracy_for_priority_m: 50.0,
            min_movement_m: 50.0,
        }
    }
}

/// Picks the authoritative position for a provider snapshot.
#[derive(Debug, Clone, Default)]
pub struct LocationResolver {
    config: LocationConfig,
}

impl LocationResolver {
    /// Creates a resolver with the given tunables.
    pub fn new(config: LocationConfig) -> Self {
        Self { config }
    }

    /// Returns the resolver's configuration.
    pub fn config(&self) -> &LocationConfig {
        &self.config
    }

    /// Resolves the provider's current position against the wall clock.
    pub fn resolve(&self, snapshot: &ProviderSnapshot) -> Option<ResolvedLocation> {
        self.resolve_at(snapshot, Utc::now())
    }

    /// Resolves the provider's current position at an explicit instant.
    ///
    /// Split out from [`resolve`](Self::resolve) so staleness decisions are
    /// testable without a real clock.
    pub fn resolve_at(
        &self,
        snapshot: &ProviderSnapshot,
        now: DateTime<Utc>,
    ) -> Option<ResolvedLocation> {
        if let Some(fix) = &snapshot.live {
            if !self.is_stale(Some(fix.last_updated), now) {
                return Some(ResolvedLocation {
                    latitude: fix.latitude,
                    longitude: fix.longitude,
                    source: LocationSource::Live,
                    accuracy_m: fix.accuracy_m,
                    is_stale: false,
                });
            }
        }

        snapshot
            .static_location
            .as_ref()
            .map(|loc| ResolvedLocation {
                latitude: loc.latitude,
                longitude: loc.longitude,
                source: LocationSource::Static,
                accuracy_m: None,
                is_stale: self.is_stale(loc.last_updated, now),
            })
    }

    /// Computes the ranking key for a candidate.
    ///
    /// Subtracts the online boost when the provider is online, and the live
    /// boost when the position came from a sufficiently accurate live fix.
    /// Floored at zero. Sort order only, never a physical distance.
    pub fn effective_distance_km(
        &self,
        actual_km: f64,
        is_online: bool,
        source: LocationSource,
        accuracy_m: Option<f64>,
    ) -> f64 {
        let mut effective = actual_km;

        if is_online {
            effective -= self.config.online_boost_km;
        }

        if source == LocationSource::Live {
            let accurate_enough =
                accuracy_m.is_some_and(|a| a <= self.config.min_accuracy_for_priority_m);
            if accurate_enough {
                effective -= self.config.live_boost_km;
            }
        }

        effective.max(0.0)
    }

    /// True when the movement between two fixes is worth persisting.
    ///
    /// Battery optimization carried over from the tracking clients: writes
    /// below the threshold are skipped. Missing history always counts as
    /// significant.
    pub fn is_significant_movement(&self, old: Option<(f64, f64)>, new: (f64, f64)) -> bool {
        match old {
            None => true,
            Some((old_lat, old_lng)) => {
                let moved_km = distance_km(old_lat, old_lng, new.0, new.1);
                moved_km >= self.config.min_movement_m / 1000.0
            }
        }
    }

    fn is_stale(&self, last_updated: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_updated {
            // An unknown age can't be trusted as fresh.
            None => true,
            Some(at) => {
                let age = now.signed_duration_since(at);
                age.num_milliseconds().max(0) as u128 > self.config.stale_after.as_millis()
            }
        }
    }
}
