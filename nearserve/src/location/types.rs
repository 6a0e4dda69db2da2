//! Location primitives shared by the resolver and the provider directory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A live GPS fix reported by a provider's active tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveFix {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Reported GPS accuracy in meters, if the device supplied one.
    pub accuracy_m: Option<f64>,
    /// When the fix was reported.
    pub last_updated: DateTime<Utc>,
}

/// A provider's profile-configured fallback location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticLocation {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// When the profile location was last edited, if known.
    pub last_updated: Option<DateTime<Utc>>,
}

/// Which input produced a resolved location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationSource {
    /// From active real-time tracking.
    Live,
    /// From the provider's profile.
    Static,
}

impl std::fmt::Display for LocationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::Static => write!(f, "static"),
        }
    }
}

/// The authoritative current position chosen for a provider.
///
/// Derived per lookup, never persisted. A provider for which no location
/// can be resolved is invisible to every radius search.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLocation {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Which input won the selection.
    pub source: LocationSource,
    /// Accuracy in meters (live fixes only).
    pub accuracy_m: Option<f64>,
    /// True when the winning input is older than the staleness threshold.
    pub is_stale: bool,
}
