//! Great-circle distance and coordinate helpers.
//!
//! Provides the haversine distance used for every radius check in the
//! dispatch engine, plus coordinate validation and display formatting.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in kilometers (spherical model).
const EARTH_RADIUS_KM: f64 = 6371.0;

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees (-90 to 90).
    pub latitude: f64,
    /// Longitude in degrees (-180 to 180).
    pub longitude: f64,
}

impl GeoPoint {
    /// Creates a point without validating the coordinates.
    ///
    /// Use [`validate_coordinates`] at the input boundary; interior code
    /// works with already-validated points.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Haversine distance to another point, in kilometers.
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        distance_km(
            self.latitude,
            self.longitude,
            other.latitude,
            other.longitude,
        )
    }
}

/// Computes the great-circle distance between two coordinates in kilometers.
///
/// Uses the haversine formula on a spherical Earth (radius 6371 km) and
/// rounds to two decimal places. Pure and total: identical points return 0,
/// and argument order does not matter.
pub fn distance_km(lat_a: f64, lng_a: f64, lat_b: f64, lng_b: f64) -> f64 {
    let d_lat = (lat_b - lat_a).to_radians();
    let d_lng = (lng_b - lng_a).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat_a.to_radians().cos() * lat_b.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    round_2dp(EARTH_RADIUS_KM * c)
}

/// Validates that a latitude/longitude pair is finite and in range.
pub fn validate_coordinates(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}

/// Formats a distance for display: meters below 1 km, kilometers otherwise.
pub fn format_distance(distance_km: Option<f64>) -> String {
    match distance_km {
        None => "Unknown distance".to_string(),
        Some(km) if km < 1.0 => format!("{}m away", (km * 1000.0).round() as i64),
        Some(km) => format!("{km}km away"),
    }
}

/// Rounds to two decimal places (reported distances are user-facing).
pub(crate) fn round_2dp(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
