//! Read-only provider projections consumed by the engine.

use std::collections::HashSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::location::{LiveFix, StaticLocation};

/// The service categories a request can target.
///
/// Anything outside this set is rejected at the input boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCategory {
    Plumber,
    Electrician,
    Carpenter,
    Painter,
    AcRepair,
    Cleaning,
}

impl ServiceCategory {
    /// All known categories, in display order.
    pub const ALL: [ServiceCategory; 6] = [
        Self::Plumber,
        Self::Electrician,
        Self::Carpenter,
        Self::Painter,
        Self::AcRepair,
        Self::Cleaning,
    ];

    /// The wire name of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plumber => "plumber",
            Self::Electrician => "electrician",
            Self::Carpenter => "carpenter",
            Self::Painter => "painter",
            Self::AcRepair => "ac_repair",
            Self::Cleaning => "cleaning",
        }
    }
}

impl std::fmt::Display for ServiceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognized category name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCategory(pub String);

impl std::fmt::Display for UnknownCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown service category: {}", self.0)
    }
}

impl std::error::Error for UnknownCategory {}

impl FromStr for ServiceCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// Point-in-time projection of a provider record.
///
/// Owned by the profile store and refreshed per lookup; the engine never
/// caches these across searches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSnapshot {
    /// Stable provider identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Contact phone, may be empty.
    pub phone: String,
    /// Average rating, 0 when unrated.
    pub rating: f64,
    /// Free-form experience label, e.g. "3 years".
    pub experience: String,
    /// Categories the provider serves.
    pub service_categories: HashSet<ServiceCategory>,
    /// Whether the provider is accepting work at all.
    pub is_available: bool,
    /// Whether the provider's app reports them online right now.
    pub is_online: bool,
    /// Latest live tracking fix, if any.
    pub live: Option<LiveFix>,
    /// Profile-configured fallback location, if any.
    pub static_location: Option<StaticLocation>,
}

impl ProviderSnapshot {
    /// Public subset of the snapshot shared with a requester on assignment.
    pub fn public_info(&self) -> ProviderPublicInfo {
        ProviderPublicInfo {
            id: self.id.clone(),
            name: if self.name.is_empty() {
                "Service Provider".to_string()
            } else {
                self.name.clone()
            },
            phone: self.phone.clone(),
            rating: self.rating,
            experience: self.experience.clone(),
        }
    }
}

/// Provider fields safe to show a requesting user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderPublicInfo {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub rating: f64,
    pub experience: String,
}

/// Contact details for a requesting user, from the profile store.
#[derive(Debug, Clone, PartialEq)]
pub struct UserContact {
    pub name: String,
    pub email: String,
    pub phone: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_round_trips_through_str() {
        for category in ServiceCategory::ALL {
            assert_eq!(category.as_str().parse::<ServiceCategory>(), Ok(category));
        }
    }

    #[test]
    fn unknown_category_is_rejected() {
        let err = "gardener".parse::<ServiceCategory>().unwrap_err();
        assert_eq!(err, UnknownCategory("gardener".to_string()));
    }

    #[test]
    fn serde_uses_snake_case_names() {
        let json = serde_json::to_string(&ServiceCategory::AcRepair).unwrap();
        assert_eq!(json, "\"ac_repair\"");
    }

    #[test]
    fn public_info_defaults_empty_name() {
        let snapshot = ProviderSnapshot {
            id: "p-1".to_string(),
            name: String::new(),
            phone: "123".to_string(),
            rating: 0.0,
            experience: String::new(),
            service_categories: HashSet::new(),
            is_available: true,
            is_online: false,
            live: None,
            static_location: None,
        };
        assert_eq!(snapshot.public_info().name, "Service Provider");
    }
}
