//! The service request entity and its status machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;
use crate::provider::ServiceCategory;

/// Lifecycle status of a service request.
///
/// `Searching` and `ProvidersFound` are transient facets of a pending
/// request; exactly one terminal status is ever reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Created, search not yet past its first tick.
    Pending,
    /// Progressive search running, no candidates broadcast yet.
    Searching,
    /// At least one candidate has been notified; awaiting responses.
    ProvidersFound,
    /// A provider won the accept race.
    Accepted,
    /// Work underway (reported by the provider).
    InProgress,
    /// Service finished by the assigned provider.
    Completed,
    /// Cancelled by the requester (or superseded by a newer request).
    Cancelled,
    /// Declined terminally.
    Rejected,
    /// No provider found before the search deadline.
    TimedOut,
}

impl RequestStatus {
    /// Statuses from which a search may still match providers.
    pub const SEARCHABLE: [RequestStatus; 3] =
        [Self::Pending, Self::Searching, Self::ProvidersFound];

    /// True when no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Cancelled | Self::Rejected | Self::TimedOut
        )
    }

    /// True while the request may still be matched to a provider.
    pub fn is_searchable(&self) -> bool {
        Self::SEARCHABLE.contains(self)
    }

    /// True once a provider owns the request.
    pub fn is_assigned(&self) -> bool {
        matches!(self, Self::Accepted | Self::InProgress | Self::Completed)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Searching => "searching",
            Self::ProvidersFound => "providers_found",
            Self::Accepted => "accepted",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
            Self::TimedOut => "timed_out",
        };
        f.write_str(name)
    }
}

/// How urgently the requester needs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

/// Estimated arrival/completion details supplied by the accepting provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eta {
    /// Absolute completion timestamp, when the client sent one.
    pub completion_time: Option<DateTime<Utc>>,
    /// Human-readable clock time, e.g. "3:30 PM". Passed through as-is.
    pub display_time: Option<String>,
    /// Duration from acceptance, e.g. "2h 30m". Passed through as-is.
    pub duration_label: Option<String>,
}

/// A service request while in flight.
///
/// The in-memory copy held by the lifecycle store is authoritative; the
/// persisted mirror is best-effort.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRequest {
    /// Unique id, immutable once created.
    pub request_id: String,
    /// Requesting user.
    pub user_id: String,
    /// Requested trade.
    pub category: ServiceCategory,
    /// Free-form problem description.
    pub description: String,
    /// Requester-declared urgency.
    pub urgency: Urgency,
    /// Where the service is needed. Fixed at creation.
    pub origin: GeoPoint,
    /// Current lifecycle status.
    pub status: RequestStatus,
    /// Winning provider; set exactly once, never overwritten while active.
    pub assigned_provider_id: Option<String>,
    /// Current search phase (1-based).
    pub search_phase: u32,
    /// Current search radius; non-decreasing while searching.
    pub search_radius_km: f64,
    /// ETA supplied on acceptance.
    pub eta: Option<Eta>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// When the accept race was won.
    pub accepted_at: Option<DateTime<Utc>>,
    /// When a terminal status was reached.
    pub terminated_at: Option<DateTime<Utc>>,
}

impl ServiceRequest {
    /// Creates a pending request at phase 1 with the given starting radius.
    pub fn new(
        request_id: impl Into<String>,
        user_id: impl Into<String>,
        category: ServiceCategory,
        description: impl Into<String>,
        urgency: Urgency,
        origin: GeoPoint,
        start_radius_km: f64,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            user_id: user_id.into(),
            category,
            description: description.into(),
            urgency,
            origin,
            status: RequestStatus::Pending,
            assigned_provider_id: None,
            search_phase: 1,
            search_radius_km: start_radius_km,
            eta: None,
            created_at: Utc::now(),
            accepted_at: None,
            terminated_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(RequestStatus::Completed.is_terminal());
        assert!(RequestStatus::Cancelled.is_terminal());
        assert!(RequestStatus::Rejected.is_terminal());
        assert!(RequestStatus::TimedOut.is_terminal());
        assert!(!RequestStatus::Accepted.is_terminal());
        assert!(!RequestStatus::Pending.is_terminal());
    }

    #[test]
    fn searchable_statuses() {
        assert!(RequestStatus::Pending.is_searchable());
        assert!(RequestStatus::Searching.is_searchable());
        assert!(RequestStatus::ProvidersFound.is_searchable());
        assert!(!RequestStatus::Accepted.is_searchable());
        assert!(!RequestStatus::TimedOut.is_searchable());
    }

    #[test]
    fn assigned_statuses() {
        assert!(RequestStatus::Accepted.is_assigned());
        assert!(RequestStatus::InProgress.is_assigned());
        assert!(RequestStatus::Completed.is_assigned());
        assert!(!RequestStatus::ProvidersFound.is_assigned());
    }

    #[test]
    fn status_display_matches_wire_names() {
        assert_eq!(RequestStatus::ProvidersFound.to_string(), "providers_found");
        assert_eq!(RequestStatus::TimedOut.to_string(), "timed_out");
        assert_eq!(RequestStatus::InProgress.to_string(), "in_progress");
    }

    #[test]
    fn new_request_starts_pending_at_phase_one() {
        let request = ServiceRequest::new(
            "req-1",
            "user-1",
            ServiceCategory::Plumber,
            "leaking tap",
            Urgency::default(),
            GeoPoint::new(19.0760, 72.8777),
            1.0,
        );
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.search_phase, 1);
        assert_eq!(request.search_radius_km, 1.0);
        assert_eq!(request.urgency, Urgency::Medium);
        assert!(request.assigned_provider_id.is_none());
    }
}
