//! Outbound events delivered to user and provider sessions.
//!
//! Every engine operation answers with one or more of these on specific
//! sessions. The wire shape is a tagged JSON object (`"event": ...`) with
//! camelCase payload fields, matching what the mobile clients consume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;
use crate::lifecycle::{Eta, RequestStatus, Urgency};
use crate::provider::{ProviderPublicInfo, ServiceCategory};

/// Priority tag attached to a broadcast, derived from the search phase.
///
/// Early phases mean the provider is close; their client surfaces those
/// more prominently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastPriority {
    High,
    Medium,
    Low,
}

impl BroadcastPriority {
    /// Maps a search phase to its broadcast priority.
    pub fn for_phase(phase: u32) -> Self {
        match phase {
            0..=2 => Self::High,
            3 => Self::Medium,
            _ => Self::Low,
        }
    }
}

impl std::fmt::Display for BroadcastPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// An event pushed to a single session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum OutboundEvent {
    /// Registration acknowledgment.
    #[serde(rename_all = "camelCase")]
    Registered {
        identity_id: String,
        identity_kind: String,
        message: String,
    },

    /// The progressive search has begun (to the requester).
    #[serde(rename_all = "camelCase")]
    SearchStarted {
        request_id: String,
        search_phase: u32,
        search_radius_km: f64,
        status: RequestStatus,
        message: String,
    },

    /// The search radius expanded to a new phase (to the requester).
    #[serde(rename_all = "camelCase")]
    SearchPhaseExpanded {
        request_id: String,
        search_phase: u32,
        search_radius_km: f64,
        elapsed_seconds: u64,
        message: String,
    },

    /// Candidates were notified; the search has stopped expanding (to the
    /// requester).
    #[serde(rename_all = "camelCase")]
    CandidatesFound {
        request_id: String,
        provider_count: usize,
        search_phase: u32,
        search_radius_km: f64,
        nearest_distance_km: Option<f64>,
        elapsed_seconds: u64,
        message: String,
    },

    /// No provider found before the deadline (to the requester).
    #[serde(rename_all = "camelCase")]
    SearchTimedOut {
        request_id: String,
        search_phase: u32,
        search_radius_km: f64,
        elapsed_seconds: u64,
        message: String,
    },

    /// A request card pushed to a candidate provider.
    #[serde(rename_all = "camelCase")]
    IncomingServiceRequest {
        request_id: String,
        user_id: String,
        category: ServiceCategory,
        description: String,
        urgency: Urgency,
        origin: GeoPoint,
        distance_km: f64,
        distance_label: String,
        search_phase: u32,
        priority: BroadcastPriority,
        elapsed_seconds: u64,
    },

    /// The request was cancelled (to notified providers, and as the
    /// requester's acknowledgment).
    #[serde(rename_all = "camelCase")]
    RequestCancelled {
        request_id: String,
        reason: String,
        message: String,
    },

    /// A provider won the request (to the requester).
    #[serde(rename_all = "camelCase")]
    ProviderAssigned {
        request_id: String,
        provider: ProviderPublicInfo,
        distance_km: Option<f64>,
        eta: Option<Eta>,
        status: RequestStatus,
        timestamp: DateTime<Utc>,
    },

    /// A late accept lost the race (to the losing provider only).
    #[serde(rename_all = "camelCase")]
    AlreadyAssigned {
        request_id: String,
        message: String,
    },

    /// A provider moved into range of an open request (to the requester).
    #[serde(rename_all = "camelCase")]
    NewProviderInRange {
        request_id: String,
        provider: ProviderPublicInfo,
        distance_km: f64,
    },

    /// A relevant provider toggled online/offline (to the requester).
    #[serde(rename_all = "camelCase")]
    ProviderStatusChanged {
        request_id: String,
        provider_id: String,
        is_online: bool,
        distance_km: Option<f64>,
    },

    /// Acknowledgment of a live-location update (to the provider).
    #[serde(rename_all = "camelCase")]
    LocationUpdateConfirmed {
        success: bool,
        message: String,
    },

    /// Acknowledgment of an online-status update (to the provider).
    #[serde(rename_all = "camelCase")]
    StatusUpdateConfirmed {
        success: bool,
        is_online: bool,
        message: String,
    },

    /// The assigned provider finished the job (to the requester).
    #[serde(rename_all = "camelCase")]
    ServiceCompleted {
        request_id: String,
        provider_id: String,
        completed_at: DateTime<Utc>,
    },

    /// Completion acknowledgment (to the provider).
    #[serde(rename_all = "camelCase")]
    ServiceCompletionConfirmed {
        request_id: String,
        message: String,
    },

    /// Malformed or rejected input (to the caller's session).
    #[serde(rename_all = "camelCase")]
    ErrorAck {
        message: String,
    },
}

impl OutboundEvent {
    /// The wire tag of this event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Registered { .. } => "registered",
            Self::SearchStarted { .. } => "searchStarted",
            Self::SearchPhaseExpanded { .. } => "searchPhaseExpanded",
            Self::CandidatesFound { .. } => "candidatesFound",
            Self::SearchTimedOut { .. } => "searchTimedOut",
            Self::IncomingServiceRequest { .. } => "incomingServiceRequest",
            Self::RequestCancelled { .. } => "requestCancelled",
            Self::ProviderAssigned { .. } => "providerAssigned",
            Self::AlreadyAssigned { .. } => "alreadyAssigned",
            Self::NewProviderInRange { .. } => "newProviderInRange",
            Self::ProviderStatusChanged { .. } => "providerStatusChanged",
            Self::LocationUpdateConfirmed { .. } => "locationUpdateConfirmed",
            Self::StatusUpdateConfirmed { .. } => "statusUpdateConfirmed",
            Self::ServiceCompleted { .. } => "serviceCompleted",
            Self::ServiceCompletionConfirmed { .. } => "serviceCompletionConfirmed",
            Self::ErrorAck { .. } => "errorAck",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_follows_phase() {
        assert_eq!(BroadcastPriority::for_phase(1), BroadcastPriority::High);
        assert_eq!(BroadcastPriority::for_phase(2), BroadcastPriority::High);
        assert_eq!(BroadcastPriority::for_phase(3), BroadcastPriority::Medium);
        assert_eq!(BroadcastPriority::for_phase(4), BroadcastPriority::Low);
        assert_eq!(BroadcastPriority::for_phase(9), BroadcastPriority::Low);
    }

    #[test]
    fn events_serialize_with_tag_and_camel_case() {
        let event = OutboundEvent::CandidatesFound {
            request_id: "req-1".to_string(),
            provider_count: 2,
            search_phase: 1,
            search_radius_km: 1.0,
            nearest_distance_km: Some(0.42),
            elapsed_seconds: 0,
            message: "Found 2 providers within 1km".to_string(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "candidatesFound");
        assert_eq!(json["providerCount"], 2);
        assert_eq!(json["nearestDistanceKm"], 0.42);
    }

    #[test]
    fn event_name_matches_serialized_tag() {
        let event = OutboundEvent::AlreadyAssigned {
            request_id: "req-1".to_string(),
            message: "taken".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], event.name());
    }
}
